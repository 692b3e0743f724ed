//! Dropbox storage provider for drivelink.
//!
//! Dropbox-style adapter: RPC endpoints with JSON bodies, content endpoints
//! taking their argument in a header, and shared-link creation for
//! publishing files without rehosting them.

pub mod client;
pub mod provider;

pub use client::{to_direct_link, DropboxClient, DropboxEntry};
pub use provider::{DropboxConfig, DropboxProvider, PROVIDER_NAME};
