//! Storage provider abstraction for drivelink.
//!
//! This crate provides a trait-based interface over remote drive services
//! (Google Drive, Dropbox) and a provider registry for resolving an adapter
//! by identifier.
//!
//! # Design Principles
//! - Provider isolation: no provider-specific logic outside the adapters
//! - Async operations: all I/O operations are async
//! - Streaming support: file bodies are handled via streams
//! - Unified error semantics: every adapter error is tagged with the
//!   provider and operation that produced it

pub mod config;
pub mod dropbox;
pub mod gdrive;
mod http;
pub mod memory;
pub mod oauth;
pub mod provider;
pub mod registry;

pub use config::{HttpConfig, OAuthClientConfig};
pub use dropbox::{DropboxConfig, DropboxProvider};
pub use gdrive::{GDriveConfig, GDriveProvider};
pub use memory::{MemoryProvider, RefreshOutcome};
pub use provider::{
    mime_from_name, require_capability, AuthRequest, AuthResult, ByteStream, Capabilities,
    Capability, Download, FileList, FileMetadata, SharedDrive, SharedDriveList, StorageProvider,
    StorageQuota, Thumbnail,
};
pub use registry::{create_default_registry, ProviderRegistry};
