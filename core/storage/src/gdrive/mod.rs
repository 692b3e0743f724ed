//! Google Drive storage provider for drivelink.
//!
//! This module provides a Drive-style adapter with:
//! - OAuth2 authorization with offline access
//! - Folder listing and search across My Drive and shared drives
//! - Export of Google-native documents
//! - Full StorageProvider trait implementation

pub mod client;
pub mod provider;

pub use client::{DriveClient, DriveFile};
pub use provider::{export_format, GDriveConfig, GDriveProvider, PROVIDER_NAME};
