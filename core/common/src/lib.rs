//! Common utilities and types shared across drivelink modules.
//!
//! This module provides the error taxonomy used by every layer of the
//! credential and media resolution subsystem, plus the identifier newtypes
//! that flow between them.

pub mod error;
pub mod types;

pub use error::{Error, ErrorKind, ProviderContext, Result};
pub use types::{CredentialId, SecretString, UserId};
