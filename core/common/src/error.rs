//! Common error types for drivelink.

use std::fmt;
use thiserror::Error;

/// Top-level error type for drivelink operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Provider has no client credentials configured for this deployment.
    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    /// Provider rejected the authorization code or the identity lookup failed.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Provider rejected a refresh token.
    #[error("Token refresh failed: {0}")]
    TokenRefreshFailed(String),

    /// A refresh was requested without a refresh token.
    #[error("Missing refresh token")]
    MissingRefreshToken,

    /// The access token expired and no refresh path exists.
    #[error("Re-authentication required for credential {0}")]
    ReauthRequired(String),

    /// The provider reported the file as missing.
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// The adapter does not implement an optional capability.
    #[error("Capability not supported by {provider}: {capability}")]
    CapabilityNotSupported {
        provider: String,
        capability: String,
    },

    /// No live credential with this id exists for the requesting owner.
    #[error("Integration not found: {0}")]
    IntegrationNotFound(String),

    /// The credential exists but is disabled.
    #[error("Integration disabled: {0}")]
    IntegrationDisabled(String),

    /// No adapter is registered for the identifier.
    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    /// Error raised inside a provider adapter, tagged with where it happened.
    #[error("{provider} {operation}: {source}")]
    Provider {
        provider: String,
        operation: &'static str,
        #[source]
        source: Box<Error>,
    },

    /// Provider refused access to the resource.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Transport or unexpected HTTP failure.
    #[error("Network error: {0}")]
    Network(String),

    /// An operation exceeded its time bound.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Cryptographic operation failed.
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Credential or state store failure.
    #[error("Store error: {0}")]
    Store(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),
}

/// Flat classification of an [`Error`], independent of adapter wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotConfigured,
    AuthenticationFailed,
    TokenRefreshFailed,
    MissingRefreshToken,
    ReauthRequired,
    FileNotFound,
    CapabilityNotSupported,
    IntegrationNotFound,
    IntegrationDisabled,
    ProviderNotFound,
    PermissionDenied,
    Network,
    Timeout,
    Io,
    Crypto,
    Store,
    Serialization,
    InvalidInput,
    NotFound,
    AlreadyExists,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl Error {
    /// Classify this error, looking through provider wrappers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotConfigured(_) => ErrorKind::NotConfigured,
            Error::AuthenticationFailed(_) => ErrorKind::AuthenticationFailed,
            Error::TokenRefreshFailed(_) => ErrorKind::TokenRefreshFailed,
            Error::MissingRefreshToken => ErrorKind::MissingRefreshToken,
            Error::ReauthRequired(_) => ErrorKind::ReauthRequired,
            Error::FileNotFound(_) => ErrorKind::FileNotFound,
            Error::CapabilityNotSupported { .. } => ErrorKind::CapabilityNotSupported,
            Error::IntegrationNotFound(_) => ErrorKind::IntegrationNotFound,
            Error::IntegrationDisabled(_) => ErrorKind::IntegrationDisabled,
            Error::ProviderNotFound(_) => ErrorKind::ProviderNotFound,
            Error::Provider { source, .. } => source.kind(),
            Error::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Error::Network(_) => ErrorKind::Network,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::Io(_) => ErrorKind::Io,
            Error::Crypto(_) => ErrorKind::Crypto,
            Error::Store(_) => ErrorKind::Store,
            Error::Serialization(_) => ErrorKind::Serialization,
            Error::InvalidInput(_) => ErrorKind::InvalidInput,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::AlreadyExists(_) => ErrorKind::AlreadyExists,
        }
    }

    /// Whether a caller may retry the failed operation with backoff.
    ///
    /// Only transport failures qualify. `FileNotFound` and `ReauthRequired`
    /// are terminal and must never be retried by any layer.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Network | ErrorKind::Timeout)
    }

    /// Tag an error with the adapter and operation it was raised in.
    ///
    /// Already-tagged errors are returned unchanged so the innermost
    /// operation name wins.
    pub fn in_provider(self, provider: impl Into<String>, operation: &'static str) -> Self {
        match self {
            tagged @ Error::Provider { .. } => tagged,
            other => Error::Provider {
                provider: provider.into(),
                operation,
                source: Box::new(other),
            },
        }
    }

    /// Shorthand for a `CapabilityNotSupported` error.
    pub fn unsupported(provider: impl Into<String>, capability: impl fmt::Display) -> Self {
        Error::CapabilityNotSupported {
            provider: provider.into(),
            capability: capability.to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Attach provider context to a fallible adapter call.
pub trait ProviderContext<T> {
    fn provider_context(self, provider: &str, operation: &'static str) -> Result<T>;
}

impl<T> ProviderContext<T> for Result<T> {
    fn provider_context(self, provider: &str, operation: &'static str) -> Result<T> {
        self.map_err(|e| e.in_provider(provider, operation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_looks_through_provider_wrapper() {
        let err = Error::FileNotFound("abc".to_string()).in_provider("gdrive", "get_file");
        assert_eq!(err.kind(), ErrorKind::FileNotFound);
        assert!(err.to_string().contains("gdrive get_file"));
    }

    #[test]
    fn test_in_provider_keeps_innermost_tag() {
        let err = Error::Network("reset".to_string())
            .in_provider("dropbox", "download")
            .in_provider("dropbox", "resolve");

        match err {
            Error::Provider { operation, .. } => assert_eq!(operation, "download"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_terminal_errors_are_not_retryable() {
        assert!(!Error::FileNotFound("x".to_string()).is_retryable());
        assert!(!Error::ReauthRequired("c1".to_string()).is_retryable());
        assert!(!Error::TokenRefreshFailed("bad".to_string()).is_retryable());
        assert!(Error::Network("reset".to_string()).is_retryable());
        assert!(Error::Timeout("slow".to_string())
            .in_provider("gdrive", "list_files")
            .is_retryable());
    }

    #[test]
    fn test_unsupported_names_capability() {
        let err = Error::unsupported("dropbox", "export");
        assert_eq!(err.kind(), ErrorKind::CapabilityNotSupported);
        assert_eq!(
            err.to_string(),
            "Capability not supported by dropbox: export"
        );
    }
}
