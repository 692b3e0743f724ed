//! Common types used throughout drivelink.

use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::Zeroize;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new identifier.
            ///
            /// # Errors
            /// - Returns error if the id is empty or only whitespace
            pub fn new(id: impl Into<String>) -> crate::Result<Self> {
                let id = id.into();
                if id.trim().is_empty() {
                    return Err(crate::Error::InvalidInput(format!(
                        "{} cannot be empty",
                        $label
                    )));
                }
                Ok(Self(id))
            }

            /// Get the inner string value.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Identifier of a stored provider credential.
    CredentialId,
    "CredentialId"
);

string_id!(
    /// Identifier of the user owning credentials and posts.
    UserId,
    "UserId"
);

/// Plaintext secret (access or refresh token) that zeroizes on drop.
#[derive(Clone, PartialEq, Eq, Zeroize)]
#[zeroize(drop)]
pub struct SecretString(String);

impl SecretString {
    /// Wrap a plaintext secret.
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Borrow the plaintext. Use immediately, do not store.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for SecretString {
    fn from(secret: String) -> Self {
        Self(secret)
    }
}

impl From<&str> for SecretString {
    fn from(secret: &str) -> Self {
        Self(secret.to_string())
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretString([REDACTED; {} bytes])", self.0.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_id_creation() {
        let id = CredentialId::new("cred-1").unwrap();
        assert_eq!(id.as_str(), "cred-1");
        assert_eq!(id.to_string(), "cred-1");
    }

    #[test]
    fn test_empty_ids_fail() {
        assert!(CredentialId::new("").is_err());
        assert!(UserId::new("   ").is_err());
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let id = UserId::new("user-7").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"user-7\"");
    }

    #[test]
    fn test_secret_debug_is_redacted() {
        let secret = SecretString::new("ya29.secret");
        let debug = format!("{:?}", secret);
        assert!(!debug.contains("ya29"));
        assert!(debug.contains("REDACTED"));
        assert_eq!(secret.expose(), "ya29.secret");
    }
}
