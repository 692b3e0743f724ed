//! String-level token cipher used by the credential layer.

use base64::{engine::general_purpose::STANDARD, Engine};

use crate::aead;
use crate::keys::TokenKey;
use drivelink_common::{Error, Result};

/// Symmetric encryption service for provider tokens.
///
/// Implementations must be side-effect free; the credential layer calls
/// them transiently and never caches plaintext.
pub trait TokenCipher: Send + Sync {
    /// Encrypt a plaintext token into an opaque string.
    fn encrypt(&self, plaintext: &str) -> Result<String>;

    /// Decrypt a string previously produced by [`TokenCipher::encrypt`].
    fn decrypt(&self, ciphertext: &str) -> Result<String>;
}

/// XChaCha20-Poly1305 cipher producing base64(nonce || ciphertext || tag).
pub struct XChaChaTokenCipher {
    key: TokenKey,
}

impl XChaChaTokenCipher {
    pub fn new(key: TokenKey) -> Self {
        Self { key }
    }
}

impl TokenCipher for XChaChaTokenCipher {
    fn encrypt(&self, plaintext: &str) -> Result<String> {
        let sealed = aead::encrypt(self.key.as_bytes(), plaintext.as_bytes())?;
        Ok(STANDARD.encode(sealed))
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String> {
        let sealed = STANDARD
            .decode(ciphertext)
            .map_err(|e| Error::Crypto(format!("Invalid ciphertext encoding: {}", e)))?;
        let plaintext = aead::decrypt(self.key.as_bytes(), &sealed)?;
        String::from_utf8(plaintext)
            .map_err(|_| Error::Crypto("Decrypted token is not valid UTF-8".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_cipher_hides_plaintext() {
        let cipher = XChaChaTokenCipher::new(TokenKey::generate());
        let sealed = cipher.encrypt("sl.dropbox-token").unwrap();

        assert!(!sealed.contains("dropbox"));
        assert_eq!(cipher.decrypt(&sealed).unwrap(), "sl.dropbox-token");
    }

    #[test]
    fn test_foreign_key_cannot_decrypt() {
        let a = XChaChaTokenCipher::new(TokenKey::generate());
        let b = XChaChaTokenCipher::new(TokenKey::generate());
        let sealed = a.encrypt("token").unwrap();

        assert!(b.decrypt(&sealed).is_err());
    }

    #[test]
    fn test_garbage_ciphertext_fails() {
        let cipher = XChaChaTokenCipher::new(TokenKey::generate());
        assert!(cipher.decrypt("%%%").is_err());
    }
}
