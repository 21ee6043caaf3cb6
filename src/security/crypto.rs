//! Symmetric encryption for stored SMTP passwords (Fernet tokens).

use std::fmt;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("invalid fernet key")]
    InvalidKey,
    #[error("decryption failed, the key may have changed")]
    Decrypt,
    #[error("decrypted secret is not valid utf-8")]
    Utf8,
}

#[derive(Clone)]
pub struct CredentialCipher {
    inner: fernet::Fernet,
}

impl CredentialCipher {
    /// `key` is a url-safe base64 32-byte Fernet key.
    pub fn new(key: &str) -> Result<Self, CipherError> {
        let inner = fernet::Fernet::new(key.trim()).ok_or(CipherError::InvalidKey)?;
        Ok(Self { inner })
    }

    /// Build from `FERNET_KEY`, or generate a throwaway key (secrets stored under it
    /// do not survive a restart).
    pub fn from_env_or_ephemeral(key: Option<&str>) -> Result<Self, CipherError> {
        match key {
            Some(k) if !k.trim().is_empty() => Self::new(k),
            _ => {
                tracing::warn!("FERNET_KEY not set, using an ephemeral key");
                Self::new(&fernet::Fernet::generate_key())
            }
        }
    }

    pub fn encrypt(&self, plaintext: &str) -> String {
        self.inner.encrypt(plaintext.as_bytes())
    }

    pub fn decrypt(&self, token: &str) -> Result<String, CipherError> {
        let bytes = self
            .inner
            .decrypt(token.trim())
            .map_err(|_| CipherError::Decrypt)?;
        String::from_utf8(bytes).map_err(|_| CipherError::Utf8)
    }
}

impl fmt::Debug for CredentialCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CredentialCipher(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_with_same_key() {
        let key = fernet::Fernet::generate_key();
        let c = CredentialCipher::new(&key).unwrap();
        let token = c.encrypt("hunter2");
        assert_ne!(token, "hunter2");
        assert_eq!(c.decrypt(&token).unwrap(), "hunter2");
    }

    #[test]
    fn other_key_fails_to_decrypt() {
        let a = CredentialCipher::new(&fernet::Fernet::generate_key()).unwrap();
        let b = CredentialCipher::new(&fernet::Fernet::generate_key()).unwrap();
        let token = a.encrypt("secret");
        assert!(matches!(b.decrypt(&token), Err(CipherError::Decrypt)));
    }

    #[test]
    fn bad_key_is_rejected() {
        assert!(matches!(
            CredentialCipher::new("not-a-key"),
            Err(CipherError::InvalidKey)
        ));
    }
}
