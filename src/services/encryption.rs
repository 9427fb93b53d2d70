use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// AES-256-GCM encryption for mottos at rest.
///
/// Built once at startup from [`crate::config::AppConfig`] and shared through
/// the application state for the lifetime of the process.
pub struct MottoCipher {
    cipher: Aes256Gcm,
    ephemeral: bool,
}

impl MottoCipher {
    /// Create from a base64-encoded 32-byte key.
    pub fn new(key_base64: &str) -> Result<Self, EncryptionError> {
        let key_bytes = STANDARD
            .decode(key_base64)
            .map_err(|_| EncryptionError::InvalidKey)?;

        if key_bytes.len() != 32 {
            return Err(EncryptionError::InvalidKey);
        }

        let cipher =
            Aes256Gcm::new_from_slice(&key_bytes).map_err(|_| EncryptionError::InvalidKey)?;

        Ok(Self {
            cipher,
            ephemeral: false,
        })
    }

    /// Create with a random key that is never persisted. Anything encrypted
    /// with it becomes unreadable once the process exits.
    pub fn ephemeral() -> Self {
        let key = Aes256Gcm::generate_key(&mut OsRng);
        Self {
            cipher: Aes256Gcm::new(&key),
            ephemeral: true,
        }
    }

    /// Use the configured key, or fall back to an ephemeral one.
    pub fn from_config(key_base64: Option<&str>) -> Result<Self, EncryptionError> {
        match key_base64 {
            Some(key) => Self::new(key),
            None => {
                tracing::warn!(
                    "ENCRYPTION_KEY not set, generated a process-local key; stored mottos will not survive a restart"
                );
                Ok(Self::ephemeral())
            }
        }
    }

    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral
    }

    /// Encrypt data, returning nonce (12 bytes) prepended to ciphertext.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| EncryptionError::EncryptFailed)?;

        let mut output = nonce.to_vec();
        output.extend(ciphertext);
        Ok(output)
    }

    /// Decrypt data where the first 12 bytes are the nonce.
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        if data.len() < 12 {
            return Err(EncryptionError::DecryptFailed);
        }

        let (nonce_bytes, ciphertext) = data.split_at(12);
        let nonce = Nonce::from_slice(nonce_bytes);

        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| EncryptionError::DecryptFailed)
    }

    /// Encrypt a motto into the base64 text stored on the user record.
    pub fn encrypt_motto(&self, motto: &str) -> Result<String, EncryptionError> {
        Ok(STANDARD.encode(self.encrypt(motto.as_bytes())?))
    }

    pub fn decrypt_motto(&self, stored: &str) -> Result<String, EncryptionError> {
        let data = STANDARD
            .decode(stored)
            .map_err(|_| EncryptionError::DecryptFailed)?;
        let plaintext = self.decrypt(&data)?;
        String::from_utf8(plaintext).map_err(|_| EncryptionError::DecryptFailed)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EncryptionError {
    #[error("Invalid encryption key (must be 32 bytes, base64-encoded)")]
    InvalidKey,

    #[error("Encryption failed")]
    EncryptFailed,

    #[error("Decryption failed")]
    DecryptFailed,
}
