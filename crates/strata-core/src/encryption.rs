//! Encryption of caller credentials persisted inside download tasks

use crate::models::DownloadDestination;
use crate::AppError;
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose, Engine as _};
use std::env;

const NONCE_LEN: usize = 12;
const SEALED_PREFIX: &str = "enc:";

/// AES-256-GCM sealing of secrets stored in the task store
#[derive(Clone)]
pub struct EncryptionService {
    cipher: Aes256Gcm,
}

impl EncryptionService {
    pub fn from_key_bytes(key_bytes: &[u8]) -> Result<Self, AppError> {
        if key_bytes.len() != 32 {
            return Err(AppError::Configuration(
                "Encryption key must be 32 bytes (256 bits)".to_string(),
            ));
        }
        let key = Key::<Aes256Gcm>::from_slice(key_bytes);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    /// Build from `ENCRYPTION_KEY` (base64 encoded 32-byte key).
    pub fn from_env() -> Result<Self, AppError> {
        let key_str = env::var("ENCRYPTION_KEY").map_err(|_| {
            AppError::Configuration("ENCRYPTION_KEY environment variable not set".to_string())
        })?;

        let key_bytes = general_purpose::STANDARD
            .decode(key_str.trim())
            .map_err(|e| {
                AppError::Configuration(format!("Failed to decode encryption key: {}", e))
            })?;

        Self::from_key_bytes(&key_bytes)
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, AppError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| AppError::Internal(format!("Encryption failed: {}", e)))?;

        let mut combined = nonce.to_vec();
        combined.extend_from_slice(&ciphertext);
        Ok(general_purpose::STANDARD.encode(&combined))
    }

    pub fn decrypt(&self, encrypted: &str) -> Result<String, AppError> {
        let combined = general_purpose::STANDARD
            .decode(encrypted)
            .map_err(|e| AppError::Internal(format!("Failed to decode encrypted data: {}", e)))?;

        if combined.len() < NONCE_LEN {
            return Err(AppError::Internal("Encrypted data too short".to_string()));
        }

        let nonce = Nonce::from_slice(&combined[..NONCE_LEN]);
        let plaintext = self
            .cipher
            .decrypt(nonce, &combined[NONCE_LEN..])
            .map_err(|e| AppError::Internal(format!("Decryption failed: {}", e)))?;

        String::from_utf8(plaintext)
            .map_err(|e| AppError::Internal(format!("Invalid UTF-8 in decrypted data: {}", e)))
    }

    /// Copy of `destination` with its access token sealed. Already sealed tokens are kept.
    pub fn seal_destination(
        &self,
        destination: &DownloadDestination,
    ) -> Result<DownloadDestination, AppError> {
        let mut sealed = destination.clone();
        if let Some(token) = &destination.access_token {
            if !token.starts_with(SEALED_PREFIX) {
                sealed.access_token = Some(format!("{}{}", SEALED_PREFIX, self.encrypt(token)?));
            }
        }
        Ok(sealed)
    }

    /// Inverse of [`seal_destination`](Self::seal_destination). Plain tokens pass through.
    pub fn open_destination(
        &self,
        destination: &DownloadDestination,
    ) -> Result<DownloadDestination, AppError> {
        let mut opened = destination.clone();
        if let Some(token) = &destination.access_token {
            if let Some(sealed) = token.strip_prefix(SEALED_PREFIX) {
                opened.access_token = Some(self.decrypt(sealed)?);
            }
        }
        Ok(opened)
    }
}
