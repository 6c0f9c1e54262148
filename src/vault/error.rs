//! Error types for secret encryption/decryption

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed (wrong key or tampered data)")]
    DecryptionFailed,

    #[error("Malformed ciphertext: {0}")]
    Malformed(String),

    #[error("Unsupported ciphertext version: {0}")]
    UnsupportedVersion(u8),

    #[error("Key derivation failed")]
    KeyDerivation,

    #[error("No encryption key available for user {0}")]
    KeyUnavailable(i64),

    #[error("UTF-8 decode error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

impl serde::Serialize for CryptoError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
