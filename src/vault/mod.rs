//! Credential Vault
//!
//! Per-user symmetric keys and the cipher that seals individual secrets.

pub mod cipher;
mod error;
pub mod keys;

pub use cipher::{decrypt, encrypt};
pub use error::CryptoError;
pub use keys::{KeyManager, UserKey, KEY_LEN};
