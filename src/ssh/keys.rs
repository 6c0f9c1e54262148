//! Private key decoding
//!
//! Keys arrive as text (OpenSSH or PEM), never as file paths.

use russh::keys::PrivateKey;
use tracing::debug;

use super::error::SshError;

/// Decode a private key, unlocking it with `passphrase` when given
pub fn decode_private_key(text: &str, passphrase: Option<&str>) -> Result<PrivateKey, SshError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(SshError::KeyError("Private key is empty".to_string()));
    }

    let is_encrypted = text.contains("ENCRYPTED") || text.contains("Proc-Type: 4,ENCRYPTED");
    if is_encrypted && passphrase.is_none() {
        return Err(SshError::PassphraseRequired);
    }

    debug!("Decoding private key ({} bytes)", text.len());
    match passphrase {
        Some(pass) => russh::keys::decode_secret_key(text, Some(pass)).map_err(|e| {
            let msg = e.to_string();
            if msg.contains("decrypt") || msg.contains("password") {
                SshError::InvalidPassphrase
            } else {
                SshError::KeyError(msg)
            }
        }),
        None => russh::keys::decode_secret_key(text, None).map_err(SshError::from),
    }
}
