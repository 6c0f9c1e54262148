//! Per-user key cache
//!
//! The login flow installs one symmetric key per user; every component that
//! needs to seal or open a secret asks the [`KeyManager`] for it. Keys live in
//! memory only and are dropped (and zeroized) at logout or after the TTL.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use argon2::{Algorithm, Argon2, Params, Version};
use dashmap::DashMap;
use rand::RngCore;
use tracing::{debug, info};
use zeroize::Zeroizing;

use super::error::CryptoError;
use crate::store::types::UserId;

/// Symmetric key length in bytes
pub const KEY_LEN: usize = 32;

/// Argon2id cost used when deriving a key from a login password
/// (19 MiB, 2 passes, single lane).
const KDF_MEMORY_KIB: u32 = 19 * 1024;
const KDF_ITERATIONS: u32 = 2;
const KDF_PARALLELISM: u32 = 1;

/// A user's symmetric key. Zeroized on drop, never printed.
#[derive(Clone)]
pub struct UserKey(Zeroizing<[u8; KEY_LEN]>);

impl UserKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    /// Fresh random key
    pub fn generate() -> Self {
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        rand::rngs::OsRng.fill_bytes(&mut *key);
        Self(key)
    }

    /// Derive a key from a login password using Argon2id
    pub fn derive(password: &str, salt: &[u8]) -> Result<Self, CryptoError> {
        let params = Params::new(
            KDF_MEMORY_KIB,
            KDF_ITERATIONS,
            KDF_PARALLELISM,
            Some(KEY_LEN),
        )
        .map_err(|_| CryptoError::KeyDerivation)?;

        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        argon2
            .hash_password_into(password.as_bytes(), salt, &mut *key)
            .map_err(|_| CryptoError::KeyDerivation)?;

        Ok(Self(key))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for UserKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("UserKey(<redacted>)")
    }
}

#[derive(Clone)]
struct KeyEntry {
    key: Arc<UserKey>,
    installed_at: Instant,
}

/// Process-wide cache: user -> key
pub struct KeyManager {
    keys: DashMap<UserId, KeyEntry>,
    ttl: Option<Duration>,
}

impl KeyManager {
    /// Create a key manager; `ttl = None` keeps keys until logout
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            keys: DashMap::new(),
            ttl,
        }
    }

    /// Install (or rotate) the key for a user. Called by the login flow.
    pub fn install(&self, user: UserId, key: UserKey) {
        self.keys.insert(
            user,
            KeyEntry {
                key: Arc::new(key),
                installed_at: Instant::now(),
            },
        );
        info!("Installed encryption key for user {}", user);
    }

    /// Drop a user's key. Called at logout.
    pub fn evict(&self, user: UserId) -> bool {
        let removed = self.keys.remove(&user).is_some();
        if removed {
            info!("Evicted encryption key for user {}", user);
        }
        removed
    }

    /// Look up a user's key; expired entries are evicted and reported absent
    pub fn get(&self, user: UserId) -> Option<Arc<UserKey>> {
        let entry = self.keys.get(&user)?;
        if self.is_expired(&entry) {
            drop(entry);
            self.keys.remove(&user);
            debug!("Encryption key for user {} expired", user);
            return None;
        }
        Some(entry.key.clone())
    }

    /// Like [`get`](Self::get) but absence is an error
    pub fn require(&self, user: UserId) -> Result<Arc<UserKey>, CryptoError> {
        self.get(user).ok_or(CryptoError::KeyUnavailable(user.0))
    }

    pub fn contains(&self, user: UserId) -> bool {
        self.get(user).is_some()
    }

    /// Remove every expired key, returning how many were dropped
    pub fn purge_expired(&self) -> usize {
        let before = self.keys.len();
        self.keys.retain(|_, entry| !self.is_expired(entry));
        let purged = before.saturating_sub(self.keys.len());
        if purged > 0 {
            info!("Purged {} expired encryption keys", purged);
        }
        purged
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    fn is_expired(&self, entry: &KeyEntry) -> bool {
        match self.ttl {
            Some(ttl) => entry.installed_at.elapsed() >= ttl,
            None => false,
        }
    }
}

impl Default for KeyManager {
    fn default() -> Self {
        Self::new(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_get_evict() {
        let keys = KeyManager::default();
        let user = UserId(7);

        assert!(keys.get(user).is_none());

        keys.install(user, UserKey::from_bytes([1u8; KEY_LEN]));
        let key = keys.get(user).unwrap();
        assert_eq!(key.as_bytes(), &[1u8; KEY_LEN]);

        assert!(keys.evict(user));
        assert!(keys.get(user).is_none());
        assert!(!keys.evict(user));
    }

    #[test]
    fn test_install_rotates_key() {
        let keys = KeyManager::default();
        let user = UserId(1);

        keys.install(user, UserKey::from_bytes([1u8; KEY_LEN]));
        keys.install(user, UserKey::from_bytes([2u8; KEY_LEN]));

        assert_eq!(keys.len(), 1);
        assert_eq!(keys.get(user).unwrap().as_bytes(), &[2u8; KEY_LEN]);
    }

    #[test]
    fn test_expired_keys_are_absent() {
        let keys = KeyManager::new(Some(Duration::ZERO));
        keys.install(UserId(1), UserKey::generate());
        keys.install(UserId(2), UserKey::generate());

        assert!(keys.get(UserId(1)).is_none());
        assert!(matches!(
            keys.require(UserId(1)),
            Err(CryptoError::KeyUnavailable(1))
        ));
        assert_eq!(keys.purge_expired(), 1);
        assert!(keys.is_empty());
    }

    #[test]
    fn test_derive_is_stable_per_salt() {
        let k1 = UserKey::derive("hunter2", b"0123456789abcdef").unwrap();
        let k2 = UserKey::derive("hunter2", b"0123456789abcdef").unwrap();
        let k3 = UserKey::derive("hunter2", b"fedcba9876543210").unwrap();

        assert_eq!(k1.as_bytes(), k2.as_bytes());
        assert_ne!(k1.as_bytes(), k3.as_bytes());
    }

    #[test]
    fn test_debug_is_redacted() {
        let key = UserKey::from_bytes([0xAB; KEY_LEN]);
        let printed = format!("{:?}", key);
        assert!(!printed.contains("171"));
        assert!(printed.contains("redacted"));
    }
}
