//! Master-key wrapping service seam (KMS) and an in-process implementation

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use crate::error::{CryptoError, CryptoResult};
use crate::keys::{unwrap_key, wrap_key, MasterKey};

/// A key-management service that wraps DEKs under master keys it holds.
///
/// Implementations may be network-bound; callers bound every call with a
/// timeout and a cancellation token.
#[async_trait]
pub trait KeyWrapper: Send + Sync {
    /// Resolve an alias to the key ID it currently points at.
    async fn key_id(&self, alias: &str) -> CryptoResult<String>;

    async fn wrap(&self, key_id: &str, plaintext: &[u8]) -> CryptoResult<Vec<u8>>;

    async fn unwrap(&self, key_id: &str, ciphertext: &[u8]) -> CryptoResult<Vec<u8>>;
}

#[derive(Default)]
struct Keyring {
    keys: HashMap<String, MasterKey>,
    aliases: HashMap<String, String>,
}

/// In-process key wrapper holding master keys by ID.
///
/// Wrapped output binds the key ID as associated data, so a DEK wrapped
/// under one key ID never unwraps under another.
#[derive(Default)]
pub struct LocalKeyWrapper {
    ring: RwLock<Keyring>,
}

impl LocalKeyWrapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_key(&self, key_id: impl Into<String>, key: MasterKey) {
        let mut ring = self.ring.write().unwrap_or_else(PoisonError::into_inner);
        ring.keys.insert(key_id.into(), key);
    }

    /// Point `alias` at an existing key.
    pub fn set_alias(&self, alias: impl Into<String>, key_id: &str) -> CryptoResult<()> {
        let mut ring = self.ring.write().unwrap_or_else(PoisonError::into_inner);
        if !ring.keys.contains_key(key_id) {
            return Err(CryptoError::KeyUnavailable(format!("unknown key ID {key_id}")));
        }
        ring.aliases.insert(alias.into(), key_id.to_string());
        Ok(())
    }

    /// Create a fresh master key named `<alias>-v<n>` and point `alias` at it.
    ///
    /// Existing keys are kept, so DEKs wrapped under them still unwrap.
    pub fn rotate_alias(&self, alias: &str) -> CryptoResult<String> {
        let key = MasterKey::generate()?;
        let mut ring = self.ring.write().unwrap_or_else(PoisonError::into_inner);
        let mut n = ring.keys.len() + 1;
        let mut key_id = format!("{alias}-v{n}");
        while ring.keys.contains_key(&key_id) {
            n += 1;
            key_id = format!("{alias}-v{n}");
        }
        ring.keys.insert(key_id.clone(), key);
        ring.aliases.insert(alias.to_string(), key_id.clone());
        tracing::info!(alias, key_id = %key_id, "local master key rotated");
        Ok(key_id)
    }

    fn with_key<T>(
        &self,
        key_id: &str,
        f: impl FnOnce(&MasterKey) -> CryptoResult<T>,
    ) -> CryptoResult<T> {
        let ring = self.ring.read().unwrap_or_else(PoisonError::into_inner);
        let key = ring
            .keys
            .get(key_id)
            .ok_or_else(|| CryptoError::KeyUnavailable(format!("unknown key ID {key_id}")))?;
        f(key)
    }
}

#[async_trait]
impl KeyWrapper for LocalKeyWrapper {
    async fn key_id(&self, alias: &str) -> CryptoResult<String> {
        let ring = self.ring.read().unwrap_or_else(PoisonError::into_inner);
        ring.aliases
            .get(alias)
            .cloned()
            .ok_or_else(|| CryptoError::KeyUnavailable(format!("unknown alias {alias}")))
    }

    async fn wrap(&self, key_id: &str, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        self.with_key(key_id, |key| wrap_key(key, key_id.as_bytes(), plaintext))
    }

    async fn unwrap(&self, key_id: &str, ciphertext: &[u8]) -> CryptoResult<Vec<u8>> {
        self.with_key(key_id, |key| unwrap_key(key, key_id.as_bytes(), ciphertext))
    }
}
