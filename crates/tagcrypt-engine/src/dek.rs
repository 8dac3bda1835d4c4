//! DEK lifecycle: generate, wrap under the current master-key version,
//! unwrap by stored version, rotate
//!
//! ```text
//! alias ──KeyWrapper::key_id──▶ key ID ──registered as──▶ version N (current)
//! DEK ──wrap(key ID of current)──▶ WrappedDek { ciphertext, version: N }
//! WrappedDek ──unwrap(key ID of version)──▶ DEK
//! ```
//!
//! Versions start at 1 and only grow. Rotation changes the version used by
//! future wraps; older versions stay registered so existing records remain
//! decryptable.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tagcrypt_crypto::{CryptoError, CryptoResult, Dek, KeyWrapper};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::error::{FieldCryptError, Operation};

pub const DEFAULT_KMS_TIMEOUT: Duration = Duration::from_secs(30);

/// A DEK wrapped under a specific master-key version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedDek {
    pub ciphertext: Vec<u8>,
    pub version: u32,
}

#[derive(Debug, Clone, Error)]
pub enum DekError {
    #[error("key version {version} unavailable: {reason}")]
    KeyUnavailable { version: u32, reason: String },

    #[error(transparent)]
    Crypto(CryptoError),

    #[error("key wrapper call timed out after {0:?}")]
    Timeout(Duration),

    #[error("cancelled")]
    Cancelled,
}

impl DekError {
    /// Attribute the failure to a record field.
    pub fn into_field_error(self, field: &str, operation: Operation) -> FieldCryptError {
        match self {
            DekError::KeyUnavailable { version, reason } => FieldCryptError::KeyUnavailable {
                field: field.to_string(),
                version,
                operation,
                reason,
            },
            DekError::Crypto(source) => FieldCryptError::failed(field, operation, source),
            DekError::Timeout(after) => FieldCryptError::failed(
                field,
                operation,
                CryptoError::KmsUnavailable(format!("timed out after {after:?}")),
            ),
            DekError::Cancelled => FieldCryptError::cancelled(field, operation),
        }
    }
}

#[derive(Debug)]
struct KeyRing {
    current: u32,
    ids: BTreeMap<u32, String>,
}

/// Master-key version registry in front of a [`KeyWrapper`].
///
/// Shared read-only across concurrent record processing; only `rotate`
/// takes the write lock.
pub struct KeyManager {
    wrapper: Arc<dyn KeyWrapper>,
    alias: String,
    timeout: Duration,
    ring: RwLock<KeyRing>,
}

impl KeyManager {
    /// Resolve `alias` and register the result as version 1.
    pub async fn connect(wrapper: Arc<dyn KeyWrapper>, alias: impl Into<String>) -> Result<Self, DekError> {
        let alias = alias.into();
        let key_id = tokio::time::timeout(DEFAULT_KMS_TIMEOUT, wrapper.key_id(&alias))
            .await
            .map_err(|_| DekError::Timeout(DEFAULT_KMS_TIMEOUT))?
            .map_err(DekError::Crypto)?;
        tracing::info!(alias = %alias, key_id = %key_id, "key manager connected at version 1");
        Self::with_versions(wrapper, alias, [(1, key_id)])
    }

    /// Restore a known version history; the highest version becomes current.
    pub fn with_versions(
        wrapper: Arc<dyn KeyWrapper>,
        alias: impl Into<String>,
        versions: impl IntoIterator<Item = (u32, String)>,
    ) -> Result<Self, DekError> {
        let mut ids = BTreeMap::new();
        for (version, key_id) in versions {
            if version == 0 {
                return Err(DekError::KeyUnavailable {
                    version,
                    reason: "version 0 is reserved".into(),
                });
            }
            ids.insert(version, key_id);
        }
        let Some(&current) = ids.keys().next_back() else {
            return Err(DekError::KeyUnavailable {
                version: 0,
                reason: "no master-key versions configured".into(),
            });
        };
        Ok(Self {
            wrapper,
            alias: alias.into(),
            timeout: DEFAULT_KMS_TIMEOUT,
            ring: RwLock::new(KeyRing { current, ids }),
        })
    }

    /// Bound every KeyWrapper call by `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn current_version(&self) -> u32 {
        self.ring.read().unwrap_or_else(PoisonError::into_inner).current
    }

    /// Registered `(version, key ID)` pairs, oldest first.
    pub fn versions(&self) -> Vec<(u32, String)> {
        let ring = self.ring.read().unwrap_or_else(PoisonError::into_inner);
        ring.ids.iter().map(|(v, id)| (*v, id.clone())).collect()
    }

    pub fn generate_dek(&self) -> Result<Dek, DekError> {
        tagcrypt_crypto::generate_dek().map_err(DekError::Crypto)
    }

    /// Wrap `dek` under the current master-key version.
    pub async fn wrap_dek(&self, cancel: &CancellationToken, dek: &Dek) -> Result<WrappedDek, DekError> {
        let (version, key_id) = {
            let ring = self.ring.read().unwrap_or_else(PoisonError::into_inner);
            let key_id = ring.ids.get(&ring.current).cloned().unwrap_or_default();
            (ring.current, key_id)
        };
        let ciphertext = self
            .guarded(cancel, version, self.wrapper.wrap(&key_id, dek.as_bytes()))
            .await?;
        tracing::debug!(version, "dek wrapped");
        Ok(WrappedDek { ciphertext, version })
    }

    /// Unwrap a DEK stored under `version`.
    ///
    /// Unknown versions fail with `KeyUnavailable` before any KeyWrapper call.
    pub async fn unwrap_dek(&self, cancel: &CancellationToken, wrapped: &[u8], version: u32) -> Result<Dek, DekError> {
        let key_id = {
            let ring = self.ring.read().unwrap_or_else(PoisonError::into_inner);
            ring.ids.get(&version).cloned()
        };
        let Some(key_id) = key_id else {
            return Err(DekError::KeyUnavailable {
                version,
                reason: "unknown master-key version".into(),
            });
        };
        let plaintext = self
            .guarded(cancel, version, self.wrapper.unwrap(&key_id, wrapped))
            .await?;
        Dek::from_slice(plaintext).map_err(DekError::Crypto)
    }

    /// Re-resolve the alias and make its key the current version.
    ///
    /// Returns the (possibly unchanged) current version.
    pub async fn rotate(&self, cancel: &CancellationToken) -> Result<u32, DekError> {
        let pending = self.current_version() + 1;
        let key_id = self
            .guarded(cancel, pending, self.wrapper.key_id(&self.alias))
            .await?;

        let mut ring = self.ring.write().unwrap_or_else(PoisonError::into_inner);
        if ring.ids.get(&ring.current) == Some(&key_id) {
            tracing::warn!(alias = %self.alias, version = ring.current, "rotate: alias still resolves to the current key");
            return Ok(ring.current);
        }
        if let Some((&known, _)) = ring.ids.iter().find(|(_, id)| **id == key_id) {
            tracing::warn!(alias = %self.alias, version = known, "rotate: alias resolves to a previously registered key");
            ring.current = known;
            return Ok(known);
        }
        let next = ring.ids.keys().next_back().copied().unwrap_or(0) + 1;
        ring.ids.insert(next, key_id.clone());
        ring.current = next;
        tracing::info!(alias = %self.alias, version = next, key_id = %key_id, "master key rotated");
        Ok(next)
    }

    async fn guarded<T>(
        &self,
        cancel: &CancellationToken,
        version: u32,
        call: impl Future<Output = CryptoResult<T>>,
    ) -> Result<T, DekError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(DekError::Cancelled),
            res = tokio::time::timeout(self.timeout, call) => match res {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(CryptoError::KeyUnavailable(reason))) => {
                    Err(DekError::KeyUnavailable { version, reason })
                }
                Ok(Err(e)) => Err(DekError::Crypto(e)),
                Err(_) => Err(DekError::Timeout(self.timeout)),
            },
        }
    }
}

impl std::fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyManager")
            .field("alias", &self.alias)
            .field("timeout", &self.timeout)
            .field("current_version", &self.current_version())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tagcrypt_crypto::{LocalKeyWrapper, MasterKey};

    fn local() -> Arc<LocalKeyWrapper> {
        let wrapper = LocalKeyWrapper::new();
        wrapper.insert_key("master-v1", MasterKey::generate().unwrap());
        wrapper.set_alias("master", "master-v1").unwrap();
        Arc::new(wrapper)
    }

    #[tokio::test]
    async fn test_wrap_unwrap_roundtrip() {
        let keys = KeyManager::connect(local(), "master").await.unwrap();
        let cancel = CancellationToken::new();
        let dek = keys.generate_dek().unwrap();

        let wrapped = keys.wrap_dek(&cancel, &dek).await.unwrap();
        assert_eq!(wrapped.version, 1);
        assert_ne!(&wrapped.ciphertext[..], &dek.as_bytes()[..]);

        let back = keys.unwrap_dek(&cancel, &wrapped.ciphertext, 1).await.unwrap();
        assert_eq!(back.as_bytes(), dek.as_bytes());
    }

    #[tokio::test]
    async fn test_unknown_version_is_key_unavailable() {
        let keys = KeyManager::connect(local(), "master").await.unwrap();
        let cancel = CancellationToken::new();
        let dek = keys.generate_dek().unwrap();
        let wrapped = keys.wrap_dek(&cancel, &dek).await.unwrap();

        for version in [0, 2, 99] {
            let err = keys.unwrap_dek(&cancel, &wrapped.ciphertext, version).await.unwrap_err();
            assert!(matches!(err, DekError::KeyUnavailable { version: v, .. } if v == version));
        }
    }

    #[tokio::test]
    async fn test_rotation_keeps_old_versions() {
        let wrapper = local();
        let keys = KeyManager::connect(wrapper.clone(), "master").await.unwrap();
        let cancel = CancellationToken::new();
        let dek = keys.generate_dek().unwrap();
        let old = keys.wrap_dek(&cancel, &dek).await.unwrap();

        wrapper.rotate_alias("master").unwrap();
        assert_eq!(keys.rotate(&cancel).await.unwrap(), 2);
        assert_eq!(keys.current_version(), 2);

        let new = keys.wrap_dek(&cancel, &dek).await.unwrap();
        assert_eq!(new.version, 2);

        let from_old = keys.unwrap_dek(&cancel, &old.ciphertext, 1).await.unwrap();
        assert_eq!(from_old.as_bytes(), dek.as_bytes());
        // ciphertext from v1 does not authenticate under v2
        assert!(keys.unwrap_dek(&cancel, &old.ciphertext, 2).await.is_err());
    }

    #[tokio::test]
    async fn test_rotate_without_alias_change_is_noop() {
        let keys = KeyManager::connect(local(), "master").await.unwrap();
        let cancel = CancellationToken::new();
        assert_eq!(keys.rotate(&cancel).await.unwrap(), 1);
        assert_eq!(keys.versions().len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_call_fails_fast() {
        let keys = KeyManager::connect(local(), "master").await.unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let dek = keys.generate_dek().unwrap();
        assert!(matches!(
            keys.wrap_dek(&cancel, &dek).await,
            Err(DekError::Cancelled)
        ));
    }

    /// Never answers.
    struct StalledKms;

    #[async_trait::async_trait]
    impl KeyWrapper for StalledKms {
        async fn key_id(&self, _alias: &str) -> CryptoResult<String> {
            std::future::pending().await
        }

        async fn wrap(&self, _key_id: &str, _plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
            std::future::pending().await
        }

        async fn unwrap(&self, _key_id: &str, _ciphertext: &[u8]) -> CryptoResult<Vec<u8>> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_stalled_kms_times_out() {
        let keys = KeyManager::with_versions(Arc::new(StalledKms), "master", [(1, "m-v1".to_string())])
            .unwrap()
            .with_timeout(Duration::from_millis(50));
        let dek = keys.generate_dek().unwrap();

        let err = keys.wrap_dek(&CancellationToken::new(), &dek).await.unwrap_err();
        assert!(matches!(err, DekError::Timeout(d) if d == Duration::from_millis(50)));

        let field_err = err.into_field_error("email", Operation::WrapKey);
        assert_eq!(field_err.field(), Some("email"));
    }

    #[test]
    fn test_with_versions_rejects_zero_and_empty() {
        let wrapper: Arc<dyn KeyWrapper> = local();
        assert!(KeyManager::with_versions(wrapper.clone(), "master", [(0, "x".to_string())]).is_err());
        assert!(KeyManager::with_versions(wrapper.clone(), "master", Vec::new()).is_err());

        let keys = KeyManager::with_versions(
            wrapper,
            "master",
            [(1, "master-v1".to_string()), (3, "master-v3".to_string())],
        )
        .unwrap();
        assert_eq!(keys.current_version(), 3);
    }
}
