use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretSlice};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::{validate_name, SecretStore, SecretsResult};

/// Process-local secret store; contents vanish with the process.
#[derive(Default)]
pub struct MemorySecretStore {
    secrets: RwLock<HashMap<String, SecretSlice<u8>>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.secrets.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.secrets.read().await.is_empty()
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn get(&self, name: &str) -> SecretsResult<Option<SecretSlice<u8>>> {
        validate_name(name)?;
        Ok(self
            .secrets
            .read()
            .await
            .get(name)
            .map(|s| SecretSlice::from(s.expose_secret().to_vec())))
    }

    async fn put(&self, name: &str, value: &[u8]) -> SecretsResult<()> {
        validate_name(name)?;
        self.secrets
            .write()
            .await
            .insert(name.to_string(), SecretSlice::from(value.to_vec()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_or_create_is_stable() {
        let store = MemorySecretStore::new();
        assert!(store.is_empty().await);

        let first = store.get_or_create("pepper", 32).await.unwrap();
        let second = store.get_or_create("pepper", 32).await.unwrap();

        assert_eq!(first.expose_secret().len(), 32);
        assert_eq!(first.expose_secret(), second.expose_secret());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let store = MemorySecretStore::new();
        store.put("k", b"one").await.unwrap();
        store.put("k", b"two").await.unwrap();

        let value = store.get("k").await.unwrap().unwrap();
        assert_eq!(value.expose_secret(), b"two");
    }
}
