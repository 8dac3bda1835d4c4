//! Bootstrapping typed secrets out of a [`SecretStore`]

use secrecy::ExposeSecret;
use tagcrypt_crypto::{MasterKey, Pepper, KEY_SIZE, PEPPER_SIZE};

use crate::{SecretStore, SecretsError, SecretsResult};

/// Get-or-create the process-wide pepper.
///
/// A stored all-zero value is never accepted: it fails with
/// `UninitializedSecret` instead of silently weakening every hash.
pub async fn load_pepper(store: &dyn SecretStore, name: &str) -> SecretsResult<Pepper> {
    let secret = store.get_or_create(name, PEPPER_SIZE).await?;
    let pepper = Pepper::from_slice(secret.expose_secret())?;
    tracing::debug!(name, fingerprint = %pepper.fingerprint(), "pepper loaded");
    Ok(pepper)
}

/// Get-or-create a local master key by key ID.
pub async fn load_master_key(store: &dyn SecretStore, key_id: &str) -> SecretsResult<MasterKey> {
    let secret = store.get_or_create(key_id, KEY_SIZE).await?;
    let bytes: [u8; KEY_SIZE] =
        secret
            .expose_secret()
            .try_into()
            .map_err(|_| SecretsError::Corrupt {
                name: key_id.to_string(),
                reason: format!(
                    "master key must be {KEY_SIZE} bytes, got {}",
                    secret.expose_secret().len()
                ),
            })?;
    Ok(MasterKey::from_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemorySecretStore;
    use tagcrypt_crypto::CryptoError;

    #[tokio::test]
    async fn test_pepper_created_once() {
        let store = MemorySecretStore::new();
        let a = load_pepper(&store, "pepper").await.unwrap();
        let b = load_pepper(&store, "pepper").await.unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[tokio::test]
    async fn test_zero_pepper_is_uninitialized() {
        let store = MemorySecretStore::new();
        store.put("pepper", &[0u8; PEPPER_SIZE]).await.unwrap();

        let err = load_pepper(&store, "pepper").await.unwrap_err();
        assert!(matches!(
            err,
            SecretsError::Crypto(CryptoError::UninitializedSecret)
        ));
    }

    #[tokio::test]
    async fn test_master_key_wrong_size() {
        let store = MemorySecretStore::new();
        store.put("kek", &[1u8; 7]).await.unwrap();

        assert!(matches!(
            load_master_key(&store, "kek").await,
            Err(SecretsError::Corrupt { .. })
        ));
    }
}
