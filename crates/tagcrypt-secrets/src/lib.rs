//! tagcrypt-secrets: persistent secrets (pepper, local master keys)
//!
//! Stores are get-or-create: the first lookup of a missing secret mints it
//! from the OS RNG and persists it, every later lookup returns the same bytes.

pub mod error;
pub mod file;
pub mod memory;
pub mod pepper;

pub use error::{SecretsError, SecretsResult};
pub use file::FileSecretStore;
pub use memory::MemorySecretStore;
pub use pepper::{load_master_key, load_pepper};

use async_trait::async_trait;
use rand::{rngs::OsRng, RngCore};
use secrecy::SecretSlice;
use zeroize::Zeroize;

/// Named secret storage.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get(&self, name: &str) -> SecretsResult<Option<SecretSlice<u8>>>;

    async fn put(&self, name: &str, value: &[u8]) -> SecretsResult<()>;

    /// Return the named secret, creating `len` random bytes on first use.
    async fn get_or_create(&self, name: &str, len: usize) -> SecretsResult<SecretSlice<u8>> {
        if let Some(existing) = self.get(name).await? {
            return Ok(existing);
        }
        let mut bytes = vec![0u8; len];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| SecretsError::Random(e.to_string()))?;
        self.put(name, &bytes).await?;
        tracing::info!(name, len, "secret created");
        let secret = SecretSlice::from(bytes.clone());
        bytes.zeroize();
        Ok(secret)
    }
}

/// Secret names become file names, so keep them to a safe alphabet.
pub(crate) fn validate_name(name: &str) -> SecretsResult<()> {
    let ok = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if ok {
        Ok(())
    } else {
        Err(SecretsError::InvalidName(name.to_string()))
    }
}
