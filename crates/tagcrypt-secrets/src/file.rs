//! File-backed secret store: one base64 file per secret

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use secrecy::SecretSlice;
use std::path::{Path, PathBuf};
use zeroize::Zeroize;

use crate::{validate_name, SecretStore, SecretsError, SecretsResult};

pub struct FileSecretStore {
    dir: PathBuf,
}

impl FileSecretStore {
    /// Open a store rooted at `dir` (a leading `~/` is expanded).
    ///
    /// The directory is created lazily on the first write.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: tagcrypt_core::config::expand_tilde(dir.as_ref()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> SecretsResult<PathBuf> {
        validate_name(name)?;
        Ok(self.dir.join(name))
    }
}

#[async_trait]
impl SecretStore for FileSecretStore {
    async fn get(&self, name: &str) -> SecretsResult<Option<SecretSlice<u8>>> {
        let path = self.path_for(name)?;
        let mut content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let decoded = STANDARD.decode(content.trim());
        content.zeroize();
        let bytes = decoded.map_err(|e| SecretsError::Corrupt {
            name: name.to_string(),
            reason: format!("base64 decode: {e}"),
        })?;
        Ok(Some(SecretSlice::from(bytes)))
    }

    async fn put(&self, name: &str, value: &[u8]) -> SecretsResult<()> {
        let path = self.path_for(name)?;
        ensure_private_dir(&self.dir).await?;
        let mut encoded = STANDARD.encode(value);
        encoded.push('\n');
        let result = atomic_replace(&path, encoded.as_bytes()).await;
        encoded.zeroize();
        result?;
        tracing::debug!(name, dir = %self.dir.display(), "secret written");
        Ok(())
    }
}

async fn ensure_private_dir(dir: &Path) -> SecretsResult<()> {
    if tokio::fs::metadata(dir).await.is_ok() {
        return Ok(());
    }
    tokio::fs::create_dir_all(dir).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700)).await?;
    }
    Ok(())
}

/// Write to a temp file in the same directory, restrict it, then rename it
/// over `path` so readers never observe a partial secret.
async fn atomic_replace(path: &Path, content: &[u8]) -> SecretsResult<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    let tmp_path = parent.join(format!(
        ".{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy()
    ));

    tokio::fs::write(&tmp_path, content).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600)).await?;
    }
    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[tokio::test]
    async fn test_roundtrip_and_no_temp_left() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSecretStore::new(dir.path().join("secrets"));

        store.put("kek-v1", &[1, 2, 3, 4]).await.unwrap();
        let value = store.get("kek-v1").await.unwrap().unwrap();

        assert_eq!(value.expose_secret(), &[1u8, 2, 3, 4]);
        assert!(!dir.path().join("secrets/.kek-v1.tmp").exists());
    }

    #[tokio::test]
    async fn test_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSecretStore::new(dir.path());
        assert!(store.get("absent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_file_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken"), "not base64 !!").unwrap();
        let store = FileSecretStore::new(dir.path());

        assert!(matches!(
            store.get("broken").await,
            Err(SecretsError::Corrupt { .. })
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_secret_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = FileSecretStore::new(dir.path().join("s"));
        store.put("pepper", &[7u8; 32]).await.unwrap();

        let mode = std::fs::metadata(dir.path().join("s/pepper"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
