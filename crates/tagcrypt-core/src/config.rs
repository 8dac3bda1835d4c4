use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::error::{CoreError, CoreResult};

/// Top-level configuration (loaded from tagcrypt.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TagcryptConfig {
    pub log: LogConfig,
    pub keys: KeysConfig,
    pub hashing: HashingConfig,
    pub batch: BatchConfig,
    pub secrets: SecretsConfig,
    pub records: RecordsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

/// Master-key (KEK) settings for DEK wrapping
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeysConfig {
    /// KMS alias resolved to the current master key
    pub alias: String,
    /// Upper bound on a single KeyWrapper call, in seconds
    pub kms_timeout_secs: u64,
    /// Known master-key versions, oldest first. The highest version is current.
    pub versions: Vec<KeyVersionConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyVersionConfig {
    pub version: u32,
    pub key_id: String,
}

/// Argon2id parameters for HashSecure and the pepper secret name
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HashingConfig {
    /// Memory cost in KiB (default: 65536 = 64 MiB)
    pub argon2_mem_cost_kib: u32,
    /// Time cost / iterations (default: 3)
    pub argon2_time_cost: u32,
    /// Parallelism (default: 4)
    pub argon2_parallelism: u32,
    /// Name of the pepper in the secret store
    pub pepper_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Worker count (0 = available parallelism)
    pub max_concurrency: usize,
    /// Records per chunk (0 = derived from input size)
    pub batch_size: usize,
    /// Cancel queued work on the first failure
    pub stop_on_first_error: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretsConfig {
    /// Directory of the file-backed secret store
    pub dir: PathBuf,
}

/// Companion field naming style
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamingStyle {
    /// `email` -> `email_encrypted`, `dek_encrypted`, `key_version`
    #[default]
    Snake,
    /// `Email` -> `EmailEncrypted`, `DEKEncrypted`, `KeyVersion`
    Pascal,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordsConfig {
    pub naming: NamingStyle,
    /// Record schemas used by the CLI's JSON-lines processing
    pub schemas: Vec<SchemaConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaConfig {
    pub name: String,
    /// Source fields; companions are derived from each field's tag
    pub fields: Vec<FieldConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldConfig {
    pub name: String,
    /// string, bool, i8..i64, u8..u64, f32, f64, timestamp, bytes
    pub kind: String,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub nullable: bool,
}

impl TagcryptConfig {
    /// Parse configuration from TOML text.
    pub fn from_toml_str(text: &str) -> CoreResult<Self> {
        let config: Self = toml::from_str(text).map_err(|source| CoreError::Parse {
            path: "<inline>".into(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file, falling back to defaults when the file
    /// does not exist.
    pub fn load(path: &Path) -> CoreResult<Self> {
        if !path.exists() {
            tracing::warn!(
                "config file not found: {}  (using defaults)",
                path.display()
            );
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content).map_err(|source| CoreError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would only fail later, mid-batch.
    pub fn validate(&self) -> CoreResult<()> {
        if self.keys.alias.trim().is_empty() {
            return Err(CoreError::Config("keys.alias must not be empty".into()));
        }
        let mut seen = BTreeSet::new();
        for entry in &self.keys.versions {
            if entry.version == 0 {
                return Err(CoreError::Config(format!(
                    "keys.versions: version 0 is reserved (key_id {})",
                    entry.key_id
                )));
            }
            if !seen.insert(entry.version) {
                return Err(CoreError::Config(format!(
                    "keys.versions: duplicate version {}",
                    entry.version
                )));
            }
        }
        if self.hashing.argon2_time_cost == 0 || self.hashing.argon2_parallelism == 0 {
            return Err(CoreError::Config(
                "hashing: argon2 time cost and parallelism must be at least 1".into(),
            ));
        }
        if self.hashing.pepper_name.trim().is_empty() {
            return Err(CoreError::Config("hashing.pepper_name must not be empty".into()));
        }
        let mut names = BTreeSet::new();
        for schema in &self.records.schemas {
            if !names.insert(schema.name.as_str()) {
                return Err(CoreError::Config(format!(
                    "records.schemas: duplicate schema {}",
                    schema.name
                )));
            }
        }
        Ok(())
    }

    pub fn schema(&self, name: &str) -> Option<&SchemaConfig> {
        self.records.schemas.iter().find(|s| s.name == name)
    }
}

impl KeysConfig {
    /// Configured versions, falling back to a single `<alias>-v1` entry.
    pub fn effective_versions(&self) -> Vec<KeyVersionConfig> {
        if self.versions.is_empty() {
            return vec![KeyVersionConfig {
                version: 1,
                key_id: format!("{}-v1", self.alias),
            }];
        }
        let mut versions = self.versions.clone();
        versions.sort_by_key(|v| v.version);
        versions
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            alias: "tagcrypt-master".into(),
            kms_timeout_secs: 30,
            versions: Vec::new(),
        }
    }
}

impl Default for HashingConfig {
    fn default() -> Self {
        Self {
            argon2_mem_cost_kib: 65536,
            argon2_time_cost: 3,
            argon2_parallelism: 4,
            pepper_name: "tagcrypt-pepper".into(),
        }
    }
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("~/.config/tagcrypt/secrets"),
        }
    }
}

/// Expand a leading `~/` against `$HOME`.
pub fn expand_tilde(path: &Path) -> PathBuf {
    if let Some(rest) = path.to_str().and_then(|s| s.strip_prefix("~/")) {
        let home = std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"));
        return home.join(rest);
    }
    path.to_path_buf()
}
