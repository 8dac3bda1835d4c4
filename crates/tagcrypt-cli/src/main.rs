//! tagcrypt: tag-driven field encryption and hashing
//!
//! Commands:
//!   hash <value>                - lookup digest of a value (case-insensitive)
//!   hash-secure <value>         - peppered Argon2id hash of a value
//!   verify <value> <encoded>    - check a value against a secure hash (exit 1 on mismatch)
//!   encrypt --schema <name>     - encrypt and hash JSON-lines records
//!   decrypt --schema <name>     - restore encrypted fields of JSON-lines records
//!   keys list | keys rotate     - master-key versions
//!   config show                 - display current configuration

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::info;

use tagcrypt_core::config::{expand_tilde, TagcryptConfig};
use tagcrypt_crypto::{LocalKeyWrapper, SlowHashParams};
use tagcrypt_engine::{
    BatchOptions, BatchResult, DynamicRecord, KeyManager, RecordProcessor, RecordSchema,
};
use tagcrypt_secrets::{load_master_key, load_pepper, FileSecretStore, SecretStore};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "tagcrypt",
    version,
    about = "Tag-driven field encryption and hashing",
    long_about = "tagcrypt: encrypt, hash and verify record fields as declared by their tags"
)]
struct Cli {
    /// Path to tagcrypt.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "TAGCRYPT_CONFIG",
        default_value = "~/.config/tagcrypt/config.toml"
    )]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides log.level
    #[arg(long, env = "TAGCRYPT_LOG")]
    log: Option<String>,

    /// Log format (json, text); overrides log.format
    #[arg(long, env = "TAGCRYPT_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the lookup digest a `*Hash` companion would hold
    Hash { value: String },

    /// Print a salted, peppered secure hash of a value
    HashSecure { value: String },

    /// Check a value against a stored secure hash
    ///
    /// Prints "match" or "mismatch"; a mismatch exits with status 1.
    Verify { value: String, encoded: String },

    /// Encrypt and hash JSON-lines records
    Encrypt(RecordArgs),

    /// Restore the encrypted fields of JSON-lines records
    Decrypt(RecordArgs),

    /// Master-key version management
    Keys {
        #[command(subcommand)]
        action: KeysAction,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Args, Debug)]
struct RecordArgs {
    /// Schema name from records.schemas
    #[arg(long, short = 's')]
    schema: String,

    /// JSON-lines input (default: stdin)
    #[arg(long, short = 'i')]
    input: Option<PathBuf>,

    /// JSON-lines output (default: stdout)
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,

    /// Hide the progress bar
    #[arg(long, short = 'q')]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum KeysAction {
    /// List configured master-key versions
    List,
    /// Create the next local master key and print its config entry
    Rotate,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

#[derive(Clone, Copy, Debug)]
enum Direction {
    Encrypt,
    Decrypt,
}

impl Direction {
    fn label(self) -> &'static str {
        match self {
            Direction::Encrypt => "encrypt",
            Direction::Decrypt => "decrypt",
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config_path = expand_tilde(&cli.config);
    let config = TagcryptConfig::load(&config_path)
        .with_context(|| format!("loading config: {}", config_path.display()))?;

    let level = cli.log.clone().unwrap_or_else(|| config.log.level.clone());
    let format = match cli.log_format {
        Some(format) => format,
        None => <LogFormat as ValueEnum>::from_str(&config.log.format, true)
            .map_err(|e| anyhow::anyhow!("log.format: {e}"))?,
    };
    init_logging(&level, &format);

    if !config_path.exists() {
        tracing::warn!("config file not found: {}  (using defaults)", config_path.display());
    }
    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        "tagcrypt starting"
    );

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, cancelling");
                cancel.cancel();
            }
        });
    }

    match cli.command {
        Commands::Hash { value } => cmd_hash(&value),
        Commands::HashSecure { value } => cmd_hash_secure(&config, &value).await,
        Commands::Verify { value, encoded } => cmd_verify(&config, &cancel, &value, &encoded).await,
        Commands::Encrypt(args) => cmd_records(&config, &cancel, &args, Direction::Encrypt).await,
        Commands::Decrypt(args) => cmd_records(&config, &cancel, &args, Direction::Decrypt).await,
        Commands::Keys { action: KeysAction::List } => cmd_keys_list(&config).await,
        Commands::Keys { action: KeysAction::Rotate } => {
            cmd_keys_rotate(&config, &config_path, &cancel).await
        }
        Commands::Config { action: ConfigAction::Show } => cmd_config_show(&config, &config_path),
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Processor setup ───────────────────────────────────────────────────────────

/// Load every configured master key from the store into a local key wrapper
/// and point the alias at the newest one.
async fn build_key_manager(
    config: &TagcryptConfig,
    store: &dyn SecretStore,
) -> Result<(KeyManager, Arc<LocalKeyWrapper>)> {
    let versions = config.keys.effective_versions();
    let wrapper = Arc::new(LocalKeyWrapper::new());
    for entry in &versions {
        let key = load_master_key(store, &entry.key_id)
            .await
            .with_context(|| format!("loading master key {} (version {})", entry.key_id, entry.version))?;
        wrapper.insert_key(entry.key_id.clone(), key);
    }
    let current = versions
        .last()
        .context("no master-key versions configured")?;
    wrapper
        .set_alias(config.keys.alias.clone(), &current.key_id)
        .context("pointing key alias at the current version")?;

    let keys = KeyManager::with_versions(
        wrapper.clone(),
        config.keys.alias.clone(),
        versions.iter().map(|v| (v.version, v.key_id.clone())),
    )
    .context("registering master-key versions")?
    .with_timeout(Duration::from_secs(config.keys.kms_timeout_secs.max(1)));
    Ok((keys, wrapper))
}

async fn build_processor(config: &TagcryptConfig) -> Result<RecordProcessor> {
    let store = FileSecretStore::new(&config.secrets.dir);
    let pepper = load_pepper(&store, &config.hashing.pepper_name)
        .await
        .with_context(|| {
            format!(
                "loading pepper {} from {}",
                config.hashing.pepper_name,
                store.dir().display()
            )
        })?;
    let (keys, _) = build_key_manager(config, &store).await?;

    RecordProcessor::builder()
        .keys(Arc::new(keys))
        .pepper(pepper)
        .hashing_config(&config.hashing)
        .naming(config.records.naming.into())
        .build()
        .context("building record processor")
}

// ── `tagcrypt hash` / `hash-secure` / `verify` ────────────────────────────────

fn cmd_hash(value: &str) -> Result<ExitCode> {
    // Same digest the engine stores: lower-cased, empty for the zero value.
    let digest = if value.is_empty() {
        String::new()
    } else {
        tagcrypt_crypto::hash_fast(value.to_lowercase().as_bytes())
    };
    println!("{digest}");
    Ok(ExitCode::SUCCESS)
}

async fn cmd_hash_secure(config: &TagcryptConfig, value: &str) -> Result<ExitCode> {
    println!("{}", secure_digest(config, value).await?);
    Ok(ExitCode::SUCCESS)
}

/// Argon2id PHC string for `value`; empty for the zero value, like the engine.
async fn secure_digest(config: &TagcryptConfig, value: &str) -> Result<String> {
    if value.is_empty() {
        return Ok(String::new());
    }
    let store = FileSecretStore::new(&config.secrets.dir);
    let pepper = load_pepper(&store, &config.hashing.pepper_name)
        .await
        .context("loading pepper")?;
    let params = SlowHashParams {
        mem_cost_kib: config.hashing.argon2_mem_cost_kib,
        time_cost: config.hashing.argon2_time_cost,
        parallelism: config.hashing.argon2_parallelism,
        ..SlowHashParams::default()
    };
    let data = value.as_bytes().to_vec();
    tokio::task::spawn_blocking(move || tagcrypt_crypto::hash_secure(&data, &params, &pepper))
        .await
        .context("hashing task failed")?
        .context("computing secure hash")
}

async fn cmd_verify(
    config: &TagcryptConfig,
    cancel: &CancellationToken,
    value: &str,
    encoded: &str,
) -> Result<ExitCode> {
    let processor = build_processor(config).await?;
    let matched = processor
        .verify_secure_hash(cancel, &value.to_string(), encoded)
        .await
        .context("verifying secure hash")?;
    if matched {
        println!("match");
        if processor.needs_rehash(encoded).unwrap_or(false) {
            eprintln!("note: hash parameters differ from the current [hashing] settings");
        }
        Ok(ExitCode::SUCCESS)
    } else {
        println!("mismatch");
        Ok(ExitCode::FAILURE)
    }
}

// ── `tagcrypt encrypt` / `decrypt` ────────────────────────────────────────────

/// Parsed JSON-lines input: one slot per non-blank line.
struct Input {
    records: Vec<Option<DynamicRecord>>,
    /// 1-based source line of each slot
    lines: Vec<usize>,
    /// Parse errors by slot index; those slots are `None`
    errors: BTreeMap<usize, String>,
}

fn parse_records(schema: &Arc<RecordSchema>, text: &str) -> Input {
    let mut input = Input {
        records: Vec::new(),
        lines: Vec::new(),
        errors: BTreeMap::new(),
    };
    for (n, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let index = input.records.len();
        let parsed = serde_json::from_str::<serde_json::Value>(line)
            .map_err(|e| format!("invalid JSON: {e}"))
            .and_then(|json| {
                DynamicRecord::from_json(schema.clone(), &json).map_err(|e| e.to_string())
            });
        match parsed {
            Ok(record) => input.records.push(Some(record)),
            Err(reason) => {
                input.records.push(None);
                input.errors.insert(index, reason);
            }
        }
        input.lines.push(n + 1);
    }
    input
}

async fn read_input(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading input: {}", path.display())),
        None => {
            let mut text = String::new();
            tokio::io::stdin()
                .read_to_string(&mut text)
                .await
                .context("reading stdin")?;
            Ok(text)
        }
    }
}

async fn write_output(path: Option<&Path>, text: &str) -> Result<()> {
    match path {
        Some(path) => tokio::fs::write(path, text)
            .await
            .with_context(|| format!("writing output: {}", path.display())),
        None => {
            let mut stdout = tokio::io::stdout();
            stdout.write_all(text.as_bytes()).await.context("writing stdout")?;
            stdout.flush().await.context("flushing stdout")
        }
    }
}

fn make_progress_bar(total: u64, prefix: &str, quiet: bool) -> ProgressBar {
    if quiet || total == 0 {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total);
    if let Ok(style) =
        ProgressStyle::with_template("{prefix:.bold} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
    {
        pb.set_style(style.progress_chars("=> "));
    }
    pb.set_prefix(prefix.to_string());
    pb
}

async fn cmd_records(
    config: &TagcryptConfig,
    cancel: &CancellationToken,
    args: &RecordArgs,
    direction: Direction,
) -> Result<ExitCode> {
    let schema_config = config
        .schema(&args.schema)
        .with_context(|| format!("schema {} not found in records.schemas", args.schema))?;
    let schema = Arc::new(
        RecordSchema::from_config(schema_config, config.records.naming.into())
            .with_context(|| format!("building schema {}", args.schema))?,
    );
    let processor = build_processor(config).await?;

    let text = read_input(args.input.as_deref()).await?;
    let Input {
        records,
        lines,
        errors: parse_errors,
    } = parse_records(&schema, &text);
    let total = records.len();

    let pb = make_progress_bar(total as u64, direction.label(), args.quiet);
    let options = BatchOptions::from_config(&config.batch).with_progress({
        let pb = pb.clone();
        move |p| {
            pb.inc(1);
            if p.error.is_some() {
                pb.set_message(format!("line {} failed", p.index + 1));
            }
        }
    });

    let outcome = match direction {
        Direction::Encrypt => processor.process_batch(cancel, records, options).await,
        Direction::Decrypt => processor.decrypt_batch(cancel, records, options).await,
    };
    let (result, aborted) = match outcome {
        Ok(result) => (result, None),
        Err(aborted) => (aborted.result, Some(aborted.error)),
    };
    pb.finish_and_clear();

    let failures: BTreeMap<usize, String> = result
        .errors
        .iter()
        .map(|f| {
            let reason = parse_errors
                .get(&f.index)
                .cloned()
                .unwrap_or_else(|| f.error.to_string());
            (f.index, reason)
        })
        .collect();

    eprintln!(
        "{}: {} processed, {} failed, {} skipped of {} in {:.2?}",
        direction.label(),
        result.processed,
        result.failed,
        result.skipped,
        total,
        result.elapsed
    );
    for (index, reason) in &failures {
        let line = lines.get(*index).copied().unwrap_or(index + 1);
        eprintln!("  line {line}: {reason}");
    }
    if let Some(error) = &aborted {
        eprintln!("aborted: {error}");
    }

    // Skipped records were never touched; emitting them would mix plaintext
    // into encrypted output.
    if aborted.is_some() || result.skipped > 0 {
        anyhow::bail!(
            "{} incomplete: {} record(s) not processed, no output written",
            direction.label(),
            result.skipped + result.failed
        );
    }

    let rendered = render_records(&result, &failures)?;
    write_output(args.output.as_deref(), &rendered).await?;

    if failures.is_empty() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

/// Successful records as JSON lines, in input order.
fn render_records(
    result: &BatchResult<DynamicRecord>,
    failures: &BTreeMap<usize, String>,
) -> Result<String> {
    let mut out = String::new();
    for (index, slot) in result.records.iter().enumerate() {
        if failures.contains_key(&index) {
            continue;
        }
        let Some(record) = slot else {
            continue;
        };
        let line = serde_json::to_string(&record.to_json()).context("serializing record")?;
        out.push_str(&line);
        out.push('\n');
    }
    Ok(out)
}

// ── `tagcrypt keys` ───────────────────────────────────────────────────────────

async fn cmd_keys_list(config: &TagcryptConfig) -> Result<ExitCode> {
    let store = FileSecretStore::new(&config.secrets.dir);
    let versions = config.keys.effective_versions();
    let current = versions.last().map(|v| v.version).unwrap_or_default();

    println!("alias: {}", config.keys.alias);
    println!("store: {}", store.dir().display());
    for entry in &versions {
        let present = store
            .get(&entry.key_id)
            .await
            .with_context(|| format!("reading master key {}", entry.key_id))?
            .is_some();
        println!(
            "{} v{:<4} {:<32} {}",
            if entry.version == current { "*" } else { " " },
            entry.version,
            entry.key_id,
            if present { "present" } else { "missing" }
        );
    }
    Ok(ExitCode::SUCCESS)
}

/// `<alias>-v<n>` for the lowest `n >= next` not already configured.
fn next_key_id(alias: &str, next: u32, taken: &[String]) -> String {
    let mut n = next;
    loop {
        let key_id = format!("{alias}-v{n}");
        if !taken.contains(&key_id) {
            return key_id;
        }
        n += 1;
    }
}

async fn cmd_keys_rotate(
    config: &TagcryptConfig,
    config_path: &Path,
    cancel: &CancellationToken,
) -> Result<ExitCode> {
    let store = FileSecretStore::new(&config.secrets.dir);
    let (keys, wrapper) = build_key_manager(config, &store).await?;

    let taken: Vec<String> = keys.versions().into_iter().map(|(_, id)| id).collect();
    let key_id = next_key_id(&config.keys.alias, keys.current_version() + 1, &taken);
    let key = load_master_key(&store, &key_id)
        .await
        .with_context(|| format!("creating master key {key_id}"))?;
    wrapper.insert_key(key_id.clone(), key);
    wrapper
        .set_alias(config.keys.alias.clone(), &key_id)
        .context("pointing key alias at the new key")?;
    let version = keys.rotate(cancel).await.context("rotating master key")?;

    eprintln!("master key {key_id} stored in {}", store.dir().display());
    eprintln!("add this entry to {}:", config_path.display());
    println!("[[keys.versions]]");
    println!("version = {version}");
    println!("key_id = {}", toml::Value::String(key_id));
    Ok(ExitCode::SUCCESS)
}

// ── `tagcrypt config show` ────────────────────────────────────────────────────

fn cmd_config_show(config: &TagcryptConfig, config_path: &Path) -> Result<ExitCode> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tagcrypt_engine::{FieldDef, FieldKind, Naming, Record, Value};
    use tokio_util::sync::CancellationToken;

    fn user_schema() -> Arc<RecordSchema> {
        Arc::new(
            RecordSchema::with_companions(
                "user",
                vec![FieldDef::new("email", FieldKind::String).tagged("encrypt,hash_basic")],
                Naming::Snake,
            )
            .unwrap(),
        )
    }

    fn test_config(dir: &Path) -> TagcryptConfig {
        let mut config = TagcryptConfig::default();
        config.secrets.dir = dir.to_path_buf();
        config.hashing.argon2_mem_cost_kib = 1024;
        config.hashing.argon2_time_cost = 1;
        config.hashing.argon2_parallelism = 1;
        config
    }

    #[tokio::test]
    async fn test_secure_digest_skips_empty_value() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());

        assert_eq!(secure_digest(&config, "").await.unwrap(), "");
        // no pepper is created for the zero value
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        let encoded = secure_digest(&config, "s3cret").await.unwrap();
        assert!(encoded.starts_with("$argon2id$"), "{encoded}");
    }

    #[test]
    fn test_parse_records_keeps_line_numbers() {
        let text = "{\"email\":\"a@x.io\"}\n\n{not json}\n{\"nope\":1}\n{\"email\":\"b@x.io\"}\n";
        let input = parse_records(&user_schema(), text);

        assert_eq!(input.records.len(), 4);
        assert_eq!(input.lines, vec![1, 3, 4, 5]);
        assert!(input.records[0].is_some());
        assert!(input.records[1].is_none());
        assert!(input.records[2].is_none());
        assert!(input.errors[&1].starts_with("invalid JSON"));
        assert!(input.errors.contains_key(&2));
        assert_eq!(
            input.records[3].as_ref().unwrap().get("email"),
            Some(Value::String("b@x.io".into()))
        );
    }

    #[test]
    fn test_next_key_id_skips_taken() {
        let taken = vec!["m-v1".to_string(), "m-v2".to_string()];
        assert_eq!(next_key_id("m", 2, &taken), "m-v3");
        assert_eq!(next_key_id("m", 3, &taken), "m-v3");
    }

    #[test]
    fn test_log_format_from_config() {
        assert!(matches!(
            <LogFormat as ValueEnum>::from_str("JSON", true),
            Ok(LogFormat::Json)
        ));
        assert!(<LogFormat as ValueEnum>::from_str("yaml", true).is_err());
    }

    #[tokio::test]
    async fn test_rotated_key_is_picked_up_on_next_start() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        let store = FileSecretStore::new(dir.path());

        let (keys, _) = build_key_manager(&config, &store).await.unwrap();
        assert_eq!(keys.current_version(), 1);
        assert!(store.get("tagcrypt-master-v1").await.unwrap().is_some());

        let config_path = dir.path().join("config.toml");
        cmd_keys_rotate(&config, &config_path, &CancellationToken::new())
            .await
            .unwrap();
        assert!(store.get("tagcrypt-master-v2").await.unwrap().is_some());

        config.keys.versions = config.keys.effective_versions();
        config.keys.versions.push(tagcrypt_core::config::KeyVersionConfig {
            version: 2,
            key_id: "tagcrypt-master-v2".into(),
        });
        let (keys, _) = build_key_manager(&config, &store).await.unwrap();
        assert_eq!(keys.current_version(), 2);
        assert_eq!(keys.versions().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_encrypted_records_render_without_plaintext() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let processor = build_processor(&config).await.unwrap();

        let input = parse_records(&user_schema(), "{\"email\":\"Ada@Example.com\"}\n{bad\n");
        let result = processor
            .process_batch(&CancellationToken::new(), input.records, BatchOptions::default())
            .await
            .unwrap();
        let failures: BTreeMap<usize, String> = input.errors;

        let rendered = render_records(&result, &failures).unwrap();
        assert_eq!(rendered.lines().count(), 1);
        assert!(!rendered.contains("Ada@Example.com"));
        let json: serde_json::Value = serde_json::from_str(rendered.trim()).unwrap();
        assert_eq!(json["email"], "");
        assert_eq!(json["key_version"], 1);
    }
}
