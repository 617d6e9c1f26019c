//! sealdrive: zero-knowledge encrypted file storage CLI
//!
//! Commands:
//!   init                - create an account vault and print the recovery phrase
//!   put <local>         - encrypt and upload a file
//!   get <id> <local>    - download and decrypt a file
//!   rotate              - change the passphrase (objects stay decryptable)
//!   recover             - regain access with the recovery phrase
//!   config show         - display current configuration
//!
//! The server only ever sees ciphertext: content keys are generated
//! client-side and wrapped by the master key, which never leaves this
//! process unencrypted.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use secrecy::SecretString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use sealdrive_core::config::SealdriveConfig;
use sealdrive_crypto::{
    create_account, KdfParams, ObjectManifest, UserCryptoProperties, VaultSession,
};
use sealdrive_upload::{
    decrypt_stream, s3, RetryPolicy, S3Store, UploadOrchestrator,
};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "sealdrive",
    version,
    about = "Client-side encrypted file storage",
    long_about = "sealdrive: end-to-end encrypted uploads to S3-compatible storage. \
                  All encryption happens locally; the server stores only ciphertext."
)]
struct Cli {
    /// Path to sealdrive.toml configuration file
    #[arg(long, short = 'c', env = "SEALDRIVE_CONFIG", default_value = "sealdrive.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a new account vault
    ///
    /// Prompts for a passphrase and prints a 24-word recovery phrase.
    /// Write the phrase down: it is the only way back in if the
    /// passphrase is lost.
    Init,

    /// Encrypt a local file and upload it
    ///
    /// Credentials are read from AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY
    /// environment variables.
    Put {
        /// Local file to upload
        local: PathBuf,
        /// Stored name (default: the local file name), kept encrypted
        #[arg(long, short = 'n')]
        name: Option<String>,
    },

    /// Download and decrypt a stored object
    Get {
        /// Object key printed by `put`
        object_key: String,
        /// Local destination path
        local: PathBuf,
    },

    /// Change the passphrase
    ///
    /// The master key is rewrapped, not replaced, so existing objects
    /// remain decryptable. A new recovery phrase is issued; the old one
    /// stops working.
    Rotate,

    /// Regain access with the recovery phrase
    ///
    /// Unlocks the vault with the 24-word phrase from `init`, then sets
    /// a new passphrase. Existing objects remain decryptable and a new
    /// recovery phrase is issued.
    Recover,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration as TOML
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = SealdriveConfig::load(&cli.config)
        .with_context(|| format!("loading config: {}", cli.config.display()))?;

    match cli.command {
        Commands::Init => cmd_init(&config),
        Commands::Put { local, name } => cmd_put(&config, &local, name.as_deref()).await,
        Commands::Get { object_key, local } => cmd_get(&config, &object_key, &local).await,
        Commands::Rotate => cmd_rotate(&config),
        Commands::Recover => cmd_recover(&config),
        Commands::Config { action: ConfigAction::Show } => cmd_config_show(&config, &cli.config),
    }
}

// ── Vault helpers ─────────────────────────────────────────────────────────────

fn vault_path(config: &SealdriveConfig) -> PathBuf {
    match &config.transfer.vault_path {
        Some(path) => expand_tilde(path),
        None => expand_tilde(Path::new("~/.sealdrive/vault.json")),
    }
}

fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    path.to_path_buf()
}

fn load_vault(config: &SealdriveConfig) -> Result<UserCryptoProperties> {
    let path = vault_path(config);
    let bytes = std::fs::read(&path)
        .with_context(|| format!("no vault at {} (run `sealdrive init` first)", path.display()))?;
    Ok(UserCryptoProperties::from_bytes(&bytes)?)
}

fn store_vault(config: &SealdriveConfig, props: &UserCryptoProperties) -> Result<PathBuf> {
    let path = vault_path(config);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    std::fs::write(&path, props.to_bytes()?)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

fn prompt_passphrase(prompt: &str) -> Result<SecretString> {
    let pass = rpassword::prompt_password(prompt).context("reading passphrase")?;
    anyhow::ensure!(!pass.is_empty(), "passphrase must not be empty");
    Ok(SecretString::from(pass))
}

fn unlock_session(config: &SealdriveConfig) -> Result<(VaultSession, UserCryptoProperties)> {
    let props = load_vault(config)?;
    let passphrase = prompt_passphrase("Passphrase: ")?;
    let session = VaultSession::unlock(&passphrase, &props)
        .context("unlock failed (wrong passphrase or corrupted vault)")?;
    Ok((session, props))
}

fn kdf_params(config: &SealdriveConfig) -> KdfParams {
    KdfParams {
        mem_cost_kib: config.crypto.argon2_mem_cost_kib,
        time_cost: config.crypto.argon2_time_cost,
        parallelism: config.crypto.argon2_parallelism,
        ..KdfParams::default()
    }
}

// ── Storage helpers ───────────────────────────────────────────────────────────

fn build_store(config: &SealdriveConfig) -> Result<S3Store> {
    let access_key = std::env::var("AWS_ACCESS_KEY_ID")
        .or_else(|_| std::env::var("SEALDRIVE_ACCESS_KEY_ID"))
        .context("S3 credentials not set: export AWS_ACCESS_KEY_ID")?;
    let secret_key = std::env::var("AWS_SECRET_ACCESS_KEY")
        .or_else(|_| std::env::var("SEALDRIVE_SECRET_ACCESS_KEY"))
        .context("AWS_SECRET_ACCESS_KEY not set")?;

    let op = s3::build_from_core_config(&config.storage, &access_key, &secret_key)
        .context("building storage operator")?;
    Ok(S3Store::new(op))
}

fn manifest_key(object_key: &str) -> String {
    format!("{object_key}.manifest")
}

// ── Progress helpers ──────────────────────────────────────────────────────────

fn make_spinner(prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{prefix:.bold} {spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

// ── `sealdrive init` ──────────────────────────────────────────────────────────

fn cmd_init(config: &SealdriveConfig) -> Result<()> {
    let path = vault_path(config);
    anyhow::ensure!(
        !path.exists(),
        "vault already exists at {} (remove it to start over)",
        path.display()
    );

    let passphrase = prompt_passphrase("Choose a passphrase: ")?;
    let confirm = prompt_passphrase("Confirm passphrase: ")?;
    anyhow::ensure!(
        secrecy::ExposeSecret::expose_secret(&passphrase)
            == secrecy::ExposeSecret::expose_secret(&confirm),
        "passphrases do not match"
    );

    let spinner = make_spinner("init");
    spinner.set_message("deriving keys (this is slow on purpose)...");
    let (props, recovery_phrase) = create_account(&passphrase, &kdf_params(config))?;
    spinner.finish_and_clear();

    let written = store_vault(config, &props)?;
    println!("Vault created: {}", written.display());
    println!();
    println!("Recovery phrase (write this down, it will not be shown again):");
    println!();
    println!("  {recovery_phrase}");
    Ok(())
}

// ── `sealdrive put` ───────────────────────────────────────────────────────────

async fn cmd_put(config: &SealdriveConfig, local: &Path, name: Option<&str>) -> Result<()> {
    let (session, _props) = unlock_session(config)?;
    let store = build_store(config)?;

    let name = match name {
        Some(n) => n.to_string(),
        None => local
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .context("local path has no file name; pass --name")?,
    };
    let object_key = format!("objects/{}", uuid::Uuid::new_v4());

    let file = tokio::fs::File::open(local)
        .await
        .with_context(|| format!("opening {}", local.display()))?;

    let key = sealdrive_crypto::generate_content_key();
    let cancel = CancellationToken::new();
    let spinner = make_spinner("put");
    spinner.set_message(format!("encrypting and uploading {}", local.display()));

    let mut orch = UploadOrchestrator::new(
        &store,
        RetryPolicy::from_config(&config.transfer),
        cancel,
    );
    let outcome = orch.upload(&key, &object_key, file).await?;

    let manifest = ObjectManifest::new(
        &session,
        outcome.object_id.clone(),
        outcome.encrypted_len,
        outcome.chunks,
        &key,
        &name,
    )?;
    store
        .put_object(&manifest_key(&object_key), manifest.to_bytes()?)
        .await
        .map_err(anyhow::Error::from)
        .context("storing manifest")?;

    spinner.finish_and_clear();
    println!("Uploaded {} ({} bytes encrypted, {} parts)", name, outcome.encrypted_len, outcome.parts.len());
    println!("Object key: {object_key}");
    Ok(())
}

// ── `sealdrive get` ───────────────────────────────────────────────────────────

async fn cmd_get(config: &SealdriveConfig, object_key: &str, local: &Path) -> Result<()> {
    let (session, _props) = unlock_session(config)?;
    let store = build_store(config)?;

    let spinner = make_spinner("get");
    spinner.set_message(format!("fetching {object_key}"));

    let manifest_bytes = store
        .read_object(&manifest_key(object_key))
        .await
        .map_err(anyhow::Error::from)
        .context("fetching manifest")?;
    let manifest = ObjectManifest::from_bytes(&manifest_bytes)?;
    let name = manifest.unwrap_name(&session)?;
    let key = manifest.unwrap_content_key(&session)?;

    let ciphertext = store
        .read_object(&manifest.object_id)
        .await
        .map_err(anyhow::Error::from)
        .context("fetching object")?;
    anyhow::ensure!(
        ciphertext.len() as u64 == manifest.encrypted_size,
        "object size mismatch: manifest says {} bytes, storage returned {}",
        manifest.encrypted_size,
        ciphertext.len()
    );

    spinner.set_message(format!("decrypting {name}"));
    let sink = tokio::fs::File::create(local)
        .await
        .with_context(|| format!("creating {}", local.display()))?;
    let written = decrypt_stream(&key, std::io::Cursor::new(ciphertext), sink).await?;

    spinner.finish_and_clear();
    println!("Downloaded {name} -> {} ({written} bytes)", local.display());
    Ok(())
}

// ── `sealdrive rotate` ────────────────────────────────────────────────────────

fn cmd_rotate(config: &SealdriveConfig) -> Result<()> {
    let (session, props) = unlock_session(config)?;

    let new_passphrase = prompt_passphrase("New passphrase: ")?;
    let confirm = prompt_passphrase("Confirm new passphrase: ")?;
    anyhow::ensure!(
        secrecy::ExposeSecret::expose_secret(&new_passphrase)
            == secrecy::ExposeSecret::expose_secret(&confirm),
        "passphrases do not match"
    );

    let spinner = make_spinner("rotate");
    spinner.set_message("rewrapping keys...");
    let (rotated, recovery_phrase) = session.rotate_master_key(&new_passphrase, &props)?;
    spinner.finish_and_clear();

    let written = store_vault(config, &rotated)?;
    println!("Vault updated: {}", written.display());
    println!();
    println!("New recovery phrase (the old one no longer works):");
    println!();
    println!("  {recovery_phrase}");
    Ok(())
}

// ── `sealdrive recover` ───────────────────────────────────────────────────────

fn cmd_recover(config: &SealdriveConfig) -> Result<()> {
    let props = load_vault(config)?;

    let phrase = rpassword::prompt_password("Recovery phrase (24 words): ")
        .context("reading recovery phrase")?;
    let session = VaultSession::unlock_with_recovery(phrase.trim(), &props)
        .context("recovery failed (wrong phrase or corrupted vault)")?;

    let new_passphrase = prompt_passphrase("New passphrase: ")?;
    let confirm = prompt_passphrase("Confirm new passphrase: ")?;
    anyhow::ensure!(
        secrecy::ExposeSecret::expose_secret(&new_passphrase)
            == secrecy::ExposeSecret::expose_secret(&confirm),
        "passphrases do not match"
    );

    let spinner = make_spinner("recover");
    spinner.set_message("rewrapping keys...");
    let (rotated, recovery_phrase) = session.rotate_master_key(&new_passphrase, &props)?;
    spinner.finish_and_clear();

    let written = store_vault(config, &rotated)?;
    println!("Vault updated: {}", written.display());
    println!();
    println!("New recovery phrase (the old one no longer works):");
    println!();
    println!("  {recovery_phrase}");
    Ok(())
}

// ── `sealdrive config show` ───────────────────────────────────────────────────

fn cmd_config_show(config: &SealdriveConfig, path: &Path) -> Result<()> {
    println!("# {}", path.display());
    print!("{}", toml::to_string_pretty(config).context("serializing config")?);
    Ok(())
}
