use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level client configuration (loaded from sealdrive.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SealdriveConfig {
    pub storage: StorageConfig,
    pub crypto: CryptoConfig,
    pub transfer: TransferConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// S3-compatible endpoint
    pub endpoint: String,
    /// S3 region (default: us-east-1)
    pub region: String,
    /// Bucket holding encrypted objects
    pub bucket: String,
    /// Enforce HTTPS for S3 connections (warn/error on HTTP endpoints)
    pub enforce_tls: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9000".into(),
            region: "us-east-1".into(),
            bucket: "sealdrive".into(),
            enforce_tls: false,
        }
    }
}

/// Passphrase KDF cost parameters. These are recorded inside
/// `UserCryptoProperties` at account creation; changing them here only
/// affects newly created accounts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// Argon2id memory cost in KiB (default: 65536 = 64 MiB)
    pub argon2_mem_cost_kib: u32,
    /// Argon2id time cost (iterations, default: 3)
    pub argon2_time_cost: u32,
    /// Argon2id parallelism (default: 4)
    pub argon2_parallelism: u32,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            argon2_mem_cost_kib: 65536,
            argon2_time_cost: 3,
            argon2_parallelism: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Maximum number of files encrypted/uploaded concurrently.
    /// Each in-flight transfer can buffer up to one multipart segment.
    pub max_concurrent_transfers: usize,
    /// Attempt budget for a single part upload (including the first try)
    pub max_part_attempts: u32,
    /// Base delay for exponential backoff between part retry attempts
    pub retry_base_delay_ms: u64,
    /// Where account key material (UserCryptoProperties JSON) lives
    pub vault_path: Option<PathBuf>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_concurrent_transfers: 4,
            max_part_attempts: 5,
            retry_base_delay_ms: 500,
            vault_path: None,
        }
    }
}

impl SealdriveConfig {
    /// Load configuration from a TOML file. A missing file yields defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading config {}: {e}", path.display()))?;
        let cfg: Self = toml::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("parsing config {}: {e}", path.display()))?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = SealdriveConfig::default();
        assert_eq!(cfg.crypto.argon2_mem_cost_kib, 65536);
        assert_eq!(cfg.transfer.max_part_attempts, 5);
        assert_eq!(cfg.storage.region, "us-east-1");
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let cfg: SealdriveConfig = toml::from_str(
            r#"
            [storage]
            endpoint = "https://s3.example.com"
            bucket = "drive"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.storage.endpoint, "https://s3.example.com");
        assert_eq!(cfg.storage.bucket, "drive");
        // untouched sections keep defaults
        assert_eq!(cfg.transfer.max_concurrent_transfers, 4);
        assert_eq!(cfg.crypto.argon2_time_cost, 3);
    }

    #[test]
    fn test_load_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = SealdriveConfig::load(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(cfg.storage.bucket, "sealdrive");
    }
}
