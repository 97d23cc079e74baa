use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{UnlatchError, UnlatchResult};

/// Top-level configuration (loaded from unlatch.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UnlatchConfig {
    pub storage: StorageConfig,
    pub jobs: JobsConfig,
    pub output: OutputConfig,
    pub logging: LoggingConfig,
}

impl UnlatchConfig {
    /// Load from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> UnlatchResult<Self> {
        if !path.exists() {
            tracing::warn!("config file not found: {}  (using defaults)", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| UnlatchError::Config(format!("parsing config {}: {e}", path.display())))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Fs,
    S3,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Which OpenDAL service backs the file store
    pub backend: StorageBackend,
    /// Root directory for the fs backend
    pub root: PathBuf,
    /// S3 endpoint
    pub endpoint: String,
    /// S3 region (default: us-east-1)
    pub region: String,
    /// Bucket name
    pub bucket: String,
    /// Enforce HTTPS for S3 connections (error on HTTP endpoints)
    pub enforce_tls: bool,
    /// Glob patterns a listed file name must match (empty = everything)
    pub include_patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// Files claimed per orchestrator invocation
    pub batch_size: usize,
    /// Lifetime of a job record from creation
    pub job_ttl_secs: u64,
    /// Client-download jobs expire this long after completing
    pub download_cleanup_secs: u64,
    /// Delay between readiness polls while another caller initializes
    pub init_poll_interval_ms: u64,
    /// Readiness polls before giving up with an initialization timeout
    pub init_poll_attempts: u32,
    /// Reaper period
    pub sweep_interval_secs: u64,
    /// Reclaim `processing` entries older than this (0 = never)
    pub stale_claim_secs: u64,
    /// Concurrent callers in the local driver (0 = cpu count)
    pub callers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Subfolder created next to the source for same-folder output
    pub subfolder_name: String,
    /// Name prefix used when output shares the source folder
    pub name_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Fs,
            root: PathBuf::from("."),
            endpoint: "http://localhost:8333".into(),
            region: "us-east-1".into(),
            bucket: "unlatch".into(),
            enforce_tls: false,
            include_patterns: Vec::new(),
        }
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            job_ttl_secs: 24 * 60 * 60,
            download_cleanup_secs: 60 * 60,
            init_poll_interval_ms: 500,
            init_poll_attempts: 20,
            sweep_interval_secs: 600,
            stale_claim_secs: 0,
            callers: 0,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            subfolder_name: "decrypted".into(),
            name_prefix: "decrypted_".into(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[storage]
backend = "s3"
endpoint = "https://s3.example.com:8333"
region = "eu-west-1"
bucket = "recordings"
enforce_tls = true
include_patterns = ["*.mp4", "*.MP4"]

[jobs]
batch_size = 2
job_ttl_secs = 3600
download_cleanup_secs = 120
init_poll_interval_ms = 50
init_poll_attempts = 4
stale_claim_secs = 900
callers = 3

[output]
subfolder_name = "plain"
name_prefix = "clear_"

[logging]
level = "debug"
format = "json"
"#;
        let config: UnlatchConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(config.storage.backend, StorageBackend::S3);
        assert!(config.storage.enforce_tls);
        assert_eq!(config.storage.bucket, "recordings");
        assert_eq!(config.storage.include_patterns.len(), 2);
        assert_eq!(config.jobs.batch_size, 2);
        assert_eq!(config.jobs.init_poll_attempts, 4);
        assert_eq!(config.jobs.stale_claim_secs, 900);
        assert_eq!(config.jobs.callers, 3);
        // not overridden
        assert_eq!(config.jobs.sweep_interval_secs, 600);
        assert_eq!(config.output.name_prefix, "clear_");
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_parse_defaults() {
        let config: UnlatchConfig = toml::from_str("").unwrap();

        assert_eq!(config.storage.backend, StorageBackend::Fs);
        assert_eq!(config.storage.root, PathBuf::from("."));
        assert!(config.storage.include_patterns.is_empty());
        assert_eq!(config.jobs.batch_size, 5);
        assert_eq!(config.jobs.job_ttl_secs, 86400);
        assert_eq!(config.jobs.init_poll_attempts, 20);
        assert_eq!(config.jobs.stale_claim_secs, 0);
        assert_eq!(config.output.subfolder_name, "decrypted");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = UnlatchConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: UnlatchConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.storage.backend, parsed.storage.backend);
        assert_eq!(config.jobs.batch_size, parsed.jobs.batch_size);
        assert_eq!(config.output.name_prefix, parsed.output.name_prefix);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = UnlatchConfig::load(&tmp.path().join("absent.toml")).unwrap();
        assert_eq!(config.jobs.batch_size, 5);
    }

    #[test]
    fn test_load_rejects_malformed_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("bad.toml");
        std::fs::write(&path, "[jobs]\nbatch_size = \"many\"\n").unwrap();
        let err = UnlatchConfig::load(&path).unwrap_err();
        assert!(matches!(err, UnlatchError::Config(_)));
        assert!(err.to_string().contains("parsing config"));
    }
}
