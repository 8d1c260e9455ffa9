//! Uploader configuration.
//!
//! Optional TOML file; command-line flags take precedence:
//! - Linux: `~/.config/glacier-upload/config.toml`
//! - Windows: `%APPDATA%/glacier-upload/config.toml`

use std::path::{Path, PathBuf};
use std::time::Duration;

use glacier_upload::RetryPolicy;
use serde::{Deserialize, Serialize};

/// Uploader configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// AWS region; the provider chain decides when unset.
    #[serde(default)]
    pub region: Option<String>,

    /// Multipart part size in MiB (power of two, 1..=4096).
    #[serde(default = "default_part_size_mib")]
    pub part_size_mib: u64,

    /// Concurrent part uploads.
    #[serde(default = "default_threads")]
    pub threads: usize,

    /// Attempts per part before the upload is abandoned.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry, in milliseconds (0 = retry immediately).
    #[serde(default)]
    pub retry_initial_delay_ms: u64,

    /// Backoff cap in milliseconds.
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,

    /// zstd level for directory archives.
    #[serde(default = "default_compression_level")]
    pub compression_level: i32,
}

fn default_part_size_mib() -> u64 {
    glacier_upload::DEFAULT_PART_SIZE_MIB
}

fn default_threads() -> usize {
    glacier_upload::DEFAULT_THREADS
}

fn default_max_attempts() -> u32 {
    glacier_upload::DEFAULT_MAX_ATTEMPTS
}

fn default_retry_max_delay_ms() -> u64 {
    15_000
}

fn default_compression_level() -> i32 {
    glacier_archive::DEFAULT_COMPRESSION_LEVEL
}

impl Default for Config {
    fn default() -> Self {
        Self {
            region: None,
            part_size_mib: default_part_size_mib(),
            threads: default_threads(),
            max_attempts: default_max_attempts(),
            retry_initial_delay_ms: 0,
            retry_max_delay_ms: default_retry_max_delay_ms(),
            compression_level: default_compression_level(),
        }
    }
}

impl Config {
    /// Loads the configuration file, or defaults if there is none.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&config_path())
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("invalid config {}: {e}", path.display()))?;
        tracing::debug!(path = %path.display(), "configuration file read");
        Ok(config)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.retry_initial_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            ..RetryPolicy::default()
        }
    }
}

/// Returns the platform-specific configuration file path.
fn config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata).join("glacier-upload").join("config.toml")
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home)
            .join(".config")
            .join("glacier-upload")
            .join("config.toml")
    }
}
