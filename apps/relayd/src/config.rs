//! Relay daemon configuration.
//!
//! Configuration is stored as TOML:
//! - Linux: `~/.config/stashbot/relayd.toml`
//! - Windows: `%APPDATA%/stashbot/relayd.toml`

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use stashbot_transfer::{CoordinatorConfig, RetryPolicy};

/// Relay daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Bucket all relayed objects live in.
    #[serde(default = "default_bucket")]
    pub bucket: String,

    /// Root directory of the local object store.
    #[serde(default = "default_storage_root")]
    pub storage_root: String,

    /// Maximum transfers running in parallel.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Pending transfers accepted beyond the running ones.
    #[serde(default = "default_queue_bound")]
    pub queue_bound: usize,

    /// Transfer chunk size in bytes.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Seconds between progress messages per transfer.
    #[serde(default = "default_progress_interval_secs")]
    pub progress_interval_secs: u64,

    /// Seconds finished transfers stay queryable.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,

    /// Attempts per storage step before a transfer fails.
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,

    /// Backoff start in milliseconds.
    #[serde(default = "default_retry_initial_delay_ms")]
    pub retry_initial_delay_ms: u64,
}

fn default_bucket() -> String {
    "stashbot".into()
}

fn default_storage_root() -> String {
    "~/.local/share/stashbot/objects".into()
}

fn default_max_concurrent() -> usize {
    4
}

fn default_queue_bound() -> usize {
    32
}

fn default_chunk_size() -> usize {
    stashbot_transfer::DEFAULT_CHUNK_SIZE
}

fn default_progress_interval_secs() -> u64 {
    1
}

fn default_retention_secs() -> u64 {
    300
}

fn default_retry_max_attempts() -> u32 {
    4
}

fn default_retry_initial_delay_ms() -> u64 {
    500
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bucket: default_bucket(),
            storage_root: default_storage_root(),
            max_concurrent: default_max_concurrent(),
            queue_bound: default_queue_bound(),
            chunk_size: default_chunk_size(),
            progress_interval_secs: default_progress_interval_secs(),
            retention_secs: default_retention_secs(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_initial_delay_ms: default_retry_initial_delay_ms(),
        }
    }
}

impl RelayConfig {
    /// Loads configuration from disk, or creates a default if not found.
    pub fn load() -> anyhow::Result<Self> {
        let path = config_path()?;

        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let config: RelayConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = RelayConfig::default();
            config.save()?;
            Ok(config)
        }
    }

    /// Saves the current configuration to disk.
    pub fn save(&self) -> anyhow::Result<()> {
        let path = config_path()?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Storage root with `~` expanded.
    pub fn storage_root_path(&self) -> PathBuf {
        if let Some(rest) = self.storage_root.strip_prefix("~/")
            && let Ok(home) = std::env::var("HOME")
        {
            return PathBuf::from(home).join(rest);
        }
        PathBuf::from(&self.storage_root)
    }

    /// Maps the file settings onto the coordinator's knobs.
    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            max_concurrent: self.max_concurrent,
            queue_bound: self.queue_bound,
            chunk_size: self.chunk_size,
            progress_interval: Duration::from_secs(self.progress_interval_secs),
            retention: Duration::from_secs(self.retention_secs),
            retry: RetryPolicy {
                max_attempts: self.retry_max_attempts,
                initial_delay: Duration::from_millis(self.retry_initial_delay_ms),
                ..RetryPolicy::default()
            },
        }
    }
}

fn config_path() -> anyhow::Result<PathBuf> {
    #[cfg(windows)]
    let base = PathBuf::from(std::env::var("APPDATA")?);
    #[cfg(not(windows))]
    let base = PathBuf::from(std::env::var("HOME")?).join(".config");

    Ok(base.join("stashbot").join("relayd.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let config: RelayConfig = toml::from_str("").unwrap();
        assert_eq!(config.bucket, "stashbot");
        assert_eq!(config.max_concurrent, 4);
        assert_eq!(config.queue_bound, 32);
        assert_eq!(config.chunk_size, 5 * 1024 * 1024);
        assert_eq!(config.progress_interval_secs, 1);
        assert_eq!(config.retry_max_attempts, 4);
    }

    #[test]
    fn partial_toml_overrides_defaults() {
        let config: RelayConfig = toml::from_str(
            r#"
            bucket = "archive"
            max_concurrent = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.bucket, "archive");
        assert_eq!(config.max_concurrent, 2);
        // Untouched fields keep their defaults.
        assert_eq!(config.queue_bound, 32);
    }

    #[test]
    fn roundtrips_through_toml() {
        let config = RelayConfig {
            bucket: "b".into(),
            max_concurrent: 7,
            ..RelayConfig::default()
        };
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: RelayConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.bucket, "b");
        assert_eq!(parsed.max_concurrent, 7);
    }

    #[test]
    fn coordinator_config_mapping() {
        let config = RelayConfig {
            max_concurrent: 2,
            queue_bound: 8,
            chunk_size: 1024,
            progress_interval_secs: 3,
            retention_secs: 60,
            retry_max_attempts: 6,
            retry_initial_delay_ms: 250,
            ..RelayConfig::default()
        };
        let cc = config.coordinator_config();
        assert_eq!(cc.max_concurrent, 2);
        assert_eq!(cc.queue_bound, 8);
        assert_eq!(cc.chunk_size, 1024);
        assert_eq!(cc.progress_interval, Duration::from_secs(3));
        assert_eq!(cc.retention, Duration::from_secs(60));
        assert_eq!(cc.retry.max_attempts, 6);
        assert_eq!(cc.retry.initial_delay, Duration::from_millis(250));
    }

    #[test]
    fn tilde_expansion_uses_home() {
        let config = RelayConfig {
            storage_root: "~/stash".into(),
            ..RelayConfig::default()
        };
        if let Ok(home) = std::env::var("HOME") {
            assert_eq!(config.storage_root_path(), PathBuf::from(home).join("stash"));
        }

        let absolute = RelayConfig {
            storage_root: "/var/lib/stashbot".into(),
            ..RelayConfig::default()
        };
        assert_eq!(
            absolute.storage_root_path(),
            PathBuf::from("/var/lib/stashbot")
        );
    }
}
