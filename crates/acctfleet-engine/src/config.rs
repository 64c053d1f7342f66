//! TOML configuration with per-field defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use acctfleet_core::ingest::MAX_RECORDS_PER_CALL;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound for the dispatch worker pool.
pub const MAX_CONCURRENCY: usize = 64;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub store: StoreConfig,
    pub ingest: IngestConfig,
    pub dispatch: DispatchConfig,
    pub backend: BackendConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("acctfleet.db"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Records persisted per store transaction.
    pub batch_size: usize,
    /// Per-call record cap; never above [`MAX_RECORDS_PER_CALL`].
    pub max_records: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_records: MAX_RECORDS_PER_CALL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub concurrency: usize,
    pub login_timeout_secs: u64,
    pub send_timeout_secs: u64,
    /// Bound on confirming a cached session with the backend.
    pub verify_timeout_secs: u64,
    pub store_timeout_secs: u64,
    /// Ask the backend to confirm a cached session before reusing it.
    pub verify_cached_sessions: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            login_timeout_secs: 90,
            send_timeout_secs: 60,
            verify_timeout_secs: 30,
            store_timeout_secs: 10,
            verify_cached_sessions: false,
        }
    }
}

impl DispatchConfig {
    pub fn login_timeout(&self) -> Duration {
        Duration::from_secs(self.login_timeout_secs)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }

    pub fn verify_timeout(&self) -> Duration {
        Duration::from_secs(self.verify_timeout_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    Simulated,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub kind: BackendKind,
    pub latency_ms: u64,
}

impl FleetConfig {
    /// Parse and validate a TOML document. Missing keys take defaults.
    pub fn from_toml(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    /// Load `path` when it exists, defaults otherwise.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ingest.batch_size == 0 {
            return Err(invalid("ingest.batch_size", "must be at least 1"));
        }
        if self.ingest.max_records == 0 || self.ingest.max_records > MAX_RECORDS_PER_CALL {
            return Err(invalid(
                "ingest.max_records",
                format!("must be between 1 and {MAX_RECORDS_PER_CALL}"),
            ));
        }
        let timeouts = [
            ("dispatch.login_timeout_secs", self.dispatch.login_timeout_secs),
            ("dispatch.send_timeout_secs", self.dispatch.send_timeout_secs),
            ("dispatch.verify_timeout_secs", self.dispatch.verify_timeout_secs),
            ("dispatch.store_timeout_secs", self.dispatch.store_timeout_secs),
        ];
        for (field, secs) in timeouts {
            if secs == 0 {
                return Err(invalid(field, "must be at least 1 second"));
            }
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// Clamp a requested worker count into `1..=MAX_CONCURRENCY`.
pub fn clamp_concurrency(requested: usize) -> usize {
    requested.clamp(1, MAX_CONCURRENCY)
}
