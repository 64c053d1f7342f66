//! Per-invocation wiring: config, store, backend, session manager.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use acctfleet_engine::backend::build_backend;
use acctfleet_engine::config::FleetConfig;
use acctfleet_engine::{FleetStore, SessionManager, SessionSettings, SqliteStore, StoreHandle};
use anyhow::Context as _;

use crate::cli::Cli;

const DEFAULT_CONFIG: &str = "acctfleet.toml";

pub struct AppContext {
    pub config: FleetConfig,
    pub store: StoreHandle,
    pub json: bool,
}

impl AppContext {
    pub fn open(cli: &Cli) -> anyhow::Result<Self> {
        let config = load_config(cli.config.as_deref())?;
        let path = db_path(cli.db.as_deref(), &config);
        let store: Arc<dyn FleetStore> = Arc::new(
            SqliteStore::open(&path)
                .with_context(|| format!("failed to open database {}", path.display()))?,
        );
        tracing::debug!(db = %path.display(), "store opened");
        Ok(Self {
            store: StoreHandle::new(store, config.dispatch.store_timeout()),
            config,
            json: cli.json,
        })
    }

    pub fn sessions(&self) -> Arc<SessionManager> {
        Arc::new(SessionManager::new(
            self.store.clone(),
            build_backend(&self.config.backend),
            SessionSettings::from(&self.config.dispatch),
        ))
    }
}

/// An explicit `--config` must exist; the default file is optional.
pub fn load_config(explicit: Option<&Path>) -> anyhow::Result<FleetConfig> {
    let config = match explicit {
        Some(path) => FleetConfig::load(path)?,
        None => FleetConfig::load_or_default(Path::new(DEFAULT_CONFIG))?,
    };
    Ok(config)
}

pub fn db_path(flag: Option<&Path>, config: &FleetConfig) -> PathBuf {
    flag.map(Path::to_path_buf)
        .unwrap_or_else(|| config.store.path.clone())
}

/// Relative-time helper: seconds -> human string.
pub fn relative_time(seconds: i64) -> String {
    let s = seconds.unsigned_abs();
    if s < 60 {
        "just now".to_string()
    } else if s < 3600 {
        format!("{}m ago", s / 60)
    } else if s < 86400 {
        format!("{}h ago", s / 3600)
    } else {
        format!("{}d ago", s / 86400)
    }
}

/// Print `value` as pretty JSON on stdout.
pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
