//! # Configuration Module
//!
//! Locates the catalog database and loads runtime settings.
//!
//! ## Data Storage
//!
//! The catalog lives in the platform-standard data directory:
//! - Linux: `~/.local/share/mixmatch/catalog.db`
//! - macOS: `~/Library/Application Support/mixmatch/catalog.db`
//! - Windows: `%APPDATA%\mixmatch\catalog.db`
//!
//! `MIXMATCH_DB` overrides the database path.
//!
//! ## Settings File
//!
//! Optional JSON at `<config_dir>/mixmatch/config.json`. Every field may be
//! omitted:
//!
//! ```json
//! {
//!   "matching": { "worker_threads": 4, "min_overall_score": 0.2 },
//!   "feature_cache_ttl_secs": 30
//! }
//! ```

use crate::matching::MatchingConfig;
use anyhow::{Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_DIR: &str = "mixmatch";
const DB_FILE: &str = "catalog.db";
const CONFIG_FILE: &str = "config.json";

/// Environment variable overriding the database location.
pub const DB_ENV: &str = "MIXMATCH_DB";

/// Returns the mixmatch data directory, creating it if needed.
pub fn get_data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir().ok_or_else(|| {
        anyhow::anyhow!(
            "Could not determine system data directory. \
             Please ensure your platform supports standard data directories."
        )
    })?;

    ensure_app_dir(&data_dir)
}

/// `<base>/mixmatch`, created if missing.
fn ensure_app_dir(base: &Path) -> Result<PathBuf> {
    let app_dir = base.join(APP_DIR);
    fs::create_dir_all(&app_dir).with_context(|| {
        format!(
            "Failed to create data directory at {}. Please check file permissions.",
            app_dir.display()
        )
    })?;

    Ok(app_dir)
}

/// Returns the catalog database path, honouring [`DB_ENV`].
///
/// # Examples
///
/// ```no_run
/// use mixmatch::config::get_db_path;
///
/// let db_path = get_db_path()?;
/// println!("Database location: {}", db_path.display());
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn get_db_path() -> Result<PathBuf> {
    if let Some(path) = std::env::var_os(DB_ENV).filter(|p| !p.is_empty()) {
        debug!("Using database from {DB_ENV}");
        return Ok(PathBuf::from(path));
    }
    Ok(get_data_dir()?.join(DB_FILE))
}

/// Default settings file location. `None` when the platform has no config dir.
#[must_use]
pub fn get_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
}

/// Settings that shape matching at runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub matching: MatchingConfig,
    /// Lifetime of cached feature flags, in seconds.
    pub feature_cache_ttl_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            matching: MatchingConfig::default(),
            feature_cache_ttl_secs: crate::features::DEFAULT_CACHE_TTL.as_secs(),
        }
    }
}

impl RuntimeConfig {
    /// Load from the default settings file, or defaults when there is none.
    pub fn load() -> Result<Self> {
        match get_config_path() {
            Some(path) if path.exists() => Self::from_file(&path),
            _ => {
                debug!("No settings file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Invalid settings file {}", path.display()))?;
        config
            .matching
            .validate()
            .with_context(|| format!("Invalid settings file {}", path.display()))?;
        debug!("Loaded settings from {}", path.display());
        Ok(config)
    }

    #[must_use]
    pub fn feature_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.feature_cache_ttl_secs)
    }
}
