//! Configuration for backlog-sync.
//!
//! ## config.kdl
//!
//! Located at `$XDG_CONFIG_HOME/backlog-sync/config.kdl`, or wherever the
//! `BSYNC_CONFIG` environment variable points.
//!
//! Contains:
//! - `base-url` - Root URL of the remote store
//! - `discard-stale-responses` - Drop out-of-order responses (default #true)
//! - `feedback-history` - Feedback entries kept in memory (1-10000)
//! - `output-format` - "json" or "human"
//!
//! ## Precedence
//!
//! CLI flag > environment (`BSYNC_BASE_URL`) > config.kdl > defaults
//!
//! Use the [`resolver`] module for precedence resolution.

pub mod resolver;
pub mod schema;

use std::fs;
use std::path::{Path, PathBuf};

use kdl::KdlDocument;

use crate::{Error, Result};

pub use resolver::{
    BASE_URL_ENV, ConfigOverrides, Resolved, ResolvedConfig, ValueSource, resolve_config,
    resolve_with,
};
pub use schema::{CONFIG_KEYS, OutputFormat, SyncConfig};

/// Environment variable overriding the config file location.
pub const CONFIG_PATH_ENV: &str = "BSYNC_CONFIG";

/// Location of config.kdl.
///
/// Returns `None` if neither `BSYNC_CONFIG` is set nor a config directory
/// can be determined.
pub fn config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }
    dirs::config_dir().map(|dir| dir.join("backlog-sync").join("config.kdl"))
}

/// Read config.kdl. A missing file yields an empty config.
pub fn read_config(path: &Path) -> Result<SyncConfig> {
    if !path.exists() {
        return Ok(SyncConfig::default());
    }
    let content = fs::read_to_string(path)?;
    let doc: KdlDocument = content
        .parse()
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
    let config = SyncConfig::from_kdl(&doc);
    config
        .validate()
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
    Ok(config)
}

/// Validate and write config.kdl, creating parent directories.
pub fn write_config(path: &Path, config: &SyncConfig) -> Result<()> {
    config.validate().map_err(Error::Config)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, config.to_kdl().to_string())?;
    Ok(())
}
