//! Precedence resolution for configuration.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. CLI flags (passed at runtime)
//! 2. `BSYNC_BASE_URL` environment variable (base URL only)
//! 3. config.kdl
//! 4. Built-in defaults

use std::path::Path;

use crate::Result;
use crate::config::{OutputFormat, SyncConfig, config_path, read_config};
use crate::feedback::DEFAULT_HISTORY_LIMIT;
use crate::sync::EngineConfig;

/// Environment variable name for the base URL override.
pub const BASE_URL_ENV: &str = "BSYNC_BASE_URL";

/// Tracks where a resolved value came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueSource {
    /// Value from environment variable
    EnvVar(String),
    /// Value from config.kdl at the given path
    ConfigFile(String),
    /// Value from CLI flag
    CliFlag,
    /// Built-in default value
    Default,
}

impl std::fmt::Display for ValueSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueSource::EnvVar(name) => write!(f, "env:{}", name),
            ValueSource::ConfigFile(path) => write!(f, "file:{}", path),
            ValueSource::CliFlag => write!(f, "cli"),
            ValueSource::Default => write!(f, "default"),
        }
    }
}

/// A resolved value with its source.
#[derive(Debug, Clone)]
pub struct Resolved<T> {
    /// The resolved value
    pub value: T,
    /// Where the value came from
    pub source: ValueSource,
}

impl<T> Resolved<T> {
    /// Create a new resolved value.
    pub fn new(value: T, source: ValueSource) -> Self {
        Self { value, source }
    }
}

/// Fully resolved configuration with source tracking.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Root URL of the remote store (no default)
    pub base_url: Option<Resolved<String>>,
    pub discard_stale_responses: Resolved<bool>,
    pub feedback_history: Resolved<usize>,
    pub output_format: Resolved<OutputFormat>,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            discard_stale_responses: Resolved::new(true, ValueSource::Default),
            feedback_history: Resolved::new(DEFAULT_HISTORY_LIMIT, ValueSource::Default),
            output_format: Resolved::new(OutputFormat::Json, ValueSource::Default),
        }
    }
}

impl ResolvedConfig {
    /// Get the base URL, if set.
    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_ref().map(|r| r.value.as_str())
    }

    pub fn output_format(&self) -> &OutputFormat {
        &self.output_format.value
    }

    /// Engine settings derived from this configuration.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            discard_stale_responses: self.discard_stale_responses.value,
        }
    }

    /// Key/value/source triples for display.
    pub fn entries(&self) -> Vec<(&'static str, String, String)> {
        let mut entries = Vec::new();
        match &self.base_url {
            Some(url) => entries.push(("base-url", url.value.clone(), url.source.to_string())),
            None => entries.push(("base-url", String::new(), "unset".to_string())),
        }
        entries.push((
            "discard-stale-responses",
            self.discard_stale_responses.value.to_string(),
            self.discard_stale_responses.source.to_string(),
        ));
        entries.push((
            "feedback-history",
            self.feedback_history.value.to_string(),
            self.feedback_history.source.to_string(),
        ));
        entries.push((
            "output-format",
            self.output_format.value.to_string(),
            self.output_format.source.to_string(),
        ));
        entries
    }
}

/// CLI overrides for configuration resolution.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub base_url: Option<String>,
    pub discard_stale_responses: Option<bool>,
    pub output_format: Option<OutputFormat>,
}

impl ConfigOverrides {
    /// Create empty overrides.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_discard_stale_responses(mut self, discard: bool) -> Self {
        self.discard_stale_responses = Some(discard);
        self
    }

    pub fn with_output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = Some(format);
        self
    }
}

/// Resolve configuration from the environment and config.kdl.
///
/// Reads `BSYNC_BASE_URL` and the file at [`config_path`], or at
/// `path_override` when given.
pub fn resolve_config(
    path_override: Option<&Path>,
    overrides: &ConfigOverrides,
) -> Result<ResolvedConfig> {
    let path = path_override.map(Path::to_path_buf).or_else(config_path);
    let (file_config, file_label) = match path {
        Some(path) => (read_config(&path)?, path.display().to_string()),
        None => (SyncConfig::default(), String::new()),
    };
    let env_base_url = std::env::var(BASE_URL_ENV).ok().filter(|v| !v.is_empty());
    Ok(resolve_with(&file_config, &file_label, env_base_url, overrides))
}

/// Resolve configuration from already-loaded sources.
pub fn resolve_with(
    file_config: &SyncConfig,
    file_label: &str,
    env_base_url: Option<String>,
    overrides: &ConfigOverrides,
) -> ResolvedConfig {
    let mut result = ResolvedConfig::default();
    let from_file = || ValueSource::ConfigFile(file_label.to_string());

    // Resolve base_url
    if let Some(ref url) = overrides.base_url {
        result.base_url = Some(Resolved::new(url.clone(), ValueSource::CliFlag));
    } else if let Some(url) = env_base_url {
        result.base_url = Some(Resolved::new(
            url,
            ValueSource::EnvVar(BASE_URL_ENV.to_string()),
        ));
    } else if let Some(ref url) = file_config.base_url {
        result.base_url = Some(Resolved::new(url.clone(), from_file()));
    }
    // else: remains None (no default for base_url)

    // Resolve discard_stale_responses
    if let Some(discard) = overrides.discard_stale_responses {
        result.discard_stale_responses = Resolved::new(discard, ValueSource::CliFlag);
    } else if let Some(discard) = file_config.discard_stale_responses {
        result.discard_stale_responses = Resolved::new(discard, from_file());
    }

    // Resolve feedback_history (file only)
    if let Some(history) = file_config.feedback_history {
        result.feedback_history = Resolved::new(history, from_file());
    }

    // Resolve output_format
    if let Some(ref format) = overrides.output_format {
        result.output_format = Resolved::new(format.clone(), ValueSource::CliFlag);
    } else if let Some(ref format) = file_config.output_format {
        result.output_format = Resolved::new(format.clone(), from_file());
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::write_config;
    use serial_test::serial;
    use tempfile::TempDir;

    fn file_config() -> SyncConfig {
        SyncConfig {
            base_url: Some("http://file.example.com".to_string()),
            discard_stale_responses: Some(false),
            feedback_history: Some(42),
            output_format: Some(OutputFormat::Human),
        }
    }

    // ==================== ValueSource Tests ====================

    #[test]
    fn test_value_source_display() {
        assert_eq!(
            format!("{}", ValueSource::EnvVar("FOO".to_string())),
            "env:FOO"
        );
        assert_eq!(
            format!("{}", ValueSource::ConfigFile("/tmp/config.kdl".to_string())),
            "file:/tmp/config.kdl"
        );
        assert_eq!(format!("{}", ValueSource::CliFlag), "cli");
        assert_eq!(format!("{}", ValueSource::Default), "default");
    }

    // ==================== Resolution Tests ====================

    #[test]
    fn test_resolve_defaults() {
        let config = resolve_with(&SyncConfig::default(), "", None, &ConfigOverrides::new());

        assert!(config.base_url.is_none());
        assert!(config.discard_stale_responses.value);
        assert_eq!(config.discard_stale_responses.source, ValueSource::Default);
        assert_eq!(config.feedback_history.value, DEFAULT_HISTORY_LIMIT);
        assert_eq!(*config.output_format(), OutputFormat::Json);
    }

    #[test]
    fn test_resolve_from_file() {
        let config = resolve_with(&file_config(), "cfg.kdl", None, &ConfigOverrides::new());

        assert_eq!(config.base_url(), Some("http://file.example.com"));
        assert_eq!(
            config.base_url.as_ref().unwrap().source,
            ValueSource::ConfigFile("cfg.kdl".to_string())
        );
        assert!(!config.engine_config().discard_stale_responses);
        assert_eq!(config.feedback_history.value, 42);
        assert_eq!(*config.output_format(), OutputFormat::Human);
    }

    #[test]
    fn test_env_overrides_file() {
        let config = resolve_with(
            &file_config(),
            "cfg.kdl",
            Some("http://env.example.com".to_string()),
            &ConfigOverrides::new(),
        );
        assert_eq!(config.base_url(), Some("http://env.example.com"));
        assert_eq!(
            config.base_url.unwrap().source,
            ValueSource::EnvVar(BASE_URL_ENV.to_string())
        );
    }

    #[test]
    fn test_cli_overrides_everything() {
        let overrides = ConfigOverrides::new()
            .with_base_url("http://cli.example.com")
            .with_discard_stale_responses(true)
            .with_output_format(OutputFormat::Json);
        let config = resolve_with(
            &file_config(),
            "cfg.kdl",
            Some("http://env.example.com".to_string()),
            &overrides,
        );

        assert_eq!(config.base_url(), Some("http://cli.example.com"));
        assert_eq!(config.base_url.as_ref().unwrap().source, ValueSource::CliFlag);
        assert!(config.discard_stale_responses.value);
        assert_eq!(*config.output_format(), OutputFormat::Json);
    }

    #[test]
    fn test_entries_for_display() {
        let config = resolve_with(&SyncConfig::default(), "", None, &ConfigOverrides::new());
        let entries = config.entries();
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0], ("base-url", String::new(), "unset".to_string()));
    }

    #[test]
    #[serial]
    fn test_resolve_config_reads_env_and_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.kdl");
        write_config(&path, &file_config()).unwrap();

        // SAFETY: serialized with other environment-mutating tests
        unsafe { std::env::set_var(BASE_URL_ENV, "http://env.example.com") };
        let config = resolve_config(Some(&path), &ConfigOverrides::new()).unwrap();
        unsafe { std::env::remove_var(BASE_URL_ENV) };

        assert_eq!(config.base_url(), Some("http://env.example.com"));
        assert_eq!(config.feedback_history.value, 42);
    }
}
