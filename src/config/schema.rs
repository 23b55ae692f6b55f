//! KDL schema for config.kdl.
//!
//! This module provides:
//! - The Rust struct representing the KDL schema
//! - Serialization/deserialization to/from KDL format
//! - Validation
//! - Per-key updates for `bsync config set`

use kdl::{KdlDocument, KdlEntry, KdlNode, KdlValue};
use serde::{Deserialize, Serialize};

/// Allowed range for `feedback-history`.
pub const FEEDBACK_HISTORY_RANGE: std::ops::RangeInclusive<usize> = 1..=10_000;

/// Keys understood in config.kdl.
pub const CONFIG_KEYS: &[&str] = &[
    "base-url",
    "discard-stale-responses",
    "feedback-history",
    "output-format",
];

/// Output format preference for CLI commands.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// JSON output (default, machine-readable)
    #[default]
    Json,
    /// Human-readable output
    Human,
}

impl OutputFormat {
    /// Parse from string, case-insensitive.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "json" => Some(OutputFormat::Json),
            "human" => Some(OutputFormat::Human),
            _ => None,
        }
    }

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Human => "human",
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Settings stored in config.kdl.
///
/// # KDL Schema
///
/// ```kdl
/// base-url "https://tracker.example.com/app"
/// discard-stale-responses #true
/// feedback-history 100
/// output-format "human"  // or "json"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Root URL of the remote store
    pub base_url: Option<String>,

    /// Drop responses that arrive after a newer one for the same entity
    pub discard_stale_responses: Option<bool>,

    /// Number of feedback entries kept in history
    pub feedback_history: Option<usize>,

    /// Default output format for CLI commands
    pub output_format: Option<OutputFormat>,
}

impl SyncConfig {
    /// Create an empty config with no values set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the config values.
    ///
    /// Returns an error message if any value is invalid.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(ref url) = self.base_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(format!(
                    "base-url must start with http:// or https://, got '{}'",
                    url
                ));
            }
        }
        if let Some(history) = self.feedback_history {
            if !FEEDBACK_HISTORY_RANGE.contains(&history) {
                return Err(format!(
                    "feedback-history must be {}-{}, got {}",
                    FEEDBACK_HISTORY_RANGE.start(),
                    FEEDBACK_HISTORY_RANGE.end(),
                    history
                ));
            }
        }
        Ok(())
    }

    /// Parse config from a KDL document.
    ///
    /// Values of the wrong type are ignored.
    pub fn from_kdl(doc: &KdlDocument) -> Self {
        let mut config = Self::new();

        if let Some(value) = first_value(doc, "base-url") {
            if let Some(s) = value.as_string() {
                config.base_url = Some(s.to_string());
            }
        }

        if let Some(value) = first_value(doc, "discard-stale-responses") {
            config.discard_stale_responses = value.as_bool();
        }

        if let Some(value) = first_value(doc, "feedback-history") {
            if let Some(i) = value.as_integer() {
                config.feedback_history = usize::try_from(i).ok();
            }
        }

        if let Some(value) = first_value(doc, "output-format") {
            if let Some(s) = value.as_string() {
                config.output_format = OutputFormat::parse(s);
            }
        }

        config
    }

    /// Convert config to a KDL document.
    pub fn to_kdl(&self) -> KdlDocument {
        let mut doc = KdlDocument::new();

        if let Some(ref url) = self.base_url {
            push_node(&mut doc, "base-url", KdlValue::String(url.clone()));
        }

        if let Some(discard) = self.discard_stale_responses {
            push_node(&mut doc, "discard-stale-responses", KdlValue::Bool(discard));
        }

        if let Some(history) = self.feedback_history {
            push_node(&mut doc, "feedback-history", KdlValue::Integer(history as i128));
        }

        if let Some(ref format) = self.output_format {
            push_node(
                &mut doc,
                "output-format",
                KdlValue::String(format.as_str().to_string()),
            );
        }

        doc
    }

    /// Merge another config into this one.
    /// Values from `other` override values in `self` if they are Some.
    pub fn merge(&mut self, other: &SyncConfig) {
        if other.base_url.is_some() {
            self.base_url = other.base_url.clone();
        }
        if other.discard_stale_responses.is_some() {
            self.discard_stale_responses = other.discard_stale_responses;
        }
        if other.feedback_history.is_some() {
            self.feedback_history = other.feedback_history;
        }
        if other.output_format.is_some() {
            self.output_format = other.output_format.clone();
        }
    }

    /// Set one key from its textual form (as given to `bsync config set`).
    pub fn set_key(&mut self, key: &str, value: &str) -> Result<(), String> {
        match key {
            "base-url" => self.base_url = Some(value.to_string()),
            "discard-stale-responses" => {
                self.discard_stale_responses = Some(parse_bool(value).ok_or_else(|| {
                    format!("discard-stale-responses must be true or false, got '{}'", value)
                })?)
            }
            "feedback-history" => {
                self.feedback_history = Some(value.parse().map_err(|_| {
                    format!("feedback-history must be a number, got '{}'", value)
                })?)
            }
            "output-format" => {
                self.output_format = Some(OutputFormat::parse(value).ok_or_else(|| {
                    format!("output-format must be json or human, got '{}'", value)
                })?)
            }
            _ => {
                return Err(format!(
                    "Unknown config key '{}'. Valid keys: {}",
                    key,
                    CONFIG_KEYS.join(", ")
                ));
            }
        }
        self.validate()
    }
}

fn first_value<'a>(doc: &'a KdlDocument, name: &str) -> Option<&'a KdlValue> {
    doc.get(name)
        .and_then(|node| node.entries().first())
        .map(|entry| entry.value())
}

fn push_node(doc: &mut KdlDocument, name: &str, value: KdlValue) {
    let mut node = KdlNode::new(name);
    node.push(KdlEntry::new(value));
    doc.nodes_mut().push(node);
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}
