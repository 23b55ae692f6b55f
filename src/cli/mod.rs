//! CLI argument definitions for bsync.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::models::Direction;

/// bsync - Inspect and rearrange backlog stories on a remote tracker.
///
/// Every command talks to the remote store configured via `base-url`
/// (see `bsync config list`).
#[derive(Parser, Debug)]
#[command(name = "bsync")]
#[command(author, version, about = "Keep a local mirror of backlog stories in sync with a remote tracker", long_about = None)]
pub struct Cli {
    /// Output in human-readable format instead of JSON
    #[arg(short = 'H', long = "human", global = true)]
    pub human_readable: bool,

    /// Root URL of the remote store (overrides config and BSYNC_BASE_URL)
    #[arg(long = "base-url", global = true)]
    pub base_url: Option<String>,

    /// Use this config.kdl instead of the default location.
    /// Can also be set via BSYNC_CONFIG environment variable.
    #[arg(long = "config", global = true, env = "BSYNC_CONFIG")]
    pub config_path: Option<PathBuf>,

    /// Apply responses even if a newer one for the same story was already applied
    #[arg(long = "keep-stale", global = true)]
    pub keep_stale: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show a story with its container, responsibles, tasks and metrics
    Show {
        /// Story ID
        id: String,
    },

    /// Refresh and show a story's effort metrics
    Metrics {
        /// Story ID
        id: String,
    },

    /// Rank a story over or under a sibling
    ///
    /// Without --backlog the story stays in its current container.
    Rank {
        /// Story ID to move
        id: String,
        /// over (above) or under (below)
        direction: Direction,
        /// Sibling story ID
        target: String,
        /// Destination backlog ID
        #[arg(long)]
        backlog: Option<String>,
        /// Kind of the destination backlog (iteration, product, project)
        #[arg(long, default_value = "iteration")]
        backlog_kind: String,
    },

    /// Move a story into another backlog
    Move {
        /// Story ID
        id: String,
        /// Destination backlog ID
        backlog: String,
        /// Kind of the destination backlog (iteration, product, project)
        #[arg(long, default_value = "iteration")]
        backlog_kind: String,
    },

    /// Delete a story
    Delete {
        /// Story ID
        id: String,
        /// Extra request parameter (key=value), may be repeated
        #[arg(long = "param", short = 'p')]
        params: Vec<String>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Get a configuration value with its source
    Get {
        /// Configuration key
        key: String,
    },

    /// Set a configuration value in config.kdl
    Set {
        /// Configuration key
        key: String,
        /// Configuration value
        value: String,
    },

    /// List all configuration values with their sources
    List,

    /// Print the location of config.kdl
    Path,
}
