//! CLI argument parsing

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};
use serde_json::Value;

/// Inspect and edit a livecfg configuration file
#[derive(Parser, Debug)]
#[command(name = "livecfg")]
#[command(about = "Inspect and edit a livecfg configuration file")]
#[command(version)]
pub struct Cli {
    /// Configuration file to operate on
    ///
    /// Defaults to config.json under $LIVECFG_CONFIG_DIR, or under the
    /// platform config directory when that is unset.
    #[arg(long, global = true, env = "LIVECFG_CONFIG")]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the value at a dot-path key
    Get {
        /// Dot-path key, e.g. audio.sample_rate
        key: String,
    },

    /// Set a value and save
    Set {
        /// Dot-path key
        key: String,

        /// Value, parsed as JSON and otherwise taken as a string
        value: String,

        /// Defer the save through the debounce timer (milliseconds)
        #[arg(long)]
        defer_ms: Option<u64>,
    },

    /// Remove a key and save
    #[command(alias = "rm")]
    Unset {
        /// Dot-path key
        key: String,
    },

    /// Print the whole configuration
    Show,

    /// Export the configuration to a versioned file
    Export {
        /// Destination file
        path: PathBuf,
    },

    /// Replace the configuration with an exported file
    Import {
        /// Source file (export envelope or bare JSON object)
        path: PathBuf,
    },

    /// Write a timestamped backup
    Backup,

    /// List backups, newest first
    Backups,

    /// Restore a backup file
    Restore {
        /// Backup file
        path: PathBuf,
    },

    /// Reset the configuration to defaults
    Reset,
}

/// Parse a command-line value as JSON, falling back to a plain string
pub fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
