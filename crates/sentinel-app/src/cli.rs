//! CLI argument definitions for the Sentinel application.
//!
//! Uses `clap` with derive macros for ergonomic argument parsing.
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Sentinel: ingests financial filings and watches them for material risk.
#[derive(Parser, Debug)]
#[command(name = "sentinel", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Data directory for the SQLite metadata mirror.
    #[arg(short = 'd', long = "data-dir", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    /// Comma-separated tickers to monitor, replacing the configured list.
    #[arg(short = 'w', long = "watch", value_delimiter = ',', global = true)]
    pub watch: Vec<String>,

    /// Keep everything in memory and skip the SQLite mirror.
    #[arg(long = "in-memory", global = true)]
    pub in_memory: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// List the bundled mock filings.
    Demos,

    /// Ingest bundled filings, drain the watchdog, and print alerts as JSON.
    Simulate {
        /// Only ingest this filing (name with or without `.txt`).
        #[arg(long = "filing")]
        filing: Option<String>,
    },

    /// Ingest files from disk, optionally followed by a filtered query.
    Ingest {
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Ticker applied to every file, overriding resolution.
        #[arg(long = "ticker")]
        ticker: Option<String>,

        /// Source tag stored on each chunk.
        #[arg(long = "source", default_value = "cli")]
        source: String,

        /// Query text to run after ingesting.
        #[arg(long = "query")]
        query: Option<String>,

        /// Number of hits to return for `--query`.
        #[arg(long = "k", default_value_t = 5)]
        k: usize,

        /// Minimum salience for `--query` hits and `--list` rows.
        #[arg(long = "min-salience")]
        min_salience: Option<f64>,

        /// Print mirrored chunk metadata matching the filters, newest first.
        /// Needs the SQLite mirror.
        #[arg(long = "list")]
        list: bool,

        /// Row limit for `--list`.
        #[arg(long = "limit", default_value_t = 20)]
        limit: u64,
    },

    /// Feed bundled filings on a cadence while the watchdog runs, until Ctrl-C.
    Run {
        /// Seconds between bundled filing feeds. Zero disables feeding.
        #[arg(long = "feed-secs", default_value_t = 15)]
        feed_secs: u64,
    },
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > SENTINEL_CONFIG env var > ~/.sentinel/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("SENTINEL_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the data directory path.
    ///
    /// Returns `None` if not overridden (use config value).
    pub fn resolve_data_dir(&self) -> Option<String> {
        self.data_dir
            .as_ref()
            .map(|p| p.to_string_lossy().to_string())
    }

    /// Resolve the log level.
    ///
    /// Priority: --log-level flag > config file value.
    pub fn resolve_log_level(&self, config_level: &str) -> String {
        self.log_level
            .clone()
            .unwrap_or_else(|| config_level.to_string())
    }

    /// Resolve the watch-list. Returns `None` if not overridden.
    pub fn resolve_watch_list(&self) -> Option<Vec<String>> {
        let tickers: Vec<String> = self
            .watch
            .iter()
            .map(|t| t.trim().to_uppercase())
            .filter(|t| !t.is_empty())
            .collect();
        (!tickers.is_empty()).then_some(tickers)
    }
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".sentinel").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".sentinel").join("config.toml");
    }
    PathBuf::from("config.toml")
}
