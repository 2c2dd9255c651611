//! Command-line arguments
//!
//! Every option is optional so that values missing on the command line can
//! fall back to the configuration file.

use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "queue-agent")]
#[command(about = "Snapshot and trim ordered dynamic-table queues")]
#[command(version)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long = "config-file", value_name = "FILE")]
    pub config_file: Option<PathBuf>,

    /// Cluster fixture describing tables, queues and consumers
    #[arg(short = 'k', long = "cluster-file", value_name = "FILE")]
    pub cluster_file: Option<PathBuf>,

    /// Run this many passes and exit instead of running until interrupted
    #[arg(short = 'n', long = "passes", value_name = "COUNT")]
    pub passes: Option<u32>,

    /// Run controllers as followers: build snapshots, never trim
    #[arg(long = "follower")]
    pub follower: bool,

    /// Force coloured log output
    #[arg(long = "color", conflicts_with = "no_color")]
    pub color: bool,

    /// Disable coloured log output
    #[arg(long = "no-color", conflicts_with = "color")]
    pub no_color: bool,

    /// Log level
    #[arg(short = 'l', long = "log-level", value_name = "LEVEL", value_parser = ["trace", "debug", "info", "warn", "error", "off"])]
    pub log_level: Option<String>,

    /// Log output format
    #[arg(short = 'o', long = "log-format", value_name = "FORMAT", value_parser = ["text", "ext", "json"])]
    pub log_format: Option<String>,

    /// Log file path
    #[arg(short = 'f', long = "log-file", value_name = "FILE")]
    pub log_file: Option<PathBuf>,
}

impl Args {
    /// `--color`/`--no-color` win, then the config file, then whether
    /// stdout is a terminal
    pub fn use_color(&self, configured: Option<bool>) -> bool {
        if self.no_color {
            false
        } else if self.color {
            true
        } else {
            configured.unwrap_or_else(|| std::io::stdout().is_terminal())
        }
    }
}
