// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Command-line arguments for `backy`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "backy",
    version,
    about = "Run named commands and command lists locally or over SSH, on demand or on a cron schedule.",
    long_about = None
)]
pub struct CliArgs {
    /// Configuration document: a local path or an http(s):// / s3:// URI.
    ///
    /// Default: search `.`, `<config dir>/backy` and `~/.backy` for
    /// `backy.yml` or `backy.yaml`.
    #[arg(short = 'f', long, global = true, value_name = "PATH")]
    pub config: Option<String>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `BACKY_LOG`, then `logging.verbose`, decide.
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// YAML file mapping secret paths to values, used for `vault:` tokens.
    #[arg(long, global = true, value_name = "PATH")]
    pub secrets: Option<PathBuf>,

    /// Directory for cached remote fragments and scripts.
    #[arg(long, global = true, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Metrics file, saved after every list run.
    #[arg(long, global = true, value_name = "PATH")]
    pub metrics: Option<PathBuf>,

    /// Maximum number of commands running at the same time.
    #[arg(long, global = true, value_name = "N")]
    pub max_concurrency: Option<usize>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// Print the version.
    Version {
        /// Print only the version number.
        #[arg(long, conflicts_with = "vpre")]
        num: bool,

        /// Print the version number prefixed with `v`.
        #[arg(long)]
        vpre: bool,
    },

    /// Run a command list or individual commands.
    Run {
        #[command(subcommand)]
        target: RunTarget,
    },

    /// Run every list with a cron expression until interrupted.
    Cron,

    /// Resolve and validate the configuration without running anything.
    Validate,
}

#[derive(Debug, Clone, Subcommand)]
pub enum RunTarget {
    /// Run one command list.
    List {
        name: String,

        /// Run the list on these hosts instead of each command's own host.
        #[arg(long, num_args = 1.., value_delimiter = ',', value_name = "ALIAS")]
        hosts: Vec<String>,
    },

    /// Run commands in the given order.
    Cmds {
        #[arg(required = true)]
        names: Vec<String>,

        /// Run the commands on these hosts instead of each command's own host.
        #[arg(long, num_args = 1.., value_delimiter = ',', value_name = "ALIAS")]
        hosts: Vec<String>,
    },
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
