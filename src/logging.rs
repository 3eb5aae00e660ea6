// src/logging.rs

//! Logging setup for `backy` using `tracing` + `tracing-subscriber`.
//!
//! Priority for determining the log level:
//! 1. `--log-level` CLI flag (if provided)
//! 2. `BACKY_LOG` environment variable (e.g. "info", "debug")
//! 3. `logging.verbose` in the configuration document (debug)
//! 4. default to `info`
//!
//! Logs go to STDERR (unless `logging.console-disabled`) so that stdout stays
//! free for `version` output and echoed command output. `logging.file` adds a
//! plain-text file sink.

use std::fs::OpenOptions;
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

use crate::cli::LogLevel;
use crate::config::model::LoggingSection;

pub const LOG_ENV: &str = "BACKY_LOG";

/// Initialise global logging subscriber.
///
/// Safe to call once at startup.
pub fn init_logging(cli_level: Option<LogLevel>, section: &LoggingSection) -> Result<()> {
    let level = resolve_level(
        cli_level,
        std::env::var(LOG_ENV).ok().as_deref(),
        section.verbose,
    );

    let console = (!section.console_disabled).then(|| {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_writer(std::io::stderr)
    });

    let file = match &section.file {
        Some(path) => {
            let path = shellexpand::tilde(path).into_owned();
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("opening log file {path}"))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(true)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(LevelFilter::from_level(level))
        .with(console)
        .with(file)
        .try_init()
        .map_err(|e| anyhow!("initialising logging: {e}"))?;

    Ok(())
}

pub fn resolve_level(cli_level: Option<LogLevel>, env: Option<&str>, verbose: bool) -> tracing::Level {
    if let Some(lvl) = cli_level {
        return level_from_log_level(lvl);
    }
    if let Some(lvl) = env.and_then(parse_level_str) {
        return lvl;
    }
    if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    }
}

fn level_from_log_level(lvl: LogLevel) -> tracing::Level {
    match lvl {
        LogLevel::Error => tracing::Level::ERROR,
        LogLevel::Warn => tracing::Level::WARN,
        LogLevel::Info => tracing::Level::INFO,
        LogLevel::Debug => tracing::Level::DEBUG,
        LogLevel::Trace => tracing::Level::TRACE,
    }
}

fn parse_level_str(s: &str) -> Option<tracing::Level> {
    match s.trim().to_lowercase().as_str() {
        "error" => Some(tracing::Level::ERROR),
        "warn" | "warning" => Some(tracing::Level::WARN),
        "info" => Some(tracing::Level::INFO),
        "debug" => Some(tracing::Level::DEBUG),
        "trace" => Some(tracing::Level::TRACE),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_beats_env_beats_verbose() {
        assert_eq!(resolve_level(Some(LogLevel::Warn), Some("trace"), true), tracing::Level::WARN);
        assert_eq!(resolve_level(None, Some("trace"), true), tracing::Level::TRACE);
        assert_eq!(resolve_level(None, Some("bogus"), true), tracing::Level::DEBUG);
        assert_eq!(resolve_level(None, None, false), tracing::Level::INFO);
    }
}
