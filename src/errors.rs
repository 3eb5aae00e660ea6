// src/errors.rs

//! Crate-wide error type and result alias.
//!
//! Variants are grouped by *kind* rather than by call site so callers can
//! decide policy (fatal at startup, recorded and continued, ignored) with a
//! single `match`.

use thiserror::Error;

use crate::fetch::FetchError;

#[derive(Error, Debug)]
pub enum BackyError {
    #[error("no configuration file found (searched: {0})")]
    ConfigNotFound(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("{kind} {name} not found")]
    ReferenceMissing { kind: &'static str, name: String },

    #[error("proxy chain cycle detected involving host '{0}'")]
    ProxyCycle(String),

    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("connecting to host '{host}': {message}")]
    HostConnect { host: String, message: String },

    #[error("authentication failed for {user}@{host}")]
    Auth { host: String, user: String },

    #[error("command '{name}' failed: {message}")]
    CommandFailed { name: String, message: String },

    #[error("secret lookup for '{0}' failed")]
    Secret(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("operation was cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BackyError {
    pub fn missing(kind: &'static str, name: impl Into<String>) -> Self {
        BackyError::ReferenceMissing {
            kind,
            name: name.into(),
        }
    }

    /// Whether this error represents an orderly shutdown rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, BackyError::Cancelled)
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, BackyError>;
