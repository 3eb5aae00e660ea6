// src/secrets.rs

//! Secret resolution for `vault:<path>` tokens.
//!
//! The secret store itself is an external collaborator; everything in the
//! crate goes through [`SecretResolver`] and never sees the transport.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use tracing::debug;

use crate::errors::{BackyError, Result};

/// Prefix marking a value as a secret token.
pub const SECRET_PREFIX: &str = "vault:";

pub trait SecretResolver: Send + Sync {
    /// Return the plaintext stored at `path`.
    fn lookup(&self, path: &str) -> Result<String>;
}

/// Resolve `value` if it is a `vault:<path>` token, otherwise return it as is.
pub fn resolve_value(resolver: &dyn SecretResolver, value: &str) -> Result<String> {
    match value.strip_prefix(SECRET_PREFIX) {
        Some(path) => {
            debug!(path, "resolving secret token");
            resolver.lookup(path.trim())
        }
        None => Ok(value.to_string()),
    }
}

pub fn is_secret_token(value: &str) -> bool {
    value.starts_with(SECRET_PREFIX)
}

/// Resolver used when no secret store is configured: every token fails.
#[derive(Debug, Clone, Default)]
pub struct NoSecrets;

impl SecretResolver for NoSecrets {
    fn lookup(&self, path: &str) -> Result<String> {
        Err(BackyError::Secret(path.to_string()))
    }
}

/// In-memory secret map, optionally loaded from a YAML `path: value` file.
#[derive(Debug, Clone, Default)]
pub struct StaticSecrets {
    values: HashMap<String, String>,
}

impl StaticSecrets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, path: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(path.into(), value.into());
        self
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading secrets file {:?}", path))?;
        let values: HashMap<String, String> = serde_yaml::from_str(&contents)?;
        Ok(Self { values })
    }
}

impl SecretResolver for StaticSecrets {
    fn lookup(&self, path: &str) -> Result<String> {
        self.values
            .get(path)
            .cloned()
            .ok_or_else(|| BackyError::Secret(path.to_string()))
    }
}
