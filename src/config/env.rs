// src/config/env.rs

//! Environment overlay loaded from the `.env` next to the primary document,
//! plus dotenv parsing for per-command env files.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

/// Process-wide overlay used to expand `$VAR` / `${VAR}` in inline
/// environment entries. Built once, read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct EnvOverlay {
    vars: BTreeMap<String, String>,
}

impl EnvOverlay {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Load `<dir>/.env`; a missing file yields an empty overlay.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(".env");
        if !path.is_file() {
            debug!(path = ?path, "no .env overlay");
            return Ok(Self::default());
        }

        let bytes =
            std::fs::read(&path).with_context(|| format!("reading env overlay {:?}", path))?;
        let pairs = parse_dotenv(&bytes).with_context(|| format!("parsing {:?}", path))?;
        debug!(path = ?path, vars = pairs.len(), "loaded .env overlay");
        Ok(Self::from_pairs(pairs))
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Expand `$NAME` and `${NAME}`; unknown names expand to the empty string.
    pub fn expand(&self, input: &str) -> String {
        shellexpand::env_with_context_no_errors(input, |name: &str| {
            Some(self.get(name).unwrap_or_default().to_string())
        })
        .into_owned()
    }
}

/// Parse dotenv-formatted bytes into ordered `(key, value)` pairs.
pub fn parse_dotenv(bytes: &[u8]) -> Result<Vec<(String, String)>> {
    dotenvy::from_read_iter(bytes)
        .map(|item| item.map_err(anyhow::Error::from))
        .collect()
}

/// Split an inline `KEY=value` entry.
pub fn split_assignment(entry: &str) -> Option<(&str, &str)> {
    let (key, value) = entry.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key, value))
}
