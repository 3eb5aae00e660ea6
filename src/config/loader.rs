// src/config/loader.rs

use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use tracing::{debug, info, warn};

use crate::config::catalog::{BuildOptions, Catalog, Selection, build_catalog};
use crate::config::env::EnvOverlay;
use crate::config::model::{GlobalSection, IncludeSpec, LoggingSection, RawDocument};
use crate::config::validate::check_required_keys;
use crate::errors::{BackyError, Result};
use crate::fetch::{CachedFetcher, FetchError, FetchOptions, Source};

/// File names probed in every search directory, in order.
pub const CONFIG_FILE_NAMES: &[&str] = &["backy.yml", "backy.yaml"];

/// Key marking a list of fragments to merge into a section.
pub const INCLUDE_KEY: &str = "$include";

/// Sections that may pull in remote fragments.
const INCLUDABLE_SECTIONS: &[&str] = &["cmd-configs", "hosts"];

/// Options for [`load_catalog`].
#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    /// Explicit primary document: a local path or a remote URI.
    pub config: Option<String>,
    /// Keep only lists with a cron expression.
    pub cron_mode: bool,
    pub selection: Selection,
}

impl ResolveOptions {
    pub fn with_config(mut self, config: impl Into<String>) -> Self {
        self.config = Some(config.into());
        self
    }

    pub fn cron_mode(mut self, cron_mode: bool) -> Self {
        self.cron_mode = cron_mode;
        self
    }

    pub fn with_selection(mut self, selection: Selection) -> Self {
        self.selection = selection;
        self
    }
}

/// Where the primary document lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrimaryLocation {
    Local(PathBuf),
    Remote(String),
}

impl PrimaryLocation {
    pub fn uri(&self) -> String {
        match self {
            PrimaryLocation::Local(path) => path.to_string_lossy().into_owned(),
            PrimaryLocation::Remote(uri) => uri.clone(),
        }
    }

    /// Directory holding the document (`.env` lives there).
    pub fn dir(&self) -> Option<PathBuf> {
        match self {
            PrimaryLocation::Local(path) => Some(
                path.parent()
                    .filter(|p| !p.as_os_str().is_empty())
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| PathBuf::from(".")),
            ),
            PrimaryLocation::Remote(_) => None,
        }
    }
}

/// Directories searched when no explicit path is given.
pub fn search_dirs() -> Vec<PathBuf> {
    let mut dirs = vec![PathBuf::from(".")];
    if let Some(config) = dirs::config_dir() {
        dirs.push(config.join("backy"));
    }
    if let Some(home) = dirs::home_dir() {
        dirs.push(home.join(".backy"));
    }
    dirs
}

/// Step 1: find the primary document.
pub fn locate(explicit: Option<&str>) -> Result<PrimaryLocation> {
    if let Some(explicit) = explicit {
        if Source::parse(explicit).is_remote() {
            return Ok(PrimaryLocation::Remote(explicit.to_string()));
        }
        let path = PathBuf::from(shellexpand::tilde(explicit).as_ref());
        if path.is_file() {
            return Ok(PrimaryLocation::Local(path));
        }
        return Err(BackyError::ConfigNotFound(format!(
            "{} does not exist or is not a file",
            path.display()
        )));
    }

    let dirs = search_dirs();
    for dir in &dirs {
        for name in CONFIG_FILE_NAMES {
            let candidate = dir.join(name);
            if candidate.is_file() {
                debug!(path = ?candidate, "found configuration document");
                return Ok(PrimaryLocation::Local(candidate));
            }
        }
    }

    let searched: Vec<String> = dirs.iter().map(|d| d.display().to_string()).collect();
    Err(BackyError::ConfigNotFound(format!(
        "no {} in {}",
        CONFIG_FILE_NAMES.join(" or "),
        searched.join(", ")
    )))
}

/// Sections read before full resolution (logging setup, cache location).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Preamble {
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub global: GlobalSection,
}

/// Read `logging` and `global` from a local primary document without
/// validating the rest. Anything unreadable yields defaults.
pub fn peek(explicit: Option<&str>) -> Preamble {
    let Ok(PrimaryLocation::Local(path)) = locate(explicit) else {
        return Preamble::default();
    };
    std::fs::read_to_string(&path)
        .ok()
        .and_then(|text| serde_yaml::from_str(&text).ok())
        .unwrap_or_default()
}

pub fn peek_logging(explicit: Option<&str>) -> LoggingSection {
    peek(explicit).logging
}

/// Resolve the primary document (and its fragments) into a [`Catalog`].
pub async fn load_catalog(opts: &ResolveOptions, fetcher: &CachedFetcher) -> Result<Catalog> {
    let location = locate(opts.config.as_deref())?;
    let uri = location.uri();
    info!(config = %uri, "loading configuration");

    let bytes = fetcher
        .fetch(&uri, &FetchOptions::default())
        .await
        .map_err(|e| BackyError::ConfigNotFound(e.to_string()))?;

    let env = match location.dir() {
        Some(dir) => EnvOverlay::load(&dir)?,
        None => EnvOverlay::default(),
    };

    let doc = parse_document(&bytes, fetcher).await?;

    let build = BuildOptions {
        cron_mode: opts.cron_mode,
        selection: opts.selection.clone(),
    };
    build_catalog(doc, env, location.dir(), &build)
}

/// Steps 3 and 4: required keys, fragment merge, typed parse.
pub async fn parse_document(bytes: &[u8], fetcher: &CachedFetcher) -> Result<RawDocument> {
    let mut root: Value = serde_yaml::from_slice(bytes)?;
    check_required_keys(&root)?;

    if let Some(map) = root.as_mapping_mut() {
        for section in INCLUDABLE_SECTIONS {
            if let Some(value) = map.get_mut(*section) {
                expand_includes(section, value, fetcher).await?;
            }
        }
    }

    Ok(serde_yaml::from_value(root)?)
}

async fn expand_includes(section: &str, value: &mut Value, fetcher: &CachedFetcher) -> Result<()> {
    let Some(map) = value.as_mapping_mut() else {
        return Ok(());
    };
    let Some(includes) = map.remove(INCLUDE_KEY) else {
        return Ok(());
    };

    let specs: Vec<IncludeSpec> = serde_yaml::from_value(includes)?;
    for spec in specs {
        let Some(fragment) = load_fragment(&spec, fetcher).await? else {
            continue;
        };
        let Value::Mapping(fragment) = fragment else {
            return Err(BackyError::ConfigError(format!(
                "fragment {} for `{section}` is not a mapping",
                spec.source
            )));
        };
        debug!(section, source = %spec.source, keys = fragment.len(), "merging fragment");
        merge_mapping(map, fragment);
    }
    Ok(())
}

async fn load_fragment(spec: &IncludeSpec, fetcher: &CachedFetcher) -> Result<Option<Value>> {
    let mut opts = FetchOptions::default().ignore_not_found(spec.ignore_not_found);
    if let Some(kind) = &spec.file_type {
        opts = opts.with_file_type(kind.clone());
    }

    match fetcher.fetch(&spec.source, &opts).await {
        Ok(bytes) => Ok(Some(serde_yaml::from_slice(&bytes)?)),
        Err(FetchError::NotFound(source)) => {
            warn!(source = %source, "fragment not found; skipping");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// Recursive merge; `overlay` wins on conflicting scalars and sequences.
pub fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base), Value::Mapping(overlay)) => merge_mapping(base, overlay),
        (base, overlay) => *base = overlay,
    }
}

fn merge_mapping(base: &mut Mapping, overlay: Mapping) {
    for (key, value) in overlay {
        match base.get_mut(&key) {
            Some(existing) => deep_merge(existing, value),
            None => {
                base.insert(key, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deep_merge_prefers_overlay_and_keeps_base_keys() {
        let mut base: Value = serde_yaml::from_str("a: {x: 1, y: 2}\nb: [1]\n").unwrap();
        let overlay: Value = serde_yaml::from_str("a: {y: 3, z: 4}\nb: [2]\n").unwrap();
        deep_merge(&mut base, overlay);

        let expected: Value = serde_yaml::from_str("a: {x: 1, y: 3, z: 4}\nb: [2]\n").unwrap();
        assert_eq!(base, expected);
    }

    #[test]
    fn remote_dir_is_none() {
        let loc = PrimaryLocation::Remote("https://example.com/backy.yml".into());
        assert_eq!(loc.dir(), None);
        let loc = PrimaryLocation::Local(PathBuf::from("backy.yml"));
        assert_eq!(loc.dir(), Some(PathBuf::from(".")));
    }
}
