// src/fetch/cache.rs

//! Content-addressed on-disk cache for fetched sources.
//!
//! Layout of the cache directory (mode 0700):
//!
//! ```text
//! <dir>/index.yml              ordered list of {hash, path, type, source}
//! <dir>/<basename>-<sha256>    one data file per entry (mode 0644)
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::fetch::sha256_hex;

/// File name of the index inside the cache directory.
pub const INDEX_FILE: &str = "index.yml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub hash: String,
    pub path: PathBuf,
    #[serde(rename = "type")]
    pub kind: String,
    /// Origin URI the bytes were fetched from.
    #[serde(default)]
    pub source: String,
}

#[derive(Debug, Default)]
struct CacheState {
    /// Keyed by hash; `order` keeps insertion order for the persisted index.
    entries: BTreeMap<String, CacheEntry>,
    order: Vec<String>,
}

impl CacheState {
    fn snapshot(&self) -> Vec<CacheEntry> {
        self.order
            .iter()
            .filter_map(|hash| self.entries.get(hash).cloned())
            .collect()
    }
}

/// Directory-backed store keyed by SHA-256 of the content.
///
/// All operations go through `state`. `set` hands the index write over to
/// `persist` before releasing `state`, so index files are always written in
/// the same order as the mutations that produced them.
#[derive(Debug)]
pub struct Cache {
    dir: PathBuf,
    state: Mutex<CacheState>,
    persist: Mutex<()>,
}

impl Cache {
    /// Open the cache at `dir`, loading the index if it exists.
    ///
    /// The directory itself is only created on the first `set`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let cache = Self {
            dir: dir.into(),
            state: Mutex::new(CacheState::default()),
            persist: Mutex::new(()),
        };
        cache.load()?;
        Ok(cache)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }

    /// Load the index from disk, replacing the in-memory map.
    pub fn load(&self) -> Result<()> {
        let path = self.index_path();
        let mut state = self.lock_state()?;

        if !path.exists() {
            debug!(index = ?path, "no cache index yet; starting empty");
            *state = CacheState::default();
            return Ok(());
        }

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("reading cache index {:?}", path))?;
        let list: Vec<CacheEntry> = if contents.trim().is_empty() {
            Vec::new()
        } else {
            serde_yaml::from_str(&contents)
                .with_context(|| format!("parsing cache index {:?}", path))?
        };

        let mut fresh = CacheState::default();
        for entry in list {
            if fresh.entries.insert(entry.hash.clone(), entry.clone()).is_none() {
                fresh.order.push(entry.hash);
            }
        }
        debug!(entries = fresh.order.len(), "loaded cache index");
        *state = fresh;
        Ok(())
    }

    /// Return the bytes and metadata stored under `hash`.
    ///
    /// An index entry whose file vanished, or whose content no longer hashes
    /// to `hash`, is reported as absent.
    pub fn get(&self, hash: &str) -> Option<(Vec<u8>, CacheEntry)> {
        let entry = self.lock_state().ok()?.entries.get(hash)?.clone();

        let bytes = match fs::read(&entry.path) {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(hash, path = ?entry.path, error = %e, "cache entry file unreadable");
                return None;
            }
        };

        if sha256_hex(&bytes) != hash {
            warn!(hash, path = ?entry.path, "cache entry content does not match its hash");
            return None;
        }

        Some((bytes, entry))
    }

    /// Most recently stored entry for `source`, if any.
    pub fn lookup_source(&self, source: &str) -> Option<CacheEntry> {
        let state = self.lock_state().ok()?;
        state
            .order
            .iter()
            .rev()
            .filter_map(|hash| state.entries.get(hash))
            .find(|entry| entry.source == source)
            .cloned()
    }

    /// Store `bytes` under `hash` and persist the index.
    pub fn set(&self, source: &str, hash: &str, bytes: &[u8], kind: &str) -> Result<CacheEntry> {
        let mut state = self.lock_state()?;

        ensure_dir(&self.dir)?;

        let path = self.dir.join(format!("{}-{}", basename(source), hash));
        write_file(&path, bytes, 0o644)?;

        let entry = CacheEntry {
            hash: hash.to_string(),
            path,
            kind: kind.to_string(),
            source: source.to_string(),
        };
        if state.entries.insert(hash.to_string(), entry.clone()).is_none() {
            state.order.push(hash.to_string());
        }

        // Take the persist lock before giving up the state lock so that
        // snapshots reach the disk in mutation order.
        let _persist = self
            .persist
            .lock()
            .map_err(|_| anyhow!("cache persist lock poisoned"))?;
        let snapshot = state.snapshot();
        drop(state);

        self.write_index(&snapshot)?;
        debug!(source, hash, "cached fetched content");
        Ok(entry)
    }

    /// Serialize the index and write it atomically.
    pub fn save(&self) -> Result<()> {
        let state = self.lock_state()?;
        let _persist = self
            .persist
            .lock()
            .map_err(|_| anyhow!("cache persist lock poisoned"))?;
        let snapshot = state.snapshot();
        drop(state);
        self.write_index(&snapshot)
    }

    /// Number of entries currently indexed.
    pub fn len(&self) -> usize {
        self.lock_state().map(|s| s.order.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn write_index(&self, entries: &[CacheEntry]) -> Result<()> {
        ensure_dir(&self.dir)?;
        let yaml = serde_yaml::to_string(entries).context("serializing cache index")?;
        atomic_write(&self.index_path(), yaml.as_bytes())
    }

    fn lock_state(&self) -> Result<std::sync::MutexGuard<'_, CacheState>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("cache state lock poisoned"))
    }
}

/// Final path component of a source URI or path (`s3://b/dir/a.yml` -> `a.yml`).
pub fn basename(source: &str) -> String {
    let trimmed = source.trim_end_matches('/');
    let without_query = trimmed.split(['?', '#']).next().unwrap_or(trimmed);
    match without_query.rsplit('/').next() {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => "source".to_string(),
    }
}

fn ensure_dir(dir: &Path) -> Result<()> {
    if dir.is_dir() {
        return Ok(());
    }
    fs::create_dir_all(dir).with_context(|| format!("creating cache dir {:?}", dir))?;
    set_mode(dir, 0o700)
}

fn write_file(path: &Path, bytes: &[u8], mode: u32) -> Result<()> {
    let mut file =
        fs::File::create(path).with_context(|| format!("creating cache file {:?}", path))?;
    file.write_all(bytes)
        .with_context(|| format!("writing cache file {:?}", path))?;
    set_mode(path, mode)
}

/// Write `bytes` to a temp file next to `path`, then rename over it.
pub(crate) fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent).with_context(|| format!("creating dir {:?}", parent))?;

    let mut tmp = tempfile::NamedTempFile::new_in(&parent)
        .with_context(|| format!("creating temp file in {:?}", parent))?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    tmp.persist(path)
        .map_err(|e| anyhow!("replacing {:?}: {}", path, e.error))?;
    Ok(())
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .with_context(|| format!("setting mode {:o} on {:?}", mode, path))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}
