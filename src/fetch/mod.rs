// src/fetch/mod.rs

//! Remote fetch layer.
//!
//! - [`Fetcher`] retrieves raw bytes for a source URI. The dialect is picked by
//!   prefix: `http://` / `https://`, `s3://bucket/key`, anything else is a
//!   local path.
//! - [`cache`] persists fetched bytes under their SHA-256.
//! - [`CachedFetcher`] combines both and is what the config resolver and the
//!   executor use for fragments, script files and script env files.

pub mod cache;
pub mod http;
pub mod object_store;

use std::collections::HashMap;
use std::io::ErrorKind;
use std::sync::{Arc, Mutex};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};

use self::cache::Cache;
use self::http::HttpClient;
use self::object_store::{ObjectStoreClient, ObjectStoreError};

#[derive(Error, Debug, Clone)]
pub enum FetchError {
    /// Only produced when the caller opted into `ignore_not_found`.
    #[error("source not found: {0}")]
    NotFound(String),

    /// A required source is missing at the origin. Never served from cache.
    #[error("fetching {uri}: {message}")]
    Missing { uri: String, message: String },

    #[error("fetching {uri}: {message}")]
    Transport { uri: String, message: String },
}

impl FetchError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, FetchError::NotFound(_))
    }
}

/// Per-call fetch options.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Hint for later parsing; recorded as the cache entry type.
    pub file_type: String,
    /// Report missing sources as [`FetchError::NotFound`].
    pub ignore_not_found: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            file_type: "yaml".to_string(),
            ignore_not_found: false,
        }
    }
}

impl FetchOptions {
    pub fn with_file_type(mut self, file_type: impl Into<String>) -> Self {
        self.file_type = file_type.into();
        self
    }

    pub fn ignore_not_found(mut self, ignore: bool) -> Self {
        self.ignore_not_found = ignore;
        self
    }
}

/// Source dialect selected from a URI prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source<'a> {
    Http(&'a str),
    ObjectStore { bucket: &'a str, key: &'a str },
    Local(&'a str),
}

impl<'a> Source<'a> {
    pub fn parse(uri: &'a str) -> Self {
        if uri.starts_with("http://") || uri.starts_with("https://") {
            return Source::Http(uri);
        }
        if let Some(rest) = uri.strip_prefix("s3://") {
            let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
            return Source::ObjectStore {
                bucket,
                key: key.trim_start_matches('/'),
            };
        }
        Source::Local(uri)
    }

    pub fn is_remote(&self) -> bool {
        !matches!(self, Source::Local(_))
    }
}

/// SHA-256 of `bytes` as lowercase hex.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Retrieves raw bytes for a source URI using injected transports.
#[derive(Clone)]
pub struct Fetcher {
    http: Arc<dyn HttpClient>,
    object_store: Option<Arc<dyn ObjectStoreClient>>,
}

impl std::fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fetcher")
            .field("object_store", &self.object_store.is_some())
            .finish_non_exhaustive()
    }
}

impl Fetcher {
    pub fn new(http: Arc<dyn HttpClient>, object_store: Option<Arc<dyn ObjectStoreClient>>) -> Self {
        Self { http, object_store }
    }

    pub async fn fetch(&self, uri: &str, opts: &FetchOptions) -> Result<Vec<u8>, FetchError> {
        let not_found = |what: String| {
            if opts.ignore_not_found {
                FetchError::NotFound(uri.to_string())
            } else {
                FetchError::Missing {
                    uri: uri.to_string(),
                    message: what,
                }
            }
        };
        let transport = |message: String| FetchError::Transport {
            uri: uri.to_string(),
            message,
        };

        match Source::parse(uri) {
            Source::Http(url) => {
                debug!(url, "fetching over HTTP");
                let response = self.http.get(url).await.map_err(transport)?;
                match response.status {
                    200 => Ok(response.body),
                    404 => Err(not_found(response.status_text)),
                    _ => Err(transport(response.status_text)),
                }
            }
            Source::ObjectStore { bucket, key } => {
                debug!(bucket, key, "fetching from object store");
                let Some(client) = &self.object_store else {
                    return Err(transport("no object-store client configured".to_string()));
                };
                match client.get_object(bucket, key).await {
                    Ok(bytes) => Ok(bytes),
                    Err(e @ ObjectStoreError::NoSuchKey { .. }) => Err(not_found(e.to_string())),
                    Err(ObjectStoreError::Transport(msg)) => Err(transport(msg)),
                }
            }
            Source::Local(path) => {
                let expanded = shellexpand::tilde(path).into_owned();
                debug!(path = %expanded, "reading local source");
                match tokio::fs::read(&expanded).await {
                    Ok(bytes) => Ok(bytes),
                    Err(e) if e.kind() == ErrorKind::NotFound => Err(not_found(e.to_string())),
                    Err(e) => Err(transport(e.to_string())),
                }
            }
        }
    }
}

/// Fetcher + content-addressed cache.
///
/// Remote sources are remembered per process (`source -> hash`), so a second
/// fetch of the same source is served from the cache without touching the
/// origin. Local paths are always read fresh. Cache I/O problems are logged
/// and never fail a fetch.
#[derive(Debug)]
pub struct CachedFetcher {
    fetcher: Fetcher,
    cache: Option<Arc<Cache>>,
    memo: Mutex<HashMap<String, String>>,
}

impl CachedFetcher {
    pub fn new(fetcher: Fetcher, cache: Option<Arc<Cache>>) -> Self {
        Self {
            fetcher,
            cache,
            memo: Mutex::new(HashMap::new()),
        }
    }

    pub fn cache(&self) -> Option<&Arc<Cache>> {
        self.cache.as_ref()
    }

    pub async fn fetch(&self, uri: &str, opts: &FetchOptions) -> Result<Vec<u8>, FetchError> {
        let remote = Source::parse(uri).is_remote();

        if remote && let Some(bytes) = self.memo_hit(uri) {
            debug!(source = uri, "serving source from cache");
            return Ok(bytes);
        }

        match self.fetcher.fetch(uri, opts).await {
            Ok(bytes) => {
                if remote {
                    self.store(uri, &bytes, &opts.file_type);
                }
                Ok(bytes)
            }
            Err(FetchError::Transport { uri: source, message }) if remote => {
                match self.stale_copy(uri) {
                    Some(bytes) => {
                        warn!(source = %source, error = %message, "origin unreachable; using cached copy");
                        Ok(bytes)
                    }
                    None => Err(FetchError::Transport { uri: source, message }),
                }
            }
            Err(e) => Err(e),
        }
    }

    fn memo_hit(&self, uri: &str) -> Option<Vec<u8>> {
        let cache = self.cache.as_ref()?;
        let hash = self.memo.lock().ok()?.get(uri).cloned()?;
        cache.get(&hash).map(|(bytes, _)| bytes)
    }

    fn stale_copy(&self, uri: &str) -> Option<Vec<u8>> {
        let cache = self.cache.as_ref()?;
        let entry = cache.lookup_source(uri)?;
        cache.get(&entry.hash).map(|(bytes, _)| bytes)
    }

    fn store(&self, uri: &str, bytes: &[u8], kind: &str) {
        let hash = sha256_hex(bytes);
        if let Some(cache) = &self.cache {
            match cache.set(uri, &hash, bytes, kind) {
                Ok(entry) => info!(source = uri, path = ?entry.path, "cached remote source"),
                Err(e) => warn!(source = uri, error = %e, "failed to write cache entry"),
            }
        }
        if let Ok(mut memo) = self.memo.lock() {
            memo.insert(uri.to_string(), hash);
        }
    }
}
