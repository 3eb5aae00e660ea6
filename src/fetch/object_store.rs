// src/fetch/object_store.rs

//! Object-store transport for `s3://bucket/key` sources.

use thiserror::Error;

use crate::fetch::http::HttpClient;
use crate::types::BoxFuture;

/// Default endpoint for path-style anonymous GETs.
pub const DEFAULT_S3_ENDPOINT: &str = "https://s3.amazonaws.com";

/// Environment variable overriding [`DEFAULT_S3_ENDPOINT`] (e.g. a MinIO URL).
pub const S3_ENDPOINT_ENV: &str = "BACKY_S3_ENDPOINT";

#[derive(Error, Debug)]
pub enum ObjectStoreError {
    #[error("no such key: s3://{bucket}/{key}")]
    NoSuchKey { bucket: String, key: String },

    #[error("object store error: {0}")]
    Transport(String),
}

pub trait ObjectStoreClient: Send + Sync {
    fn get_object<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Vec<u8>, ObjectStoreError>>;
}

/// S3-compatible client that issues unauthenticated path-style GETs
/// (`<endpoint>/<bucket>/<key>`) over the shared HTTP transport.
pub struct HttpObjectStore<C: HttpClient> {
    endpoint: String,
    http: C,
}

impl<C: HttpClient> HttpObjectStore<C> {
    pub fn new(endpoint: impl Into<String>, http: C) -> Self {
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        Self { endpoint, http }
    }

    /// Endpoint from `BACKY_S3_ENDPOINT`, falling back to AWS.
    pub fn from_env(http: C) -> Self {
        let endpoint =
            std::env::var(S3_ENDPOINT_ENV).unwrap_or_else(|_| DEFAULT_S3_ENDPOINT.to_string());
        Self::new(endpoint, http)
    }
}

impl<C: HttpClient> ObjectStoreClient for HttpObjectStore<C> {
    fn get_object<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Vec<u8>, ObjectStoreError>> {
        Box::pin(async move {
            let url = format!("{}/{}/{}", self.endpoint, bucket, key);
            let response = self
                .http
                .get(&url)
                .await
                .map_err(ObjectStoreError::Transport)?;

            match response.status {
                200 => Ok(response.body),
                404 => Err(ObjectStoreError::NoSuchKey {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                }),
                _ => Err(ObjectStoreError::Transport(response.status_text)),
            }
        })
    }
}
