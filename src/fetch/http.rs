// src/fetch/http.rs

//! HTTP transport used by the fetcher.
//!
//! The fetcher talks to an `HttpClient` instead of `reqwest` directly so tests
//! can count requests and serve canned responses.

use std::time::Duration;

use crate::types::BoxFuture;

/// Minimal response shape the fetcher needs.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub status_text: String,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        self.status == 200
    }
}

pub trait HttpClient: Send + Sync {
    /// Perform a GET request. `Err` is reserved for transport failures
    /// (DNS, TLS, connection reset); HTTP error statuses are `Ok`.
    fn get<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<HttpResponse, String>>;
}

/// Production HTTP client backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("backy/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| format!("building HTTP client: {e}"))?;
        Ok(Self { client })
    }

    pub fn inner(&self) -> &reqwest::Client {
        &self.client
    }
}

impl HttpClient for ReqwestHttpClient {
    fn get<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<HttpResponse, String>> {
        Box::pin(async move {
            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| format!("GET {url}: {e}"))?;

            let status = response.status();
            let body = response
                .bytes()
                .await
                .map_err(|e| format!("reading body of {url}: {e}"))?;

            Ok(HttpResponse {
                status: status.as_u16(),
                status_text: status.to_string(),
                body: body.to_vec(),
            })
        })
    }
}
