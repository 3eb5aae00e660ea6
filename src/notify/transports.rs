// src/notify/transports.rs

//! Built-in notification transports and the registry that builds them from
//! configured channels.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, anyhow, bail};
use serde::Serialize;
use tracing::info;

use crate::config::NotificationChannel;
use crate::secrets::{SecretResolver, resolve_value};
use crate::types::BoxFuture;

/// A sink accepting `(subject, body)` messages.
pub trait Transport: Send + Sync {
    fn kind(&self) -> &str;

    fn send<'a>(&'a self, subject: &'a str, body: &'a str) -> BoxFuture<'a, anyhow::Result<()>>;
}

/// Shared dependencies handed to transport factories.
#[derive(Clone)]
pub struct TransportDeps {
    pub http: reqwest::Client,
    pub secrets: Arc<dyn SecretResolver>,
}

pub type TransportFactory =
    Arc<dyn Fn(&NotificationChannel, &TransportDeps) -> anyhow::Result<Arc<dyn Transport>> + Send + Sync>;

/// Maps a channel `type` to the factory building its transport.
#[derive(Clone, Default)]
pub struct TransportRegistry {
    factories: HashMap<String, TransportFactory>,
}

impl TransportRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with `log`, `webhook` and `matrix`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register("log", Arc::new(|channel: &NotificationChannel, _: &TransportDeps| {
            Ok(Arc::new(LogTransport::new(&channel.id)) as Arc<dyn Transport>)
        }));
        registry.register("webhook", Arc::new(|channel: &NotificationChannel, deps: &TransportDeps| {
            Ok(Arc::new(WebhookTransport::from_channel(channel, deps)?) as Arc<dyn Transport>)
        }));
        registry.register("matrix", Arc::new(|channel: &NotificationChannel, deps: &TransportDeps| {
            Ok(Arc::new(MatrixTransport::from_channel(channel, deps)?) as Arc<dyn Transport>)
        }));
        registry
    }

    pub fn register(&mut self, kind: impl Into<String>, factory: TransportFactory) {
        self.factories.insert(kind.into(), factory);
    }

    pub fn build(
        &self,
        channel: &NotificationChannel,
        deps: &TransportDeps,
    ) -> anyhow::Result<Arc<dyn Transport>> {
        let factory = self
            .factories
            .get(&channel.kind)
            .ok_or_else(|| anyhow!("unsupported notification type '{}'", channel.kind))?;
        factory(channel, deps)
    }
}

/// Read a string option, resolving `vault:` tokens.
fn field(channel: &NotificationChannel, deps: &TransportDeps, key: &str) -> anyhow::Result<String> {
    let value = channel
        .config
        .get(key)
        .and_then(|v| v.as_str())
        .with_context(|| format!("notification '{}' needs a string `{key}`", channel.id))?;
    resolve_value(deps.secrets.as_ref(), value).map_err(|e| anyhow!("notification '{}': {e}", channel.id))
}

/// Writes notifications to the log.
pub struct LogTransport {
    id: String,
}

impl LogTransport {
    pub fn new(id: &str) -> Self {
        Self { id: id.to_string() }
    }
}

impl Transport for LogTransport {
    fn kind(&self) -> &str {
        "log"
    }

    fn send<'a>(&'a self, subject: &'a str, body: &'a str) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            info!(channel = %self.id, subject, body, "notification");
            Ok(())
        })
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    subject: &'a str,
    body: &'a str,
}

/// POSTs `{subject, body}` as JSON.
pub struct WebhookTransport {
    client: reqwest::Client,
    url: String,
}

impl WebhookTransport {
    pub fn from_channel(channel: &NotificationChannel, deps: &TransportDeps) -> anyhow::Result<Self> {
        Ok(Self {
            client: deps.http.clone(),
            url: field(channel, deps, "url")?,
        })
    }
}

impl Transport for WebhookTransport {
    fn kind(&self) -> &str {
        "webhook"
    }

    fn send<'a>(&'a self, subject: &'a str, body: &'a str) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            let response = self
                .client
                .post(&self.url)
                .json(&WebhookPayload { subject, body })
                .send()
                .await
                .with_context(|| format!("posting to {}", self.url))?;
            if !response.status().is_success() {
                bail!("webhook returned {}", response.status());
            }
            Ok(())
        })
    }
}

#[derive(Serialize)]
struct MatrixMessage<'a> {
    msgtype: &'a str,
    body: &'a str,
}

/// Sends `m.text` room messages through the client-server API.
///
/// Keys: `home-server`, `room-id`, `access-token`.
pub struct MatrixTransport {
    client: reqwest::Client,
    home_server: reqwest::Url,
    room_id: String,
    access_token: String,
    txn: AtomicU64,
}

impl MatrixTransport {
    pub fn from_channel(channel: &NotificationChannel, deps: &TransportDeps) -> anyhow::Result<Self> {
        let home_server = field(channel, deps, "home-server")?;
        let home_server = reqwest::Url::parse(&home_server)
            .with_context(|| format!("notification '{}': invalid home-server", channel.id))?;
        Ok(Self {
            client: deps.http.clone(),
            home_server,
            room_id: field(channel, deps, "room-id")?,
            access_token: field(channel, deps, "access-token")?,
            txn: AtomicU64::new(0),
        })
    }

    fn message_url(&self) -> anyhow::Result<reqwest::Url> {
        let txn = format!(
            "backy-{}-{}",
            chrono::Utc::now().timestamp_millis(),
            self.txn.fetch_add(1, Ordering::Relaxed)
        );
        let mut url = self.home_server.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("home-server URL cannot be a base"))?
            .pop_if_empty()
            .extend([
                "_matrix",
                "client",
                "v3",
                "rooms",
                self.room_id.as_str(),
                "send",
                "m.room.message",
                txn.as_str(),
            ]);
        Ok(url)
    }
}

impl Transport for MatrixTransport {
    fn kind(&self) -> &str {
        "matrix"
    }

    fn send<'a>(&'a self, subject: &'a str, body: &'a str) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            let text = format!("{subject}\n\n{body}");
            let response = self
                .client
                .put(self.message_url()?)
                .bearer_auth(&self.access_token)
                .json(&MatrixMessage {
                    msgtype: "m.text",
                    body: &text,
                })
                .send()
                .await
                .context("sending matrix message")?;
            if !response.status().is_success() {
                bail!("matrix returned {}", response.status());
            }
            Ok(())
        })
    }
}
