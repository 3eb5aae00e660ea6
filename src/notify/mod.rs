// src/notify/mod.rs

//! Notification dispatch.
//!
//! Delivery failures are logged and reported back to the caller but never
//! turn into errors for the executor.

pub mod template;
pub mod transports;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use crate::config::Catalog;

pub use self::transports::{Transport, TransportDeps, TransportRegistry};

/// Outcome of one [`Notifier::send`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotifyReport {
    pub delivered: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl NotifyReport {
    pub fn all_delivered(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Default, Clone)]
pub struct Notifier {
    channels: HashMap<String, Arc<dyn Transport>>,
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<&String> = self.channels.keys().collect();
        ids.sort();
        f.debug_struct("Notifier").field("channels", &ids).finish()
    }
}

impl Notifier {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a transport for every enabled channel in the catalog. Channels
    /// whose transport cannot be built are skipped with a warning.
    pub fn from_catalog(catalog: &Catalog, registry: &TransportRegistry, deps: &TransportDeps) -> Self {
        let mut notifier = Self::empty();
        for channel in catalog.notifications.values() {
            if !channel.enabled {
                debug!(channel = %channel.id, "notification channel disabled");
                continue;
            }
            match registry.build(channel, deps) {
                Ok(transport) => {
                    notifier.channels.insert(channel.id.clone(), transport);
                }
                Err(e) => warn!(channel = %channel.id, kind = %channel.kind, error = %e, "skipping notification channel"),
            }
        }
        notifier
    }

    pub fn with_transport(mut self, id: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        self.channels.insert(id.into(), transport);
        self
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Send to every listed channel concurrently.
    pub async fn send(&self, channel_ids: &[String], subject: &str, body: &str) -> NotifyReport {
        let mut report = NotifyReport::default();
        let mut set = JoinSet::new();

        for id in channel_ids {
            let Some(transport) = self.channels.get(id).cloned() else {
                debug!(channel = %id, "no active transport for channel");
                continue;
            };
            let id = id.clone();
            let subject = subject.to_string();
            let body = body.to_string();
            set.spawn(async move {
                let result = transport.send(&subject, &body).await;
                (id, result)
            });
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((id, Ok(()))) => {
                    debug!(channel = %id, "notification delivered");
                    report.delivered.push(id);
                }
                Ok((id, Err(e))) => {
                    error!(channel = %id, error = %e, "notification delivery failed");
                    report.failed.push((id, e.to_string()));
                }
                Err(e) => {
                    error!(error = %e, "notification task panicked");
                }
            }
        }

        report.delivered.sort();
        report.failed.sort();
        report
    }
}
