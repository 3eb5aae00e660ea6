// src/metrics.rs

//! Per-command and per-list run counters, persisted as one YAML document.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::fetch::cache::atomic_write;
use crate::types::MetricKind;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MetricEntry {
    pub successful: u64,
    pub failed: u64,
    pub total: u64,
    /// Seconds.
    pub total_time: f64,
    /// Seconds.
    pub avg_time: f64,
    /// Percent.
    pub success_rate: f64,
    /// Percent.
    pub failure_rate: f64,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
}

impl MetricEntry {
    pub fn record(&mut self, success: bool, duration: Duration, when: DateTime<Utc>) {
        if success {
            self.successful += 1;
        } else {
            self.failed += 1;
        }
        self.total = self.successful + self.failed;
        self.total_time += duration.as_secs_f64();
        self.last_run = Some(when);
        self.recompute();
    }

    fn recompute(&mut self) {
        if self.total == 0 {
            self.avg_time = 0.0;
            self.success_rate = 0.0;
            self.failure_rate = 0.0;
            return;
        }
        let total = self.total as f64;
        self.avg_time = self.total_time / total;
        self.success_rate = self.successful as f64 / total * 100.0;
        self.failure_rate = self.failed as f64 / total * 100.0;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsDocument {
    #[serde(default)]
    pub commands: BTreeMap<String, MetricEntry>,
    #[serde(default)]
    pub lists: BTreeMap<String, MetricEntry>,
}

impl MetricsDocument {
    fn map(&self, kind: MetricKind) -> &BTreeMap<String, MetricEntry> {
        match kind {
            MetricKind::Command => &self.commands,
            MetricKind::List => &self.lists,
        }
    }

    fn map_mut(&mut self, kind: MetricKind) -> &mut BTreeMap<String, MetricEntry> {
        match kind {
            MetricKind::Command => &mut self.commands,
            MetricKind::List => &mut self.lists,
        }
    }
}

#[derive(Debug, Default)]
pub struct Metrics {
    doc: Mutex<MetricsDocument>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_document(doc: MetricsDocument) -> Self {
        Self {
            doc: Mutex::new(doc),
        }
    }

    /// Read a saved document; a missing file gives empty metrics.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = ?path, "no metrics file yet");
            return Ok(Self::new());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading metrics file {:?}", path))?;
        if text.trim().is_empty() {
            return Ok(Self::new());
        }
        let doc: MetricsDocument = serde_yaml::from_str(&text)
            .with_context(|| format!("parsing metrics file {:?}", path))?;
        Ok(Self::from_document(doc))
    }

    pub fn update(
        &self,
        kind: MetricKind,
        name: &str,
        success: bool,
        duration: Duration,
        when: DateTime<Utc>,
    ) {
        let Ok(mut doc) = self.doc.lock() else {
            return;
        };
        doc.map_mut(kind)
            .entry(name.to_string())
            .or_default()
            .record(success, duration, when);
    }

    pub fn get(&self, kind: MetricKind, name: &str) -> Option<MetricEntry> {
        self.doc.lock().ok()?.map(kind).get(name).cloned()
    }

    pub fn snapshot(&self) -> MetricsDocument {
        self.doc
            .lock()
            .map(|doc| doc.clone())
            .unwrap_or_default()
    }

    /// Write a snapshot atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        let snapshot = self.snapshot();
        let yaml = serde_yaml::to_string(&snapshot).map_err(|e| anyhow!("serializing metrics: {e}"))?;
        atomic_write(path, yaml.as_bytes())?;
        debug!(path = ?path, commands = snapshot.commands.len(), lists = snapshot.lists.len(), "metrics saved");
        Ok(())
    }
}
