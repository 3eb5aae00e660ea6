// src/schedule/mod.rs

//! Cron scheduler with seconds resolution.
//!
//! Each tag owns one timer loop. A firing is skipped while the previous run
//! of the same tag is still going; different tags run concurrently.
//! Cancelling the token stops new firings and `start_blocking` returns once
//! in-flight runs are done.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Local};
use cron::Schedule;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::errors::{BackyError, Result};
use crate::types::BoxFuture;

/// Work run on every firing.
pub type Job = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Parse a cron expression. Five-field expressions get `0` seconds.
pub fn parse_cron(expr: &str) -> std::result::Result<Schedule, cron::error::Error> {
    let expr = expr.trim();
    let normalized = if expr.split_whitespace().count() == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    };
    Schedule::from_str(&normalized)
}

struct Entry {
    expr: String,
    schedule: Schedule,
    job: Job,
    guard: Arc<Mutex<()>>,
}

#[derive(Default)]
pub struct CronScheduler {
    entries: BTreeMap<String, Entry>,
}

impl std::fmt::Debug for CronScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(tag, e)| (tag, &e.expr)))
            .finish()
    }
}

impl CronScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `job` to `expr` under `tag`, replacing any previous binding.
    pub fn register(&mut self, tag: impl Into<String>, expr: &str, job: Job) -> Result<()> {
        let tag = tag.into();
        let schedule = parse_cron(expr)
            .map_err(|e| BackyError::ConfigError(format!("invalid cron expression '{expr}' for {tag}: {e}")))?;

        let entry = Entry {
            expr: expr.to_string(),
            schedule,
            job,
            guard: Arc::new(Mutex::new(())),
        };
        if self.entries.insert(tag.clone(), entry).is_some() {
            debug!(tag = %tag, "replaced existing cron binding");
        }
        info!(tag = %tag, cron = expr, "registered cron job");
        Ok(())
    }

    pub fn tags(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Next firing of `tag` in local time.
    pub fn next_fire(&self, tag: &str) -> Option<DateTime<Local>> {
        self.entries.get(tag)?.schedule.upcoming(Local).next()
    }

    /// Run until `cancel` fires, then wait for in-flight jobs.
    pub async fn start_blocking(self, cancel: CancellationToken) {
        let tracker = TaskTracker::new();

        for (tag, entry) in self.entries {
            let tracker_inner = tracker.clone();
            let cancel = cancel.clone();
            tracker.spawn(run_tag(tag, entry, tracker_inner, cancel));
        }

        cancel.cancelled().await;
        info!("scheduler stopping; waiting for running jobs");
        tracker.close();
        tracker.wait().await;
    }
}

async fn run_tag(tag: String, entry: Entry, tracker: TaskTracker, cancel: CancellationToken) {
    loop {
        let Some(next) = entry.schedule.upcoming(Local).next() else {
            warn!(tag = %tag, "cron expression has no upcoming firing");
            return;
        };
        let wait = (next - Local::now()).to_std().unwrap_or_default();
        debug!(tag = %tag, next = %next, "waiting for next firing");

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = cancel.cancelled() => return,
        }

        let Ok(running) = entry.guard.clone().try_lock_owned() else {
            warn!(tag = %tag, "previous run still in progress; skipping this firing");
            continue;
        };
        let job = entry.job.clone();
        let tag = tag.clone();
        tracker.spawn(async move {
            let _running = running;
            info!(tag = %tag, "cron firing");
            job().await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_fields_get_seconds() {
        assert!(parse_cron("*/5 * * * *").is_ok());
        assert!(parse_cron("0 */5 * * * *").is_ok());
        assert!(parse_cron("not a cron").is_err());
    }

    #[test]
    fn register_replaces_same_tag() {
        let job: Job = Arc::new(|| -> BoxFuture<'static, ()> { Box::pin(async {}) });
        let mut sched = CronScheduler::new();
        sched.register("nightly", "0 0 2 * * *", job.clone()).unwrap();
        sched.register("nightly", "0 0 3 * * *", job).unwrap();
        assert_eq!(sched.tags(), vec!["nightly"]);
    }

    #[tokio::test]
    async fn overlapping_firings_are_skipped() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::time::Duration;

        let cancel = CancellationToken::new();
        let started = Arc::new(AtomicUsize::new(0));

        let job: Job = {
            let started = started.clone();
            let cancel = cancel.clone();
            Arc::new(move || -> BoxFuture<'static, ()> {
                let started = started.clone();
                let cancel = cancel.clone();
                Box::pin(async move {
                    started.fetch_add(1, Ordering::SeqCst);
                    // Outlives every later firing until shutdown.
                    cancel.cancelled().await;
                })
            })
        };

        let mut sched = CronScheduler::new();
        sched.register("busy", "* * * * * *", job).unwrap();
        let handle = tokio::spawn(sched.start_blocking(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(3500)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(started.load(Ordering::SeqCst), 1);
    }
}
