use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use backy::errors::{BackyError, Result};
use backy::exec::{ExecOutcome, ExecutorBackend, Invocation};
use backy::types::BoxFuture;

/// One recorded `run` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub name: String,
    pub host: String,
}

/// A fake executor backend that:
/// - records which commands were "run" and where
/// - sleeps for a per-command delay (cancellable)
/// - exits 1 for commands marked as failing, 0 otherwise.
#[derive(Default)]
pub struct FakeExecutor {
    calls: Arc<Mutex<Vec<Call>>>,
    invocations: Arc<Mutex<Vec<Invocation>>>,
    failing: HashSet<String>,
    delays: HashMap<String, Duration>,
    default_delay: Duration,
    stdout: HashMap<String, String>,
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, name: &str) -> Self {
        self.failing.insert(name.to_string());
        self
    }

    pub fn delay(mut self, name: &str, delay: Duration) -> Self {
        self.delays.insert(name.to_string(), delay);
        self
    }

    pub fn default_delay(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self
    }

    pub fn stdout(mut self, name: &str, text: &str) -> Self {
        self.stdout.insert(name.to_string(), text.to_string());
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.name).collect()
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().unwrap().clone()
    }
}

impl ExecutorBackend for FakeExecutor {
    fn run(&self, invocation: Invocation, cancel: CancellationToken) -> BoxFuture<'_, Result<ExecOutcome>> {
        Box::pin(async move {
            {
                let mut guard = self.calls.lock().unwrap();
                guard.push(Call {
                    name: invocation.name.clone(),
                    host: invocation.destination.alias().to_string(),
                });
            }
            self.invocations.lock().unwrap().push(invocation.clone());

            let delay = self
                .delays
                .get(&invocation.name)
                .copied()
                .unwrap_or(self.default_delay);
            if !delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Err(BackyError::Cancelled),
                }
            }

            let code = if self.failing.contains(&invocation.name) { 1 } else { 0 };
            let mut outcome = ExecOutcome::exited(code);
            if let Some(text) = self.stdout.get(&invocation.name) {
                outcome.stdout = text.as_bytes().to_vec();
            }
            Ok(outcome)
        })
    }
}
