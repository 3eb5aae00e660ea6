use std::sync::{Arc, Mutex};

use backy::notify::Transport;
use backy::types::BoxFuture;

/// `(subject, body)` pairs a transport was asked to deliver.
pub type Outbox = Arc<Mutex<Vec<(String, String)>>>;

/// Notification transport that keeps what it sends, or always fails.
pub struct RecordingTransport {
    outbox: Outbox,
    fail: bool,
}

impl RecordingTransport {
    pub fn new(outbox: Outbox) -> Self {
        Self { outbox, fail: false }
    }

    pub fn failing(outbox: Outbox) -> Self {
        Self { outbox, fail: true }
    }
}

impl Transport for RecordingTransport {
    fn kind(&self) -> &str {
        "recording"
    }

    fn send<'a>(&'a self, subject: &'a str, body: &'a str) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            if self.fail {
                anyhow::bail!("transport refused the message");
            }
            self.outbox
                .lock()
                .unwrap()
                .push((subject.to_string(), body.to_string()));
            Ok(())
        })
    }
}
