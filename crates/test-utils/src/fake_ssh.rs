use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use backy::errors::{BackyError, Result};
use backy::hosts::{ConnectTarget, Connector, RemoteOutput, RemoteRequest, RemoteSession, Tunnel};
use backy::types::BoxFuture;

/// Shared log of what the fake SSH layer saw.
#[derive(Debug, Default, Clone)]
pub struct SshLog {
    inner: Arc<Mutex<SshEvents>>,
}

#[derive(Debug, Default, Clone)]
pub struct SshEvents {
    /// Aliases in the order sessions were opened.
    pub opened: Vec<String>,
    /// Aliases in the order sessions were closed.
    pub closed: Vec<String>,
    /// `(alias, came through a tunnel)` per connect.
    pub tunnelled: Vec<(String, bool)>,
    /// `(session alias, "host:port")` per dial.
    pub dials: Vec<(String, String)>,
    /// `(session alias, command)` per exec.
    pub execs: Vec<(String, String)>,
}

impl SshLog {
    pub fn snapshot(&self) -> SshEvents {
        self.inner.lock().unwrap().clone()
    }

    fn with<R>(&self, f: impl FnOnce(&mut SshEvents) -> R) -> R {
        f(&mut self.inner.lock().unwrap())
    }
}

/// Connector that never touches the network.
#[derive(Debug, Default)]
pub struct FakeConnector {
    log: SshLog,
    refuse: Vec<String>,
    handshake: HashMap<String, Duration>,
}

impl FakeConnector {
    pub fn new(log: SshLog) -> Self {
        Self {
            log,
            refuse: Vec::new(),
            handshake: HashMap::new(),
        }
    }

    /// Make the handshake for `alias` take `delay`.
    pub fn slow(mut self, alias: &str, delay: Duration) -> Self {
        self.handshake.insert(alias.to_string(), delay);
        self
    }

    /// Fail the connect for `alias` as an authentication error.
    pub fn refuse(mut self, alias: &str) -> Self {
        self.refuse.push(alias.to_string());
        self
    }
}

impl Connector for FakeConnector {
    fn connect<'a>(
        &'a self,
        target: &'a ConnectTarget,
        via: Option<Tunnel>,
    ) -> BoxFuture<'a, Result<Arc<dyn RemoteSession>>> {
        Box::pin(async move {
            if let Some(delay) = self.handshake.get(&target.alias) {
                tokio::time::sleep(*delay).await;
            }
            if self.refuse.contains(&target.alias) {
                return Err(BackyError::Auth {
                    host: target.alias.clone(),
                    user: target.user.clone(),
                });
            }
            self.log.with(|e| {
                e.opened.push(target.alias.clone());
                e.tunnelled.push((target.alias.clone(), via.is_some()));
            });
            let session: Arc<dyn RemoteSession> = Arc::new(FakeSession {
                alias: target.alias.clone(),
                log: self.log.clone(),
            });
            Ok(session)
        })
    }
}

pub struct FakeSession {
    alias: String,
    log: SshLog,
}

impl RemoteSession for FakeSession {
    fn alias(&self) -> &str {
        &self.alias
    }

    fn exec<'a>(&'a self, request: RemoteRequest) -> BoxFuture<'a, Result<RemoteOutput>> {
        Box::pin(async move {
            self.log
                .with(|e| e.execs.push((self.alias.clone(), request.command.clone())));
            Ok(RemoteOutput {
                exit_code: Some(0),
                stdout: format!("ran on {}\n", self.alias).into_bytes(),
                stderr: Vec::new(),
            })
        })
    }

    fn dial<'a>(&'a self, host: &'a str, port: u16) -> BoxFuture<'a, Result<Tunnel>> {
        Box::pin(async move {
            self.log
                .with(|e| e.dials.push((self.alias.clone(), format!("{host}:{port}"))));
            let (near, _far) = tokio::io::duplex(64);
            let tunnel: Tunnel = Box::pin(near);
            Ok(tunnel)
        })
    }

    fn close<'a>(&'a self) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.log.with(|e| e.closed.push(self.alias.clone()));
            Ok(())
        })
    }
}
