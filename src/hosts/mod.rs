// src/hosts/mod.rs

//! SSH host manager.
//!
//! `HostManager::connect` merges a [`Host`] with the user's ssh client config,
//! walks its proxy chain hop by hop (each hop dialled through the previous
//! one, or through its own chain when it has one) and pools every session by
//! alias. The pool lock is never held across a handshake. `close_all` tears
//! the pool down in reverse opening order.

pub mod session;
pub mod ssh;
pub mod ssh_config;

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

use crate::config::Host;
use crate::errors::{BackyError, Result};
use crate::secrets::{SecretResolver, resolve_value};
use crate::types::BoxFuture;

pub use self::session::{
    ConnectTarget, Connector, RemoteOutput, RemoteRequest, RemoteSession, Tunnel,
};
pub use self::ssh::RusshConnector;
use self::ssh_config::SshConfig;

/// Identity files tried when neither the host nor the ssh config names one.
const DEFAULT_IDENTITIES: &[&str] = &["id_ed25519", "id_ecdsa", "id_rsa"];

/// Sessions keyed by alias. A cell is created on first use and filled once
/// the handshake succeeds; `opened` records the fill order.
#[derive(Default)]
struct Pool {
    sessions: HashMap<String, Arc<OnceCell<Arc<dyn RemoteSession>>>>,
    opened: Vec<String>,
}

pub struct HostManager {
    connector: Arc<dyn Connector>,
    secrets: Arc<dyn SecretResolver>,
    pool: Mutex<Pool>,
}

impl std::fmt::Debug for HostManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostManager").finish_non_exhaustive()
    }
}

impl HostManager {
    pub fn new(connector: Arc<dyn Connector>, secrets: Arc<dyn SecretResolver>) -> Self {
        Self {
            connector,
            secrets,
            pool: Mutex::new(Pool::default()),
        }
    }

    /// Return a pooled session for `host`, opening its proxy chain first.
    pub async fn connect(&self, host: &Host) -> Result<Arc<dyn RemoteSession>> {
        self.connect_hop(host, None, Vec::new()).await
    }

    /// Open (or reuse) the session for one hop.
    ///
    /// A hop with its own proxy chain is always reached through that chain;
    /// otherwise it is dialled through `via`, or directly when `via` is `None`.
    /// `path` holds the aliases on the way here and guards against cycles.
    fn connect_hop<'a>(
        &'a self,
        host: &'a Host,
        via: Option<Arc<dyn RemoteSession>>,
        mut path: Vec<String>,
    ) -> BoxFuture<'a, Result<Arc<dyn RemoteSession>>> {
        Box::pin(async move {
            if path.contains(&host.alias) {
                return Err(BackyError::ProxyCycle(host.alias.clone()));
            }
            path.push(host.alias.clone());

            let mut seen = HashSet::new();
            for proxy in &host.proxy_chain {
                if !seen.insert(proxy.alias.as_str()) || path.contains(&proxy.alias) {
                    return Err(BackyError::ProxyCycle(proxy.alias.clone()));
                }
            }

            let slot = self.slot(&host.alias).await;
            if let Some(session) = slot.get() {
                debug!(host = %host.alias, "reusing pooled session");
                return Ok(session.clone());
            }

            // Only this hop's cell is awaited here; other hosts connect in parallel.
            slot.get_or_try_init(|| async move {
                let via = if host.proxy_chain.is_empty() {
                    via
                } else {
                    let mut previous = None;
                    for proxy in &host.proxy_chain {
                        previous = Some(self.connect_hop(proxy, previous.take(), path.clone()).await?);
                    }
                    previous
                };
                self.open(host, via).await
            })
            .await
            .cloned()
        })
    }

    async fn slot(&self, alias: &str) -> Arc<OnceCell<Arc<dyn RemoteSession>>> {
        let mut pool = self.pool.lock().await;
        pool.sessions.entry(alias.to_string()).or_default().clone()
    }

    async fn open(&self, host: &Host, via: Option<Arc<dyn RemoteSession>>) -> Result<Arc<dyn RemoteSession>> {
        let target = self.resolve_target(host)?;
        let tunnel = match &via {
            Some(via) => {
                debug!(host = %host.alias, via = %via.alias(), "dialling through proxy");
                Some(via.dial(&target.hostname, target.port).await?)
            }
            None => None,
        };

        let session = self.connector.connect(&target, tunnel).await?;
        info!(host = %host.alias, hostname = %target.hostname, port = target.port, user = %target.user, "session opened");

        self.pool.lock().await.opened.push(host.alias.clone());
        Ok(session)
    }

    /// Close every pooled session, last opened first. Safe to call repeatedly.
    pub async fn close_all(&self) {
        let mut pool = self.pool.lock().await;
        let opened = std::mem::take(&mut pool.opened);
        let mut sessions = std::mem::take(&mut pool.sessions);
        drop(pool);

        for alias in opened.into_iter().rev() {
            let Some(session) = sessions.remove(&alias).and_then(|cell| cell.get().cloned()) else {
                continue;
            };
            match session.close().await {
                Ok(()) => debug!(host = %alias, "session closed"),
                Err(e) => warn!(host = %alias, error = %e, "error closing session"),
            }
        }
    }

    pub async fn open_sessions(&self) -> Vec<String> {
        self.pool.lock().await.opened.clone()
    }

    /// Merge explicit host settings with the ssh client config and resolve
    /// secret tokens.
    pub fn resolve_target(&self, host: &Host) -> Result<ConnectTarget> {
        let config_path = host
            .config_file_path
            .as_deref()
            .map(expand_path)
            .or_else(ssh_config::default_path);
        let fallback = config_path
            .map(|path| SshConfig::load(&path).lookup(&host.alias))
            .unwrap_or_default();

        // Stubs carry hostname == alias; let the ssh config override that.
        let explicit_hostname = if host.stub { None } else { host.hostname.clone() };
        let hostname = explicit_hostname
            .or(fallback.hostname)
            .unwrap_or_else(|| host.alias.clone());

        let user = host
            .user
            .clone()
            .or(fallback.user)
            .or_else(|| std::env::var("USER").ok())
            .unwrap_or_else(|| "root".to_string());

        let port = host.port.or(fallback.port).unwrap_or(crate::config::catalog::DEFAULT_SSH_PORT);

        let identity_file = host
            .private_key_path
            .clone()
            .or(fallback.identity_file)
            .map(|p| expand_path(&p))
            .or_else(default_identity);

        let passphrase = host
            .private_key_password
            .as_deref()
            .map(|v| resolve_value(self.secrets.as_ref(), v))
            .transpose()?;
        let password = host
            .password
            .as_deref()
            .map(|v| resolve_value(self.secrets.as_ref(), v))
            .transpose()?;

        let known_hosts = host
            .known_hosts_file
            .as_deref()
            .map(expand_path)
            .or_else(|| dirs::home_dir().map(|h| h.join(".ssh").join("known_hosts")))
            .unwrap_or_else(|| PathBuf::from("known_hosts"));

        Ok(ConnectTarget {
            alias: host.alias.clone(),
            hostname,
            port,
            user,
            identity_file,
            passphrase,
            password,
            known_hosts,
        })
    }
}

fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}

fn default_identity() -> Option<PathBuf> {
    let ssh_dir = dirs::home_dir()?.join(".ssh");
    DEFAULT_IDENTITIES
        .iter()
        .map(|name| ssh_dir.join(name))
        .find(|path| path.is_file())
}
