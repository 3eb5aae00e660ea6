// src/hosts/ssh.rs

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use russh::client::{self, Handle};
use russh::keys::ssh_key::PublicKey;
use russh::keys::{PrivateKeyWithHashAlg, check_known_hosts_path, load_secret_key};
use russh::{ChannelMsg, Disconnect};
use tracing::{debug, warn};

use crate::errors::{BackyError, Result};
use crate::hosts::session::{
    ConnectTarget, Connector, RemoteOutput, RemoteRequest, RemoteSession, Tunnel,
};
use crate::types::BoxFuture;

/// Verifies server keys against a `known_hosts` file.
struct KnownHosts {
    hostname: String,
    port: u16,
    path: PathBuf,
}

impl client::Handler for KnownHosts {
    type Error = russh::Error;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> std::result::Result<bool, Self::Error> {
        match check_known_hosts_path(&self.hostname, self.port, server_public_key, &self.path) {
            Ok(true) => Ok(true),
            Ok(false) => {
                warn!(host = %self.hostname, known_hosts = ?self.path, "host key not in known_hosts");
                Ok(false)
            }
            Err(e) => {
                warn!(host = %self.hostname, error = %e, "host key verification failed");
                Ok(false)
            }
        }
    }
}

/// [`Connector`] backed by `russh`.
#[derive(Clone)]
pub struct RusshConnector {
    config: Arc<client::Config>,
}

impl Default for RusshConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl RusshConnector {
    pub fn new() -> Self {
        let config = client::Config {
            inactivity_timeout: Some(Duration::from_secs(600)),
            keepalive_interval: Some(Duration::from_secs(30)),
            ..Default::default()
        };
        Self {
            config: Arc::new(config),
        }
    }

    async fn open(&self, target: &ConnectTarget, via: Option<Tunnel>) -> Result<Arc<dyn RemoteSession>> {
        let connect_err = |e: russh::Error| BackyError::HostConnect {
            host: target.alias.clone(),
            message: e.to_string(),
        };
        let handler = KnownHosts {
            hostname: target.hostname.clone(),
            port: target.port,
            path: target.known_hosts.clone(),
        };

        let mut handle = match via {
            Some(stream) => {
                debug!(host = %target.alias, "connecting through tunnel");
                client::connect_stream(self.config.clone(), stream, handler)
                    .await
                    .map_err(connect_err)?
            }
            None => {
                debug!(host = %target.alias, hostname = %target.hostname, port = target.port, "connecting");
                client::connect(self.config.clone(), (target.hostname.as_str(), target.port), handler)
                    .await
                    .map_err(connect_err)?
            }
        };

        let mut authenticated = false;

        if let Some(key_path) = &target.identity_file {
            match load_secret_key(key_path, target.passphrase.as_deref()) {
                Ok(key) => {
                    let hash = handle
                        .best_supported_rsa_hash()
                        .await
                        .map_err(connect_err)?
                        .flatten();
                    let auth = handle
                        .authenticate_publickey(
                            &target.user,
                            PrivateKeyWithHashAlg::new(Arc::new(key), hash),
                        )
                        .await
                        .map_err(connect_err)?;
                    authenticated = auth.success();
                }
                Err(e) => {
                    warn!(host = %target.alias, key = ?key_path, error = %e, "cannot load private key");
                }
            }
        }

        if !authenticated && let Some(password) = &target.password {
            let auth = handle
                .authenticate_password(&target.user, password)
                .await
                .map_err(connect_err)?;
            authenticated = auth.success();
        }

        if !authenticated {
            return Err(BackyError::Auth {
                host: target.alias.clone(),
                user: target.user.clone(),
            });
        }

        Ok(Arc::new(RusshSession {
            alias: target.alias.clone(),
            handle,
        }))
    }
}

impl Connector for RusshConnector {
    fn connect<'a>(
        &'a self,
        target: &'a ConnectTarget,
        via: Option<Tunnel>,
    ) -> BoxFuture<'a, Result<Arc<dyn RemoteSession>>> {
        Box::pin(self.open(target, via))
    }
}

struct RusshSession {
    alias: String,
    handle: Handle<KnownHosts>,
}

impl RusshSession {
    fn err(&self, e: russh::Error) -> BackyError {
        BackyError::HostConnect {
            host: self.alias.clone(),
            message: e.to_string(),
        }
    }

    async fn run(&self, request: RemoteRequest) -> Result<RemoteOutput> {
        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| self.err(e))?;
        channel
            .exec(true, request.command.as_bytes())
            .await
            .map_err(|e| self.err(e))?;

        if let Some(stdin) = &request.stdin {
            channel.data(&stdin[..]).await.map_err(|e| self.err(e))?;
        }
        channel.eof().await.map_err(|e| self.err(e))?;

        let mut output = RemoteOutput::default();
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { data } => output.stdout.extend_from_slice(&data),
                ChannelMsg::ExtendedData { data, ext: 1 } => output.stderr.extend_from_slice(&data),
                ChannelMsg::ExitStatus { exit_status } => output.exit_code = Some(exit_status),
                _ => {}
            }
        }
        Ok(output)
    }
}

impl RemoteSession for RusshSession {
    fn alias(&self) -> &str {
        &self.alias
    }

    fn exec<'a>(&'a self, request: RemoteRequest) -> BoxFuture<'a, Result<RemoteOutput>> {
        Box::pin(self.run(request))
    }

    fn dial<'a>(&'a self, host: &'a str, port: u16) -> BoxFuture<'a, Result<Tunnel>> {
        Box::pin(async move {
            let channel = self
                .handle
                .channel_open_direct_tcpip(host, u32::from(port), "127.0.0.1", 0)
                .await
                .map_err(|e| self.err(e))?;
            let tunnel: Tunnel = Box::pin(channel.into_stream());
            Ok(tunnel)
        })
    }

    fn close<'a>(&'a self) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.handle
                .disconnect(Disconnect::ByApplication, "", "en")
                .await
                .map_err(|e| self.err(e))
        })
    }
}
