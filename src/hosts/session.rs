// src/hosts/session.rs

//! Seams between the host manager and the SSH transport.
//!
//! The production implementation lives in [`crate::hosts::ssh`]; tests plug
//! in a fake connector that records the order sessions are opened and closed.

use std::fmt;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::errors::Result;
use crate::types::BoxFuture;

/// Byte stream tunnelled through an established session.
pub trait Duplex: AsyncRead + AsyncWrite + Send {}

impl<T: AsyncRead + AsyncWrite + Send + ?Sized> Duplex for T {}

pub type Tunnel = Pin<Box<dyn Duplex>>;

/// Fully merged connection settings for one hop.
#[derive(Clone, Default)]
pub struct ConnectTarget {
    pub alias: String,
    pub hostname: String,
    pub port: u16,
    pub user: String,
    pub identity_file: Option<PathBuf>,
    /// Plaintext key passphrase (secret already resolved).
    pub passphrase: Option<String>,
    /// Plaintext password (secret already resolved).
    pub password: Option<String>,
    pub known_hosts: PathBuf,
}

impl fmt::Debug for ConnectTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectTarget")
            .field("alias", &self.alias)
            .field("hostname", &self.hostname)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("identity_file", &self.identity_file)
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("known_hosts", &self.known_hosts)
            .finish()
    }
}

/// One command to run over a session.
#[derive(Debug, Clone, Default)]
pub struct RemoteRequest {
    pub command: String,
    /// Bytes written to the remote stdin, followed by EOF.
    pub stdin: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteOutput {
    /// `None` when the remote side closed without reporting a status.
    pub exit_code: Option<u32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl RemoteOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// An authenticated session to one host.
pub trait RemoteSession: Send + Sync {
    fn alias(&self) -> &str;

    fn exec<'a>(&'a self, request: RemoteRequest) -> BoxFuture<'a, Result<RemoteOutput>>;

    /// Open a TCP tunnel to `host:port` from the remote side.
    fn dial<'a>(&'a self, host: &'a str, port: u16) -> BoxFuture<'a, Result<Tunnel>>;

    fn close<'a>(&'a self) -> BoxFuture<'a, Result<()>>;
}

/// Opens sessions, either directly or over a tunnel from the previous hop.
pub trait Connector: Send + Sync {
    fn connect<'a>(
        &'a self,
        target: &'a ConnectTarget,
        via: Option<Tunnel>,
    ) -> BoxFuture<'a, Result<Arc<dyn RemoteSession>>>;
}
