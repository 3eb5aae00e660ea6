// src/exec/backend.rs

//! Pluggable executor backend.
//!
//! The [`Executor`](crate::exec::Executor) prepares an [`Invocation`] and
//! hands it to an `ExecutorBackend`. Production uses
//! [`RealExecutorBackend`], which runs local subprocesses and opens SSH
//! sessions through the [`HostManager`]; tests swap in a fake that records
//! what it was asked to run.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::errors::Result;
use crate::exec::command::{Destination, ExecOutcome, Invocation};
use crate::exec::{local, remote};
use crate::hosts::HostManager;
use crate::types::BoxFuture;

pub trait ExecutorBackend: Send + Sync {
    /// Run one prepared command to completion.
    ///
    /// Must return [`BackyError::Cancelled`](crate::errors::BackyError::Cancelled)
    /// if `cancel` fires first.
    fn run(&self, invocation: Invocation, cancel: CancellationToken) -> BoxFuture<'_, Result<ExecOutcome>>;

    /// Release held resources (sessions). Called once at the end of a run.
    fn shutdown(&self) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }
}

pub struct RealExecutorBackend {
    hosts: Arc<HostManager>,
    echo_stdout: bool,
}

impl RealExecutorBackend {
    pub fn new(hosts: Arc<HostManager>) -> Self {
        Self {
            hosts,
            echo_stdout: false,
        }
    }

    /// Echo un-captured command stdout on our own stdout.
    pub fn echo_stdout(mut self, echo: bool) -> Self {
        self.echo_stdout = echo;
        self
    }

    pub fn hosts(&self) -> &Arc<HostManager> {
        &self.hosts
    }
}

impl ExecutorBackend for RealExecutorBackend {
    fn run(&self, invocation: Invocation, cancel: CancellationToken) -> BoxFuture<'_, Result<ExecOutcome>> {
        Box::pin(async move {
            match &invocation.destination {
                Destination::Local => local::run_local(&invocation, &cancel, self.echo_stdout).await,
                Destination::Remote(host) => {
                    let session = tokio::select! {
                        session = self.hosts.connect(host) => session?,
                        _ = cancel.cancelled() => return Err(crate::errors::BackyError::Cancelled),
                    };
                    remote::run_remote(session.as_ref(), &invocation, &cancel, self.echo_stdout).await
                }
            }
        })
    }

    fn shutdown(&self) -> BoxFuture<'_, ()> {
        Box::pin(self.hosts.close_all())
    }
}
