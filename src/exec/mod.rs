// src/exec/mod.rs

//! Command execution layer.
//!
//! - [`runner`] owns the [`Executor`]: command lookup, environment and
//!   payload preparation, list sequencing with hooks, per-host fan-out,
//!   metrics and notifications.
//! - [`backend`] provides the `ExecutorBackend` trait and the production
//!   [`RealExecutorBackend`]; tests replace it with a fake.
//! - [`local`] and [`remote`] run an [`Invocation`] on this machine or over
//!   an SSH session.
//! - [`builders`] turn package and user specs into commands.
//! - [`summary`] holds run results and renders notification bodies.

pub mod backend;
pub mod builders;
pub mod command;
pub mod local;
pub mod remote;
pub mod runner;
pub mod summary;

pub use backend::{ExecutorBackend, RealExecutorBackend};
pub use command::{Destination, ExecOutcome, Invocation, Payload};
pub use runner::{ExecOptions, Executor, HostReport};
pub use summary::{CommandResult, HookRun, ListSummary};
