// src/exec/local.rs

//! Local subprocess runner.

use std::process::Stdio;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::{BackyError, Result};
use crate::exec::command::{ARGV0, ExecOutcome, Invocation, Payload};

/// Run `inv` as a child process of this one.
///
/// When the token is cancelled the child is killed and
/// [`BackyError::Cancelled`] is returned.
pub async fn run_local(inv: &Invocation, cancel: &CancellationToken, echo_stdout: bool) -> Result<ExecOutcome> {
    let mut cmd = match &inv.payload {
        Payload::Line { line, args } => {
            let mut c = Command::new(&inv.shell);
            c.arg("-c").arg(line);
            if !args.is_empty() {
                c.arg(ARGV0).args(args);
            }
            c
        }
        Payload::Stdin { args, .. } => {
            let mut c = Command::new(&inv.shell);
            c.arg("-s").arg("--").args(args);
            c
        }
        Payload::Argv(argv) => {
            let Some((program, rest)) = argv.split_first() else {
                return Err(BackyError::CommandFailed {
                    name: inv.name.clone(),
                    message: "empty argument vector".to_string(),
                });
            };
            let mut c = Command::new(program);
            c.args(rest);
            c
        }
    };

    cmd.envs(inv.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(match inv.payload {
            Payload::Stdin { .. } => Stdio::piped(),
            _ => Stdio::null(),
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &inv.dir {
        cmd.current_dir(dir);
    }

    debug!(command = %inv.name, shell = %inv.shell, "spawning local process");
    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning process for command '{}'", inv.name))?;

    if let (Payload::Stdin { script, .. }, Some(mut stdin)) = (&inv.payload, child.stdin.take()) {
        let script = script.clone().into_bytes();
        let name = inv.name.clone();
        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(&script).await {
                warn!(command = %name, error = %e, "writing script to stdin");
            }
            // Dropping stdin closes the pipe so the shell sees EOF.
        });
    }

    let stdout = child
        .stdout
        .take()
        .map(|out| drain(out, inv.name.clone(), Stream::Stdout, inv.capture, echo_stdout));
    let stderr = child
        .stderr
        .take()
        .map(|err| drain(err, inv.name.clone(), Stream::Stderr, inv.capture, false));

    let status = tokio::select! {
        status = child.wait() => status.with_context(|| format!("waiting for command '{}'", inv.name))?,
        _ = cancel.cancelled() => {
            info!(command = %inv.name, "cancellation requested; killing process");
            if let Err(e) = child.kill().await {
                warn!(command = %inv.name, error = %e, "failed to kill child process on cancellation");
            }
            return Err(BackyError::Cancelled);
        }
    };

    let mut outcome = ExecOutcome {
        exit_code: Some(status.code().unwrap_or(-1)),
        ..Default::default()
    };
    if let Some(handle) = stdout {
        outcome.stdout = handle.await.unwrap_or_default();
    }
    if let Some(handle) = stderr {
        outcome.stderr = handle.await.unwrap_or_default();
    }

    Ok(outcome)
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

/// Consume a pipe line by line. Captured lines are returned; the rest are
/// logged (and optionally echoed on our stdout).
fn drain<R>(pipe: R, name: String, stream: Stream, capture: bool, echo: bool) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut captured = Vec::new();
        let mut lines = BufReader::new(pipe).lines();

        while let Ok(Some(line)) = lines.next_line().await {
            if capture {
                captured.extend_from_slice(line.as_bytes());
                captured.push(b'\n');
                continue;
            }
            match stream {
                Stream::Stdout => {
                    info!(command = %name, "{}", line);
                    if echo {
                        println!("{line}");
                    }
                }
                Stream::Stderr => warn!(command = %name, "stderr: {}", line),
            }
        }
        captured
    })
}
