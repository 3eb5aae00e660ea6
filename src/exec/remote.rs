// src/exec/remote.rs

//! Running prepared commands over an SSH session.

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::errors::{BackyError, Result};
use crate::exec::command::{
    DEFAULT_SHELL, ExecOutcome, Invocation, Payload, export_prefix, line_with_positionals, shell_join,
};
use crate::hosts::{RemoteRequest, RemoteSession};

/// Build the request sent to the remote login shell. Environment travels as
/// an `export` prefix; the local shell and working directory do not apply.
pub fn remote_request(inv: &Invocation) -> RemoteRequest {
    let prefix = export_prefix(&inv.env);
    match &inv.payload {
        Payload::Line { line, args } => RemoteRequest {
            command: format!("{prefix}{}", line_with_positionals(DEFAULT_SHELL, line, args)),
            stdin: None,
        },
        Payload::Stdin { script, args } => {
            let mut command = format!("{prefix}{DEFAULT_SHELL} -s --");
            if !args.is_empty() {
                command.push(' ');
                command.push_str(&shell_join(args.iter().map(String::as_str)));
            }
            RemoteRequest {
                command,
                stdin: Some(script.clone().into_bytes()),
            }
        }
        Payload::Argv(argv) => RemoteRequest {
            command: format!("{prefix}{}", shell_join(argv.iter().map(String::as_str))),
            stdin: None,
        },
    }
}

/// Execute on `session`. On cancellation the remote command is abandoned
/// and may keep running on the host.
pub async fn run_remote(
    session: &dyn RemoteSession,
    inv: &Invocation,
    cancel: &CancellationToken,
    echo_stdout: bool,
) -> Result<ExecOutcome> {
    let request = remote_request(inv);

    let output = tokio::select! {
        out = session.exec(request) => out?,
        _ = cancel.cancelled() => {
            warn!(command = %inv.name, host = %session.alias(), "cancelled; remote command abandoned");
            return Err(BackyError::Cancelled);
        }
    };

    let outcome = ExecOutcome {
        exit_code: output.exit_code.map(|c| i32::try_from(c).unwrap_or(i32::MAX)),
        stdout: output.stdout,
        stderr: output.stderr,
    };

    if inv.capture {
        return Ok(outcome);
    }

    for line in String::from_utf8_lossy(&outcome.stdout).lines() {
        info!(command = %inv.name, host = %session.alias(), "{}", line);
        if echo_stdout {
            println!("{line}");
        }
    }
    for line in String::from_utf8_lossy(&outcome.stderr).lines() {
        warn!(command = %inv.name, host = %session.alias(), "stderr: {}", line);
    }

    Ok(ExecOutcome {
        exit_code: outcome.exit_code,
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::command::Destination;

    #[test]
    fn shell_args_become_positionals_remotely() {
        let mut inv = Invocation::new(
            "greet",
            Destination::Local,
            Payload::Line {
                line: "echo \"[$1]\"".to_string(),
                args: vec!["x y".to_string()],
            },
        );
        inv.env = vec![("A".to_string(), "1".to_string())];

        let request = remote_request(&inv);
        let command = request.command.strip_prefix("export A=1; ").unwrap();
        assert_eq!(
            shlex::split(command).unwrap(),
            ["bash", "-c", "echo \"[$1]\"", "backy", "x y"]
        );
        assert!(request.stdin.is_none());
    }
}
