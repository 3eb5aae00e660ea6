// src/exec/command.rs

//! What a prepared command looks like once its kind, environment and
//! destination are known.

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::Host;

/// Shell used when a command does not name one.
pub const DEFAULT_SHELL: &str = "bash";

/// `$0` for command lines that take positional parameters.
pub const ARGV0: &str = "backy";

/// How the work is handed to the destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// A command line run with `<shell> -c`; `args` become `$1`, `$2`, ….
    Line { line: String, args: Vec<String> },
    /// A script piped to `<shell> -s -- args…`.
    Stdin { script: String, args: Vec<String> },
    /// A program and its arguments, run without a shell locally.
    Argv(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Local,
    Remote(Arc<Host>),
}

impl Destination {
    pub fn alias(&self) -> &str {
        match self {
            Destination::Local => "localhost",
            Destination::Remote(host) => &host.alias,
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Destination::Remote(_))
    }

    /// Treat local-looking hosts as the local machine.
    pub fn for_host(host: Option<&Arc<Host>>) -> Self {
        match host {
            Some(host) if !host.is_local() => Destination::Remote(host.clone()),
            _ => Destination::Local,
        }
    }
}

/// A fully prepared command, ready for an executor backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub name: String,
    pub destination: Destination,
    pub payload: Payload,
    /// Resolved environment (secrets already looked up).
    pub env: Vec<(String, String)>,
    /// Local only.
    pub shell: String,
    /// Local only.
    pub dir: Option<PathBuf>,
    /// Keep stdout/stderr in the result instead of logging them.
    pub capture: bool,
}

impl Invocation {
    pub fn new(name: impl Into<String>, destination: Destination, payload: Payload) -> Self {
        Self {
            name: name.into(),
            destination,
            payload,
            env: Vec::new(),
            shell: DEFAULT_SHELL.to_string(),
            dir: None,
            capture: false,
        }
    }
}

/// What came back from running an [`Invocation`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutcome {
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ExecOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn exited(code: i32) -> Self {
        Self {
            exit_code: Some(code),
            ..Default::default()
        }
    }

    /// Captured stdout followed by stderr, lossily decoded.
    pub fn combined_output(&self) -> String {
        let mut out = String::from_utf8_lossy(&self.stdout).into_owned();
        if !self.stderr.is_empty() {
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&String::from_utf8_lossy(&self.stderr));
        }
        out
    }
}

/// Quote and join words for a POSIX shell.
pub fn shell_join<'a>(words: impl IntoIterator<Item = &'a str>) -> String {
    words
        .into_iter()
        .map(|w| shlex::try_quote(w).map(|q| q.into_owned()).unwrap_or_else(|_| quote_fallback(w)))
        .collect::<Vec<_>>()
        .join(" ")
}

// `try_quote` refuses NUL bytes; strip them instead of failing.
fn quote_fallback(word: &str) -> String {
    let cleaned: String = word.chars().filter(|c| *c != '\0').collect();
    shlex::try_quote(&cleaned)
        .map(|q| q.into_owned())
        .unwrap_or_default()
}

/// `export K='v'; ` prefix carrying env over a remote shell.
pub fn export_prefix(env: &[(String, String)]) -> String {
    env.iter()
        .map(|(k, v)| format!("export {}={}; ", k, shell_join([v.as_str()])))
        .collect()
}

/// `<shell> -c '<line>' backy args…` as one remote command line. Without
/// args the line is handed to the login shell as is.
pub fn line_with_positionals(shell: &str, line: &str, args: &[String]) -> String {
    if args.is_empty() {
        return line.to_string();
    }
    let mut words = vec![shell, "-c", line, ARGV0];
    words.extend(args.iter().map(String::as_str));
    shell_join(words)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positionals_follow_a_quoted_line() {
        let line = line_with_positionals("bash", "echo \"$1\"", &["a b".to_string(), "c".to_string()]);
        assert_eq!(
            shlex::split(&line).unwrap(),
            ["bash", "-c", "echo \"$1\"", "backy", "a b", "c"]
        );
        assert_eq!(line_with_positionals("bash", "uptime", &[]), "uptime");
    }

    #[test]
    fn export_prefix_quotes_values() {
        let env = vec![("A".to_string(), "x y".to_string())];
        assert_eq!(export_prefix(&env), "export A='x y'; ");
    }
}
