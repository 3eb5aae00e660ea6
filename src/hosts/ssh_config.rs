// src/hosts/ssh_config.rs

//! Minimal reader for OpenSSH client configuration files.
//!
//! Only the options the host manager merges are kept: `HostName`, `User`,
//! `Port` and `IdentityFile`. `Match` blocks are skipped.

use std::path::{Path, PathBuf};

use globset::{Glob, GlobMatcher};
use tracing::{debug, warn};

/// Default location of the user's client configuration.
pub fn default_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".ssh").join("config"))
}

/// Settings found for one alias. First obtained value wins, as in `ssh`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SshHostConfig {
    pub hostname: Option<String>,
    pub user: Option<String>,
    pub port: Option<u16>,
    pub identity_file: Option<String>,
}

#[derive(Debug, Clone)]
struct Pattern {
    matcher: GlobMatcher,
    negated: bool,
}

#[derive(Debug, Clone)]
enum Block {
    Host {
        patterns: Vec<Pattern>,
        options: Vec<(String, String)>,
    },
    Skipped,
}

impl Block {
    fn matches(&self, alias: &str) -> bool {
        let Block::Host { patterns, .. } = self else {
            return false;
        };
        if patterns.iter().any(|p| p.negated && p.matcher.is_match(alias)) {
            return false;
        }
        patterns.iter().any(|p| !p.negated && p.matcher.is_match(alias))
    }
}

#[derive(Debug, Clone, Default)]
pub struct SshConfig {
    blocks: Vec<Block>,
}

impl SshConfig {
    /// Load `path`; a missing or unreadable file yields an empty config.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(text) => {
                debug!(path = ?path, "read ssh client config");
                Self::parse(&text)
            }
            Err(e) => {
                debug!(path = ?path, error = %e, "no ssh client config");
                Self::default()
            }
        }
    }

    pub fn parse(text: &str) -> Self {
        let mut blocks = Vec::new();
        // Options before the first `Host` line apply to every alias.
        let mut current = Block::Host {
            patterns: match_all(),
            options: Vec::new(),
        };

        for line in text.lines() {
            let Some((key, value)) = split_line(line) else {
                continue;
            };

            match key.as_str() {
                "host" => {
                    blocks.push(std::mem::replace(&mut current, host_block(&value)));
                }
                "match" => {
                    blocks.push(std::mem::replace(&mut current, Block::Skipped));
                }
                _ => {
                    if let Block::Host { options, .. } = &mut current {
                        options.push((key, value));
                    }
                }
            }
        }
        blocks.push(current);

        Self { blocks }
    }

    pub fn lookup(&self, alias: &str) -> SshHostConfig {
        let mut found = SshHostConfig::default();

        for block in self.blocks.iter().filter(|b| b.matches(alias)) {
            let Block::Host { options, .. } = block else {
                continue;
            };
            for (key, value) in options {
                match key.as_str() {
                    "hostname" if found.hostname.is_none() => {
                        found.hostname = Some(value.replace("%h", alias));
                    }
                    "user" if found.user.is_none() => found.user = Some(value.clone()),
                    "port" if found.port.is_none() => match value.parse() {
                        Ok(port) => found.port = Some(port),
                        Err(_) => warn!(alias, port = %value, "ignoring invalid Port in ssh config"),
                    },
                    "identityfile" if found.identity_file.is_none() => {
                        found.identity_file = Some(value.clone());
                    }
                    _ => {}
                }
            }
        }

        found
    }
}

fn match_all() -> Vec<Pattern> {
    Glob::new("*")
        .map(|glob| {
            vec![Pattern {
                matcher: glob.compile_matcher(),
                negated: false,
            }]
        })
        .unwrap_or_default()
}

fn host_block(value: &str) -> Block {
    let patterns = value
        .split_whitespace()
        .filter_map(|raw| {
            let (negated, pattern) = match raw.strip_prefix('!') {
                Some(rest) => (true, rest),
                None => (false, raw),
            };
            match Glob::new(pattern) {
                Ok(glob) => Some(Pattern {
                    matcher: glob.compile_matcher(),
                    negated,
                }),
                Err(e) => {
                    warn!(pattern, error = %e, "ignoring invalid Host pattern");
                    None
                }
            }
        })
        .collect();

    Block::Host {
        patterns,
        options: Vec::new(),
    }
}

/// `Key value`, `Key=value` or `Key = value`; keys are lowercased and
/// surrounding quotes stripped from values.
fn split_line(line: &str) -> Option<(String, String)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let split_at = line.find(|c: char| c.is_whitespace() || c == '=')?;
    let (key, rest) = line.split_at(split_at);
    let value = rest
        .trim_start_matches(|c: char| c.is_whitespace() || c == '=')
        .trim()
        .trim_matches('"');

    if value.is_empty() {
        return None;
    }
    Some((key.to_ascii_lowercase(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
User fallback

Host bastion
    HostName 203.0.113.10
    Port 2222

Host *.internal !secret.internal
    User ops
    IdentityFile ~/.ssh/internal_ed25519

Host *
    User nobody
    Port 22
"#;

    #[test]
    fn first_value_wins_and_globals_apply() {
        let cfg = SshConfig::parse(SAMPLE);
        let bastion = cfg.lookup("bastion");
        assert_eq!(bastion.hostname.as_deref(), Some("203.0.113.10"));
        assert_eq!(bastion.port, Some(2222));
        assert_eq!(bastion.user.as_deref(), Some("fallback"));
    }

    #[test]
    fn glob_and_negation() {
        let cfg = SshConfig::parse(SAMPLE.replace("User fallback", "").as_str());
        let db = cfg.lookup("db.internal");
        assert_eq!(db.user.as_deref(), Some("ops"));
        assert_eq!(db.identity_file.as_deref(), Some("~/.ssh/internal_ed25519"));

        let secret = cfg.lookup("secret.internal");
        assert_eq!(secret.user.as_deref(), Some("nobody"));
        assert_eq!(secret.identity_file, None);
    }

    #[test]
    fn equals_syntax() {
        let cfg = SshConfig::parse("Host a\n  HostName=a.example.com\n  Port = 2200\n");
        let a = cfg.lookup("a");
        assert_eq!(a.hostname.as_deref(), Some("a.example.com"));
        assert_eq!(a.port, Some(2200));
    }
}
