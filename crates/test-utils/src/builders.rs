#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use backy::config::catalog::{BuildOptions, build_catalog};
use backy::config::env::EnvOverlay;
use backy::config::model::{RawCommand, RawDocument, RawHooks, RawHost, RawList, RawNotification};
use backy::config::{Catalog, Selection};
use backy::fetch::{CachedFetcher, Fetcher};
use backy::types::CommandType;

use crate::fake_fetch::FakeHttp;

/// Builder for a `RawDocument` / `Catalog` to simplify test setup.
pub struct DocumentBuilder {
    doc: RawDocument,
    env: Vec<(String, String)>,
    config_dir: Option<PathBuf>,
    options: BuildOptions,
}

impl DocumentBuilder {
    pub fn new() -> Self {
        Self {
            doc: RawDocument::default(),
            env: Vec::new(),
            config_dir: None,
            options: BuildOptions::default(),
        }
    }

    pub fn with_command(mut self, name: &str, cmd: RawCommand) -> Self {
        self.doc.commands.insert(name.to_string(), cmd);
        self
    }

    /// Shorthand for a local shell command.
    pub fn with_shell(self, name: &str, line: &str) -> Self {
        self.with_command(name, CommandBuilder::shell(line).build())
    }

    pub fn with_list(mut self, name: &str, list: RawList) -> Self {
        self.doc.cmd_configs.insert(name.to_string(), list);
        self
    }

    pub fn with_host(mut self, alias: &str, host: RawHost) -> Self {
        self.doc.hosts.insert(alias.to_string(), host);
        self
    }

    /// A channel with no transport-specific keys.
    pub fn with_notification(mut self, id: &str, kind: &str) -> Self {
        self.doc.notifications.insert(
            id.to_string(),
            RawNotification {
                kind: kind.to_string(),
                enabled: true,
                config: Default::default(),
            },
        );
        self
    }

    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }

    /// Directory relative script and env paths are taken from.
    pub fn config_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config_dir = Some(dir.into());
        self
    }

    pub fn cron_mode(mut self) -> Self {
        self.options.cron_mode = true;
        self
    }

    pub fn select(mut self, selection: Selection) -> Self {
        self.options.selection = selection;
        self
    }

    pub fn raw(self) -> RawDocument {
        self.doc
    }

    pub fn try_build(self) -> backy::errors::Result<Catalog> {
        build_catalog(self.doc, EnvOverlay::from_pairs(self.env), self.config_dir, &self.options)
    }

    pub fn build(self) -> Arc<Catalog> {
        Arc::new(self.try_build().expect("Failed to build valid catalog from builder"))
    }
}

impl Default for DocumentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `RawCommand`.
pub struct CommandBuilder {
    cmd: RawCommand,
}

impl CommandBuilder {
    pub fn shell(line: &str) -> Self {
        Self {
            cmd: RawCommand {
                cmd: line.to_string(),
                ..Default::default()
            },
        }
    }

    pub fn of_type(kind: CommandType, cmd: &str) -> Self {
        Self {
            cmd: RawCommand {
                cmd: cmd.to_string(),
                kind: Some(kind),
                ..Default::default()
            },
        }
    }

    pub fn host(mut self, alias: &str) -> Self {
        self.cmd.host = Some(alias.to_string());
        self
    }

    pub fn arg(mut self, arg: &str) -> Self {
        self.cmd.args.push(arg.to_string());
        self
    }

    pub fn env(mut self, entry: &str) -> Self {
        self.cmd.environment.push(entry.to_string());
        self
    }

    pub fn env_file(mut self, path: &str) -> Self {
        self.cmd.env = Some(path.to_string());
        self
    }

    pub fn shell_program(mut self, shell: &str) -> Self {
        self.cmd.shell = Some(shell.to_string());
        self
    }

    pub fn get_output(mut self) -> Self {
        self.cmd.get_output = true;
        self
    }

    pub fn build(self) -> RawCommand {
        self.cmd
    }
}

/// Builder for `RawList`.
pub struct ListBuilder {
    list: RawList,
}

impl ListBuilder {
    pub fn new(order: &[&str]) -> Self {
        Self {
            list: RawList {
                order: order.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            },
        }
    }

    pub fn cron(mut self, expr: &str) -> Self {
        self.list.cron = Some(expr.to_string());
        self
    }

    pub fn notify(mut self, channel: &str) -> Self {
        self.list.notifications.push(channel.to_string());
        self
    }

    pub fn before(mut self, hook: &str) -> Self {
        self.hooks().before = Some(hook.to_string());
        self
    }

    pub fn after(mut self, hook: &str) -> Self {
        self.hooks().after = Some(hook.to_string());
        self
    }

    pub fn on_error(mut self, hook: &str) -> Self {
        self.hooks().error = Some(hook.to_string());
        self
    }

    pub fn continue_on_error(mut self) -> Self {
        self.list.continue_on_error = true;
        self
    }

    pub fn get_output(mut self) -> Self {
        self.list.get_output = true;
        self
    }

    pub fn build(self) -> RawList {
        self.list
    }

    fn hooks(&mut self) -> &mut RawHooks {
        &mut self.list.hooks
    }
}

/// Builder for `RawHost`.
pub struct HostBuilder {
    host: RawHost,
}

impl HostBuilder {
    pub fn new(hostname: &str) -> Self {
        Self {
            host: RawHost {
                hostname: Some(hostname.to_string()),
                ..Default::default()
            },
        }
    }

    pub fn user(mut self, user: &str) -> Self {
        self.host.user = Some(user.to_string());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.host.port = Some(port);
        self
    }

    pub fn proxy_jump(mut self, spec: &str) -> Self {
        self.host.proxyjump = Some(spec.to_string());
        self
    }

    pub fn password(mut self, password: &str) -> Self {
        self.host.password = Some(password.to_string());
        self
    }

    /// Point at a missing ssh config so the user's own does not leak in.
    pub fn isolated(mut self) -> Self {
        self.host.configfilepath = Some("/nonexistent/backy-test/ssh_config".to_string());
        self.host.knownhostsfile = Some("/nonexistent/backy-test/known_hosts".to_string());
        self.host.privatekeypath = Some("/nonexistent/backy-test/id_ed25519".to_string());
        self
    }

    pub fn build(self) -> RawHost {
        self.host
    }
}

/// Fetcher without a cache whose HTTP side answers 404 to everything.
pub fn offline_fetcher() -> Arc<CachedFetcher> {
    Arc::new(CachedFetcher::new(
        Fetcher::new(Arc::new(FakeHttp::new()), None),
        None,
    ))
}
