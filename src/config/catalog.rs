// src/config/catalog.rs

//! The resolved, immutable view of a configuration document.
//!
//! A [`Catalog`] is produced once by the resolver (see
//! [`crate::config::loader::load_catalog`]) and shared read-only as
//! `Arc<Catalog>` by the executor, scheduler and notifier.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::env::{EnvOverlay, split_assignment};
use crate::config::model::{
    GlobalSection, LoggingSection, RawCommand, RawDocument, RawHost, RawList,
};
use crate::config::validate::{proxy_link_order, split_proxy_jump, validate_command, validate_list};
use crate::errors::{BackyError, Result};
use crate::secrets::is_secret_token;
use crate::types::{CommandType, PackageOperation, UserOperation};

pub const DEFAULT_SSH_PORT: u16 = 22;

pub const DEFAULT_SUCCESS_TEMPLATE: &str =
    "List {{list}} succeeded in {{duration}}.\n\n{{results}}";
pub const DEFAULT_FAILURE_TEMPLATE: &str =
    "List {{list}} failed after {{duration}}.\n\n{{results}}";

/// A target machine, identified by its user-facing alias.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Host {
    pub alias: String,
    /// Explicit hostname; see [`Host::hostname`] for the defaulted value.
    pub hostname: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub private_key_path: Option<String>,
    /// Passphrase or `vault:` token.
    pub private_key_password: Option<String>,
    /// Password or `vault:` token.
    pub password: Option<String>,
    pub known_hosts_file: Option<String>,
    pub config_file_path: Option<String>,
    pub proxy_jump: Option<String>,
    /// Hops traversed (in order) before reaching this host.
    pub proxy_chain: Vec<Arc<Host>>,
    /// Created implicitly from a reference rather than declared.
    pub stub: bool,
}

impl Host {
    pub fn stub(alias: impl Into<String>) -> Self {
        let alias = alias.into();
        Self {
            hostname: Some(alias.clone()),
            alias,
            stub: true,
            ..Default::default()
        }
    }

    fn from_raw(alias: &str, raw: &RawHost) -> Self {
        Self {
            alias: alias.to_string(),
            hostname: raw
                .hostname
                .clone()
                .or_else(|| raw.host.clone())
                .filter(|h| !h.trim().is_empty()),
            port: raw.port,
            user: raw.user.clone(),
            private_key_path: raw.privatekeypath.clone(),
            private_key_password: raw.privatekeypassword.clone(),
            password: raw.password.clone(),
            known_hosts_file: raw.knownhostsfile.clone(),
            config_file_path: raw.configfilepath.clone(),
            proxy_jump: raw.proxyjump.clone().filter(|p| !p.trim().is_empty()),
            proxy_chain: Vec::new(),
            stub: false,
        }
    }

    /// DNS name or address; the alias when none was configured.
    pub fn hostname(&self) -> &str {
        self.hostname.as_deref().unwrap_or(&self.alias)
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_SSH_PORT)
    }

    pub fn is_local(&self) -> bool {
        self.alias.is_empty() || self.alias == "localhost"
    }

    pub fn proxy_aliases(&self) -> Vec<&str> {
        self.proxy_chain.iter().map(|h| h.alias.as_str()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageRef {
    pub name: String,
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageSpec {
    pub manager: String,
    pub operation: PackageOperation,
    pub packages: Vec<PackageRef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSpec {
    pub name: String,
    pub operation: UserOperation,
    pub groups: Vec<String>,
    pub home: Option<String>,
    pub shell: Option<String>,
    pub system: bool,
    pub password: Option<String>,
}

/// What a command does; one variant per command type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind {
    Shell { cmd: String },
    Script { body: String },
    ScriptFile { source: String },
    RemoteScript { source: String },
    Package(PackageSpec),
    User(UserSpec),
}

impl CommandKind {
    pub fn label(&self) -> &'static str {
        match self {
            CommandKind::Shell { .. } => "shell",
            CommandKind::Script { .. } => "script",
            CommandKind::ScriptFile { .. } => "scriptFile",
            CommandKind::RemoteScript { .. } => "remoteScript",
            CommandKind::Package(_) => "package",
            CommandKind::User(_) => "user",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub name: String,
    pub kind: CommandKind,
    pub args: Vec<String>,
    /// `None` means the local machine.
    pub host: Option<Arc<Host>>,
    /// Shell used for local execution; ignored on remote hosts.
    pub shell: Option<String>,
    /// Working directory for local execution; ignored on remote hosts.
    pub dir: Option<PathBuf>,
    pub env_file: Option<String>,
    /// Inline environment, already `$VAR`-expanded. `vault:` values are kept
    /// as tokens and resolved at execution time.
    pub environment: Vec<(String, String)>,
    pub get_output: bool,
    pub script_env_file: Option<String>,
}

impl Command {
    pub fn is_local(&self) -> bool {
        self.host.as_ref().is_none_or(|h| h.is_local())
    }

    pub fn host_alias(&self) -> &str {
        self.host.as_ref().map_or("localhost", |h| h.alias.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Hooks {
    pub before: Option<String>,
    pub after: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Templates {
    pub success: String,
    pub failure: String,
}

impl Default for Templates {
    fn default() -> Self {
        Self {
            success: DEFAULT_SUCCESS_TEMPLATE.to_string(),
            failure: DEFAULT_FAILURE_TEMPLATE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandList {
    pub name: String,
    pub display_name: String,
    pub cron: Option<String>,
    pub order: Vec<String>,
    pub notifications: Vec<String>,
    pub get_output: bool,
    pub hooks: Hooks,
    pub continue_on_error: bool,
    pub templates: Templates,
}

impl CommandList {
    pub fn has_cron(&self) -> bool {
        self.cron.as_deref().is_some_and(|c| !c.trim().is_empty())
    }

    fn from_raw(name: &str, raw: &RawList) -> Self {
        let defaults = Templates::default();
        Self {
            name: name.to_string(),
            display_name: raw
                .name
                .clone()
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| name.to_string()),
            cron: raw.cron.clone().filter(|c| !c.trim().is_empty()),
            order: raw.order.clone(),
            notifications: raw.notifications.clone(),
            get_output: raw.get_output,
            hooks: Hooks {
                before: raw.hooks.before.clone(),
                after: raw.hooks.after.clone(),
                error: raw.hooks.error.clone(),
            },
            continue_on_error: raw.continue_on_error,
            templates: Templates {
                success: raw.templates.success.clone().unwrap_or(defaults.success),
                failure: raw.templates.failure.clone().unwrap_or(defaults.failure),
            },
        }
    }

    /// Names of the hook lists this list refers to.
    pub fn hook_lists(&self) -> impl Iterator<Item = &str> {
        [&self.hooks.before, &self.hooks.after, &self.hooks.error]
            .into_iter()
            .filter_map(|h| h.as_deref())
    }
}

/// One notification endpoint. The transport is built later by the notifier.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationChannel {
    pub id: String,
    pub kind: String,
    pub config: BTreeMap<String, serde_yaml::Value>,
    pub enabled: bool,
}

/// Which part of the catalog the caller wants to keep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Selection {
    #[default]
    All,
    Lists(Vec<String>),
    Commands(Vec<String>),
}

/// Fully resolved configuration snapshot.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub commands: BTreeMap<String, Arc<Command>>,
    pub lists: BTreeMap<String, Arc<CommandList>>,
    pub hosts: BTreeMap<String, Arc<Host>>,
    pub notifications: BTreeMap<String, NotificationChannel>,
    pub logging: LoggingSection,
    pub global: GlobalSection,
    pub env: Arc<EnvOverlay>,
    /// Directory of the primary document (local documents only).
    pub config_dir: Option<PathBuf>,
}

impl Catalog {
    pub fn command(&self, name: &str) -> Result<&Arc<Command>> {
        self.commands
            .get(name)
            .ok_or_else(|| BackyError::missing("command", name))
    }

    pub fn list(&self, name: &str) -> Result<&Arc<CommandList>> {
        self.lists
            .get(name)
            .ok_or_else(|| BackyError::missing("list", name))
    }

    pub fn host(&self, alias: &str) -> Result<&Arc<Host>> {
        self.hosts
            .get(alias)
            .ok_or_else(|| BackyError::missing("host", alias))
    }

    /// Lists with a non-empty cron expression.
    pub fn cron_lists(&self) -> impl Iterator<Item = &Arc<CommandList>> {
        self.lists.values().filter(|l| l.has_cron())
    }
}

/// Options steering steps 8 and 9 of resolution.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    pub cron_mode: bool,
    pub selection: Selection,
}

/// Turn a parsed document into a [`Catalog`]: link hosts and proxy chains,
/// link commands, expand environment, validate and filter lists.
pub fn build_catalog(
    doc: RawDocument,
    env: EnvOverlay,
    config_dir: Option<PathBuf>,
    opts: &BuildOptions,
) -> Result<Catalog> {
    for (name, cmd) in doc.commands.iter() {
        validate_command(name, cmd)?;
    }
    for (name, list) in doc.cmd_configs.iter() {
        validate_list(name, list, &doc)?;
    }

    let hosts = link_hosts(&doc)?;
    let commands = link_commands(&doc, &hosts, &env)?;

    let mut lists: BTreeMap<String, Arc<CommandList>> = doc
        .cmd_configs
        .iter()
        .map(|(name, raw)| (name.clone(), Arc::new(CommandList::from_raw(name, raw))))
        .collect();

    if opts.cron_mode {
        let before = lists.len();
        let scheduled: Vec<&Arc<CommandList>> = lists.values().filter(|l| l.has_cron()).collect();
        // Hook lists stay reachable even without a cron of their own.
        let keep: BTreeSet<String> = scheduled
            .iter()
            .flat_map(|l| std::iter::once(l.name.as_str()).chain(l.hook_lists()))
            .map(str::to_string)
            .collect();
        let has_scheduled = !scheduled.is_empty();
        lists.retain(|name, _| keep.contains(name));
        debug!(dropped = before - lists.len(), "dropped lists without cron");
        if !has_scheduled {
            return Err(BackyError::ConfigError(
                "no lists with a cron expression found".to_string(),
            ));
        }
    }

    let notifications = doc
        .notifications
        .iter()
        .map(|(id, raw)| {
            (
                id.clone(),
                NotificationChannel {
                    id: id.clone(),
                    kind: raw.kind.clone(),
                    config: raw.config.clone(),
                    enabled: raw.enabled,
                },
            )
        })
        .collect();

    if let Some(mongo) = &doc.global.mongo
        && mongo.enabled
    {
        warn!("global.mongo is enabled but no MongoDB sink is available; metrics are kept in the metrics file");
    }

    let mut catalog = Catalog {
        commands,
        lists,
        hosts,
        notifications,
        logging: doc.logging,
        global: doc.global,
        env: Arc::new(env),
        config_dir,
    };

    apply_selection(&mut catalog, &opts.selection)?;

    info!(
        commands = catalog.commands.len(),
        lists = catalog.lists.len(),
        hosts = catalog.hosts.len(),
        notifications = catalog.notifications.len(),
        "configuration resolved"
    );

    Ok(catalog)
}

/// Create `Host`s for declared aliases plus stubs for every alias referenced
/// by a proxy jump or a command, then resolve proxy chains.
fn link_hosts(doc: &RawDocument) -> Result<BTreeMap<String, Arc<Host>>> {
    let mut drafts: BTreeMap<String, Host> = doc
        .hosts
        .iter()
        .map(|(alias, raw)| (alias.clone(), Host::from_raw(alias, raw)))
        .collect();

    let mut chains: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (alias, host) in drafts.iter() {
        let proxies = host.proxy_jump.as_deref().map(split_proxy_jump).unwrap_or_default();
        chains.insert(alias.clone(), proxies);
    }

    let referenced: BTreeSet<String> = chains
        .values()
        .flatten()
        .cloned()
        .chain(
            doc.commands
                .values()
                .filter_map(|c| c.host.as_deref())
                .map(str::trim)
                .filter(|h| !h.is_empty())
                .map(str::to_string),
        )
        .collect();

    for alias in referenced {
        if !drafts.contains_key(&alias) {
            debug!(host = %alias, "creating stub host for undeclared alias");
            drafts.insert(alias.clone(), Host::stub(&alias));
            chains.insert(alias, Vec::new());
        }
    }

    let order = proxy_link_order(&chains)?;

    let mut linked: BTreeMap<String, Arc<Host>> = BTreeMap::new();
    for alias in order {
        let Some(mut host) = drafts.remove(&alias) else {
            continue;
        };
        for proxy in chains.get(&alias).into_iter().flatten() {
            // Topological order guarantees proxies are linked first.
            let hop = linked
                .get(proxy)
                .cloned()
                .ok_or_else(|| BackyError::missing("host", proxy))?;
            host.proxy_chain.push(hop);
        }
        linked.insert(alias, Arc::new(host));
    }

    Ok(linked)
}

fn link_commands(
    doc: &RawDocument,
    hosts: &BTreeMap<String, Arc<Host>>,
    env: &EnvOverlay,
) -> Result<BTreeMap<String, Arc<Command>>> {
    let mut commands = BTreeMap::new();
    for (name, raw) in doc.commands.iter() {
        let command = build_command(name, raw, hosts, env)?;
        commands.insert(name.clone(), Arc::new(command));
    }
    Ok(commands)
}

fn build_command(
    name: &str,
    raw: &RawCommand,
    hosts: &BTreeMap<String, Arc<Host>>,
    env: &EnvOverlay,
) -> Result<Command> {
    let host = match raw.host.as_deref().map(str::trim).filter(|h| !h.is_empty()) {
        Some(alias) => Some(
            hosts
                .get(alias)
                .cloned()
                .ok_or_else(|| BackyError::missing("host", alias))?,
        ),
        None => None,
    };

    let kind = match raw.kind.unwrap_or_default() {
        CommandType::Shell => CommandKind::Shell {
            cmd: raw.cmd.clone(),
        },
        CommandType::Script => CommandKind::Script {
            body: raw.cmd.clone(),
        },
        CommandType::ScriptFile => CommandKind::ScriptFile {
            source: raw.cmd.clone(),
        },
        CommandType::RemoteScript => CommandKind::RemoteScript {
            source: raw.cmd.clone(),
        },
        CommandType::Package => {
            let pkg = raw
                .package
                .as_ref()
                .ok_or_else(|| BackyError::ConfigError(format!("command '{name}' has no package section")))?;
            warn_ignored_cmd(name, raw);
            CommandKind::Package(PackageSpec {
                manager: pkg.manager.clone(),
                operation: pkg.operation,
                packages: pkg
                    .packages
                    .iter()
                    .map(|p| PackageRef {
                        name: p.name.clone(),
                        version: p.version.clone(),
                    })
                    .collect(),
            })
        }
        CommandType::User => {
            let user = raw
                .user
                .as_ref()
                .ok_or_else(|| BackyError::ConfigError(format!("command '{name}' has no user section")))?;
            warn_ignored_cmd(name, raw);
            CommandKind::User(UserSpec {
                name: user.name.clone(),
                operation: user.operation,
                groups: user.groups.clone(),
                home: user.home.clone(),
                shell: user.shell.clone(),
                system: user.system,
                password: user.password.clone(),
            })
        }
    };

    let environment = raw
        .environment
        .iter()
        .filter_map(|entry| split_assignment(entry))
        .map(|(key, value)| {
            let value = if is_secret_token(value) {
                value.to_string()
            } else {
                env.expand(value)
            };
            (key.to_string(), value)
        })
        .collect();

    Ok(Command {
        name: name.to_string(),
        kind,
        args: raw.args.clone(),
        host,
        shell: raw.shell.clone().filter(|s| !s.trim().is_empty()),
        dir: raw.dir.as_deref().map(|d| PathBuf::from(shellexpand::tilde(d).as_ref())),
        env_file: raw.env.clone().filter(|e| !e.trim().is_empty()),
        environment,
        get_output: raw.get_output,
        script_env_file: raw.script_env_file.clone().filter(|e| !e.trim().is_empty()),
    })
}

fn warn_ignored_cmd(name: &str, raw: &RawCommand) {
    if !raw.cmd.trim().is_empty() {
        warn!(command = %name, "`cmd` is ignored for package and user commands");
    }
}

/// Keep only what the caller selected (plus what selected lists need).
fn apply_selection(catalog: &mut Catalog, selection: &Selection) -> Result<()> {
    match selection {
        Selection::All => Ok(()),
        Selection::Lists(names) => {
            let mut keep_lists: BTreeSet<String> = BTreeSet::new();
            for name in names {
                let list = catalog.list(name)?;
                keep_lists.insert(name.clone());
                keep_lists.extend(list.hook_lists().map(str::to_string));
            }

            catalog.lists.retain(|name, _| keep_lists.contains(name));

            let keep_commands: BTreeSet<String> = catalog
                .lists
                .values()
                .flat_map(|l| l.order.iter().cloned())
                .collect();
            catalog.commands.retain(|name, _| keep_commands.contains(name));
            Ok(())
        }
        Selection::Commands(names) => {
            for name in names {
                catalog.command(name)?;
            }
            catalog.commands.retain(|name, _| names.contains(name));
            catalog.lists.clear();
            Ok(())
        }
    }
}
