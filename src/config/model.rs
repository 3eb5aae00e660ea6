// src/config/model.rs

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::types::{CommandType, PackageOperation, UserOperation};

/// Top-level configuration document as read from YAML.
///
/// ```yaml
/// logging:
///   verbose: true
///
/// commands:
///   backup-db:
///     cmd: pg_dump
///     args: ["-Fc", "app"]
///     host: db
///
/// cmd-configs:
///   nightly:
///     cron: "0 0 2 * * *"
///     order: [backup-db]
///     notifications: [ops]
///
/// hosts:
///   db:
///     hostname: db.internal
///     proxyjump: bastion
/// ```
///
/// Sections other than `commands` are optional.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawDocument {
    #[serde(default)]
    pub logging: LoggingSection,

    #[serde(default)]
    pub commands: BTreeMap<String, RawCommand>,

    /// Command lists, keyed by list name.
    #[serde(default, rename = "cmd-configs")]
    pub cmd_configs: BTreeMap<String, RawList>,

    #[serde(default)]
    pub hosts: BTreeMap<String, RawHost>,

    #[serde(default)]
    pub notifications: BTreeMap<String, RawNotification>,

    #[serde(default)]
    pub global: GlobalSection,
}

/// `logging:` section.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingSection {
    /// Lower the default log level to `debug`.
    #[serde(default)]
    pub verbose: bool,

    /// Also write logs to this file.
    #[serde(default)]
    pub file: Option<String>,

    #[serde(default, rename = "console-disabled")]
    pub console_disabled: bool,

    /// Echo un-captured command output on stdout.
    #[serde(default, rename = "cmd-std-out")]
    pub cmd_std_out: bool,
}

/// `global:` section.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct GlobalSection {
    #[serde(default)]
    pub mongo: Option<MongoSection>,

    #[serde(default, rename = "cache-dir")]
    pub cache_dir: Option<String>,

    #[serde(default, rename = "metrics-file")]
    pub metrics_file: Option<String>,
}

/// `global.mongo:`; parsed so that configs carrying it stay valid.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct MongoSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub prod: bool,
    #[serde(default)]
    pub env: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// `commands.<name>:`
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawCommand {
    /// Command text; for scripts the inline body, for script files the source.
    #[serde(default)]
    pub cmd: String,

    #[serde(default, rename = "type")]
    pub kind: Option<CommandType>,

    #[serde(default)]
    pub host: Option<String>,

    #[serde(default)]
    pub shell: Option<String>,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub dir: Option<String>,

    /// Path (or URI) of a dotenv file loaded before the command runs.
    #[serde(default)]
    pub env: Option<String>,

    /// Inline `KEY=value` entries.
    #[serde(default)]
    pub environment: Vec<String>,

    #[serde(default, rename = "getOutput")]
    pub get_output: bool,

    #[serde(default, rename = "scriptEnvFile")]
    pub script_env_file: Option<String>,

    #[serde(default)]
    pub package: Option<RawPackage>,

    #[serde(default)]
    pub user: Option<RawUser>,
}

/// `commands.<name>.package:`
#[derive(Debug, Clone, Deserialize)]
pub struct RawPackage {
    #[serde(default = "default_package_manager")]
    pub manager: String,
    pub operation: PackageOperation,
    #[serde(default)]
    pub packages: Vec<RawPackageItem>,
}

fn default_package_manager() -> String {
    "apt".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawPackageItem {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

/// `commands.<name>.user:`
#[derive(Debug, Clone, Deserialize)]
pub struct RawUser {
    pub name: String,
    pub operation: UserOperation,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub home: Option<String>,
    #[serde(default)]
    pub shell: Option<String>,
    #[serde(default)]
    pub system: bool,
    /// Password or `vault:` token; resolved at execution time.
    #[serde(default)]
    pub password: Option<String>,
}

/// `cmd-configs.<name>:`
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawList {
    /// Display name; defaults to the key.
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub cron: Option<String>,

    #[serde(default)]
    pub order: Vec<String>,

    #[serde(default)]
    pub notifications: Vec<String>,

    #[serde(default, rename = "getOutput")]
    pub get_output: bool,

    #[serde(default)]
    pub hooks: RawHooks,

    /// Keep running the remaining commands after a failure.
    #[serde(default, rename = "continueOnError")]
    pub continue_on_error: bool,

    #[serde(default)]
    pub templates: RawTemplates,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawHooks {
    #[serde(default)]
    pub before: Option<String>,
    #[serde(default)]
    pub after: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawTemplates {
    #[serde(default)]
    pub success: Option<String>,
    #[serde(default)]
    pub failure: Option<String>,
}

/// `hosts.<alias>:`
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawHost {
    /// Alternate spelling of `hostname`.
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub privatekeypath: Option<String>,
    #[serde(default)]
    pub privatekeypassword: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub proxyjump: Option<String>,
    #[serde(default)]
    pub knownhostsfile: Option<String>,
    #[serde(default)]
    pub configfilepath: Option<String>,
}

/// `notifications.<id>:`
#[derive(Debug, Clone, Deserialize)]
pub struct RawNotification {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Transport-specific keys, passed through untouched.
    #[serde(flatten)]
    pub config: BTreeMap<String, serde_yaml::Value>,
}

fn default_enabled() -> bool {
    true
}

/// One entry of a `$include` list inside `cmd-configs` or `hosts`.
#[derive(Debug, Clone, Deserialize)]
pub struct IncludeSpec {
    pub source: String,
    #[serde(default, rename = "ignoreNotFound")]
    pub ignore_not_found: bool,
    #[serde(default, rename = "type")]
    pub file_type: Option<String>,
}
