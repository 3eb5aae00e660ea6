// src/types.rs

use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;

use serde::Deserialize;

/// Boxed, sendable future used at the trait seams (executor backend, SSH
/// sessions, HTTP and object-store transports, notification transports).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The `type` field of a command as written in the configuration document.
///
/// An empty or missing `type` means a plain shell command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
pub enum CommandType {
    #[default]
    #[serde(rename = "shell", alias = "")]
    Shell,
    #[serde(rename = "script")]
    Script,
    #[serde(rename = "scriptFile")]
    ScriptFile,
    #[serde(rename = "remoteScript")]
    RemoteScript,
    #[serde(rename = "package")]
    Package,
    #[serde(rename = "user")]
    User,
}

/// Operation requested from a package manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum PackageOperation {
    Install,
    Remove,
    Upgrade,
    UpgradeAll,
    CheckVersion,
}

impl FromStr for PackageOperation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "install" => Ok(PackageOperation::Install),
            "remove" => Ok(PackageOperation::Remove),
            "upgrade" => Ok(PackageOperation::Upgrade),
            "upgrade-all" | "upgradeall" => Ok(PackageOperation::UpgradeAll),
            "check-version" | "checkversion" => Ok(PackageOperation::CheckVersion),
            other => Err(format!(
                "invalid package operation: {other} (expected install, remove, upgrade, upgrade-all or check-version)"
            )),
        }
    }
}

impl TryFrom<String> for PackageOperation {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Operation requested from the user manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum UserOperation {
    Add,
    Remove,
    Modify,
    Check,
}

impl FromStr for UserOperation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "add" => Ok(UserOperation::Add),
            "remove" => Ok(UserOperation::Remove),
            "modify" => Ok(UserOperation::Modify),
            "check" => Ok(UserOperation::Check),
            other => Err(format!(
                "invalid user operation: {other} (expected add, remove, modify or check)"
            )),
        }
    }
}

impl TryFrom<String> for UserOperation {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Which metrics map an update belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Command,
    List,
}
