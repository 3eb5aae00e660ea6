// src/exec/builders.rs

//! Command builders for package and user management commands.

use crate::config::{PackageRef, PackageSpec, UserSpec};
use crate::errors::{BackyError, Result};
use crate::exec::command::shell_join;
use crate::types::{PackageOperation, UserOperation};

/// Turns a package spec into the argv of one package-manager call.
pub trait PackageManager: Send + Sync {
    fn name(&self) -> &str;

    fn argv(&self, spec: &PackageSpec) -> Result<Vec<String>>;
}

/// Look up a package manager by its configured name.
pub fn package_manager(name: &str) -> Result<Box<dyn PackageManager>> {
    let flavour = match name.trim().to_lowercase().as_str() {
        "apt" | "apt-get" => Flavour::Apt,
        "dnf" => Flavour::Dnf,
        "yum" => Flavour::Yum,
        "apk" => Flavour::Apk,
        "brew" => Flavour::Brew,
        other => {
            return Err(BackyError::ConfigError(format!(
                "unsupported package manager '{other}'"
            )));
        }
    };
    Ok(Box::new(SystemPackageManager { flavour }))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flavour {
    Apt,
    Dnf,
    Yum,
    Apk,
    Brew,
}

#[derive(Debug, Clone)]
pub struct SystemPackageManager {
    flavour: Flavour,
}

impl SystemPackageManager {
    fn pinned(&self, pkg: &PackageRef) -> String {
        match (&pkg.version, self.flavour) {
            (None, _) => pkg.name.clone(),
            (Some(v), Flavour::Apt) | (Some(v), Flavour::Apk) => format!("{}={}", pkg.name, v),
            (Some(v), Flavour::Dnf) | (Some(v), Flavour::Yum) => format!("{}-{}", pkg.name, v),
            (Some(v), Flavour::Brew) => format!("{}@{}", pkg.name, v),
        }
    }
}

fn words(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl PackageManager for SystemPackageManager {
    fn name(&self) -> &str {
        match self.flavour {
            Flavour::Apt => "apt",
            Flavour::Dnf => "dnf",
            Flavour::Yum => "yum",
            Flavour::Apk => "apk",
            Flavour::Brew => "brew",
        }
    }

    fn argv(&self, spec: &PackageSpec) -> Result<Vec<String>> {
        use Flavour::*;
        use PackageOperation::*;

        if spec.operation != UpgradeAll && spec.packages.is_empty() {
            return Err(BackyError::ConfigError(format!(
                "{} {:?} needs at least one package",
                self.name(),
                spec.operation
            )));
        }

        let pinned: Vec<String> = spec.packages.iter().map(|p| self.pinned(p)).collect();
        let names: Vec<String> = spec.packages.iter().map(|p| p.name.clone()).collect();

        let (mut argv, targets) = match (self.flavour, spec.operation) {
            (Apt, Install) => (words(&["apt-get", "install", "-y"]), pinned),
            (Apt, Remove) => (words(&["apt-get", "remove", "-y"]), names),
            (Apt, Upgrade) => (words(&["apt-get", "install", "--only-upgrade", "-y"]), names),
            (Apt, UpgradeAll) => (words(&["apt-get", "upgrade", "-y"]), vec![]),
            (Apt, CheckVersion) => (words(&["dpkg-query", "-W", "-f=${Package} ${Version}\\n"]), names),

            (Dnf | Yum, Install) => (words(&[self.name(), "install", "-y"]), pinned),
            (Dnf | Yum, Remove) => (words(&[self.name(), "remove", "-y"]), names),
            (Dnf | Yum, Upgrade) => (words(&[self.name(), "upgrade", "-y"]), names),
            (Dnf | Yum, UpgradeAll) => (words(&[self.name(), "upgrade", "-y"]), vec![]),
            (Dnf | Yum, CheckVersion) => (words(&["rpm", "-q"]), names),

            (Apk, Install) => (words(&["apk", "add"]), pinned),
            (Apk, Remove) => (words(&["apk", "del"]), names),
            (Apk, Upgrade) => (words(&["apk", "add", "--upgrade"]), names),
            (Apk, UpgradeAll) => (words(&["apk", "upgrade"]), vec![]),
            (Apk, CheckVersion) => (words(&["apk", "info", "-v"]), names),

            (Brew, Install) => (words(&["brew", "install"]), pinned),
            (Brew, Remove) => (words(&["brew", "uninstall"]), names),
            (Brew, Upgrade) => (words(&["brew", "upgrade"]), names),
            (Brew, UpgradeAll) => (words(&["brew", "upgrade"]), vec![]),
            (Brew, CheckVersion) => (words(&["brew", "list", "--versions"]), names),
        };

        argv.extend(targets);
        Ok(argv)
    }
}

/// Turns a user spec into a shell line.
pub trait UserManager: Send + Sync {
    /// `password` is the already-resolved plaintext, if any.
    fn command_line(&self, spec: &UserSpec, password: Option<&str>) -> Result<String>;
}

/// `useradd` / `usermod` / `userdel` / `id`, with `chpasswd` for passwords.
#[derive(Debug, Clone, Default)]
pub struct LinuxUserManager;

impl LinuxUserManager {
    fn steps(&self, spec: &UserSpec) -> Vec<Vec<String>> {
        let mut argv: Vec<String> = Vec::new();
        match spec.operation {
            UserOperation::Add => {
                argv.push("useradd".into());
                if spec.system {
                    argv.push("--system".into());
                } else {
                    argv.push("--create-home".into());
                }
                if let Some(home) = &spec.home {
                    argv.extend(["--home-dir".into(), home.clone()]);
                }
                if let Some(shell) = &spec.shell {
                    argv.extend(["--shell".into(), shell.clone()]);
                }
                if !spec.groups.is_empty() {
                    argv.extend(["--groups".into(), spec.groups.join(",")]);
                }
            }
            UserOperation::Modify => {
                argv.push("usermod".into());
                if let Some(home) = &spec.home {
                    argv.extend(["--home".into(), home.clone(), "--move-home".into()]);
                }
                if let Some(shell) = &spec.shell {
                    argv.extend(["--shell".into(), shell.clone()]);
                }
                if !spec.groups.is_empty() {
                    argv.extend(["--append".into(), "--groups".into(), spec.groups.join(",")]);
                }
            }
            UserOperation::Remove => {
                argv.extend(["userdel".into(), "--remove".into()]);
            }
            UserOperation::Check => {
                argv.push("id".into());
            }
        }
        argv.push(spec.name.clone());
        vec![argv]
    }
}

impl UserManager for LinuxUserManager {
    fn command_line(&self, spec: &UserSpec, password: Option<&str>) -> Result<String> {
        if spec.name.trim().is_empty() {
            return Err(BackyError::ConfigError("user command needs a user name".to_string()));
        }

        let mut parts: Vec<String> = self
            .steps(spec)
            .iter()
            .map(|argv| shell_join(argv.iter().map(String::as_str)))
            .collect();

        let sets_password = matches!(spec.operation, UserOperation::Add | UserOperation::Modify);
        if let Some(password) = password.filter(|_| sets_password) {
            let entry = format!("{}:{}", spec.name, password);
            parts.push(format!("printf '%s\\n' {} | chpasswd", shell_join([entry.as_str()])));
        }

        Ok(parts.join(" && "))
    }
}
