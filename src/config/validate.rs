// src/config/validate.rs

use std::collections::BTreeMap;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{RawCommand, RawDocument, RawList};
use crate::errors::{BackyError, Result};
use crate::schedule::parse_cron;
use crate::types::CommandType;

/// Document keys that must be present in every primary document.
pub const REQUIRED_KEYS: &[&str] = &["commands"];

pub fn check_required_keys(doc: &serde_yaml::Value) -> Result<()> {
    let Some(map) = doc.as_mapping() else {
        return Err(BackyError::ConfigError(
            "configuration document must be a mapping".to_string(),
        ));
    };

    let missing: Vec<&str> = REQUIRED_KEYS
        .iter()
        .copied()
        .filter(|key| !map.contains_key(*key))
        .collect();

    if !missing.is_empty() {
        return Err(BackyError::ConfigError(format!(
            "missing required key(s): {}",
            missing.join(", ")
        )));
    }
    Ok(())
}

/// Split a `proxyjump` specifier into aliases, dropping empty items.
pub fn split_proxy_jump(spec: &str) -> Vec<String> {
    spec.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Check the host → proxy graph for cycles and return aliases in an order
/// where every proxy precedes the hosts that jump through it.
///
/// `chains` maps every known alias (including stubs) to its proxy aliases.
pub fn proxy_link_order(chains: &BTreeMap<String, Vec<String>>) -> Result<Vec<String>> {
    // Edge direction: proxy -> host.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for alias in chains.keys() {
        graph.add_node(alias.as_str());
    }

    for (alias, proxies) in chains.iter() {
        for proxy in proxies {
            if proxy == alias {
                return Err(BackyError::ProxyCycle(alias.clone()));
            }
            graph.add_edge(proxy.as_str(), alias.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(order) => Ok(order.into_iter().map(str::to_string).collect()),
        Err(cycle) => Err(BackyError::ProxyCycle(cycle.node_id().to_string())),
    }
}

/// Per-command invariants that do not depend on other sections.
pub fn validate_command(name: &str, cmd: &RawCommand) -> Result<()> {
    let kind = cmd.kind.unwrap_or_default();

    match kind {
        CommandType::RemoteScript => {
            let has_host = cmd.host.as_deref().is_some_and(|h| !h.trim().is_empty());
            if !has_host {
                return Err(BackyError::ConfigError(format!(
                    "command '{name}' is a remoteScript and must set `host`"
                )));
            }
        }
        CommandType::Package if cmd.package.is_none() => {
            return Err(BackyError::ConfigError(format!(
                "command '{name}' is a package command and needs a `package` section"
            )));
        }
        CommandType::User if cmd.user.is_none() => {
            return Err(BackyError::ConfigError(format!(
                "command '{name}' is a user command and needs a `user` section"
            )));
        }
        CommandType::Shell | CommandType::Script | CommandType::ScriptFile => {
            if cmd.cmd.trim().is_empty() {
                return Err(BackyError::ConfigError(format!(
                    "command '{name}' has an empty `cmd`"
                )));
            }
        }
        _ => {}
    }

    for entry in &cmd.environment {
        if crate::config::env::split_assignment(entry).is_none() {
            return Err(BackyError::ConfigError(format!(
                "command '{name}' has an environment entry without KEY=value: '{entry}'"
            )));
        }
    }

    Ok(())
}

/// Every command, hook and notification named by a list must exist, and
/// cron expressions must parse.
pub fn validate_list(name: &str, list: &RawList, doc: &RawDocument) -> Result<()> {
    for cmd in &list.order {
        if !doc.commands.contains_key(cmd) {
            return Err(BackyError::ConfigError(format!(
                "list '{name}' references unknown command '{cmd}'"
            )));
        }
    }

    let hooks = [
        ("before", &list.hooks.before),
        ("after", &list.hooks.after),
        ("error", &list.hooks.error),
    ];
    for (which, hook) in hooks {
        if let Some(hook) = hook.as_deref() {
            if hook == name {
                return Err(BackyError::ConfigError(format!(
                    "list '{name}' cannot use itself as its {which} hook"
                )));
            }
            if !doc.cmd_configs.contains_key(hook) {
                return Err(BackyError::ConfigError(format!(
                    "list '{name}' has unknown {which} hook list '{hook}'"
                )));
            }
        }
    }

    for channel in &list.notifications {
        if !doc.notifications.contains_key(channel) {
            return Err(BackyError::ConfigError(format!(
                "list '{name}' references unknown notification '{channel}'"
            )));
        }
    }

    if let Some(expr) = list.cron.as_deref().filter(|c| !c.trim().is_empty()) {
        parse_cron(expr).map_err(|e| {
            BackyError::ConfigError(format!("list '{name}' has an invalid cron expression: {e}"))
        })?;
    }

    Ok(())
}
