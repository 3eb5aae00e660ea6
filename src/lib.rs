// src/lib.rs

pub mod cli;
pub mod config;
pub mod errors;
pub mod exec;
pub mod fetch;
pub mod hosts;
pub mod logging;
pub mod metrics;
pub mod notify;
pub mod schedule;
pub mod secrets;
pub mod types;

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::{CliArgs, Commands, RunTarget};
use crate::config::loader::peek;
use crate::config::{Catalog, ResolveOptions, Selection};
use crate::errors::{BackyError, Result};
use crate::exec::{ExecOptions, Executor, RealExecutorBackend};
use crate::fetch::cache::Cache;
use crate::fetch::http::ReqwestHttpClient;
use crate::fetch::object_store::HttpObjectStore;
use crate::fetch::{CachedFetcher, Fetcher};
use crate::hosts::{HostManager, RusshConnector};
use crate::metrics::Metrics;
use crate::notify::{Notifier, TransportDeps, TransportRegistry};
use crate::secrets::{NoSecrets, SecretResolver, StaticSecrets};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Text printed by the `version` subcommand.
pub fn version_string(num: bool, vpre: bool) -> String {
    if num {
        format!("{VERSION}\n")
    } else if vpre {
        format!("v{VERSION}\n")
    } else {
        format!("Backy version: {VERSION}\n")
    }
}

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - fetcher + cache
/// - configuration resolution
/// - secrets, metrics, notifier
/// - SSH host manager and executor backend
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let (cron_mode, selection) = match &args.command {
        Commands::Version { num, vpre } => {
            print!("{}", version_string(*num, *vpre));
            return Ok(());
        }
        Commands::Run {
            target: RunTarget::List { name, .. },
        } => (false, Selection::Lists(vec![name.clone()])),
        Commands::Run {
            target: RunTarget::Cmds { names, .. },
        } => (false, Selection::Commands(names.clone())),
        Commands::Cron => (true, Selection::All),
        Commands::Validate => (false, Selection::All),
    };

    let preamble = peek(args.config.as_deref());

    let http = ReqwestHttpClient::new().map_err(|e| anyhow::anyhow!(e))?;
    let object_store = Arc::new(HttpObjectStore::from_env(http.clone()));
    let cache = open_cache(args.cache_dir.clone().or_else(|| {
        preamble
            .global
            .cache_dir
            .as_deref()
            .map(|d| PathBuf::from(shellexpand::tilde(d).as_ref()))
    }));
    let fetcher = Arc::new(CachedFetcher::new(
        Fetcher::new(Arc::new(http.clone()), Some(object_store)),
        cache,
    ));

    let opts = ResolveOptions {
        config: args.config.clone(),
        cron_mode,
        selection,
    };
    let catalog = Arc::new(config::resolve(&opts, &fetcher).await?);

    if let Commands::Validate = args.command {
        print_validation(&catalog);
        return Ok(());
    }

    let secrets: Arc<dyn SecretResolver> = match &args.secrets {
        Some(path) => Arc::new(StaticSecrets::from_file(path)?),
        None => Arc::new(NoSecrets),
    };

    let metrics_path = metrics_path(args.metrics.clone(), &catalog);
    let metrics = match Metrics::load(&metrics_path) {
        Ok(m) => Arc::new(m),
        Err(e) => {
            warn!(path = ?metrics_path, error = %e, "could not read metrics; starting fresh");
            Arc::new(Metrics::new())
        }
    };

    let deps = TransportDeps {
        http: http.inner().clone(),
        secrets: secrets.clone(),
    };
    let notifier = Arc::new(Notifier::from_catalog(
        &catalog,
        &TransportRegistry::with_builtins(),
        &deps,
    ));

    let hosts = Arc::new(HostManager::new(Arc::new(RusshConnector::new()), secrets.clone()));
    let backend = Arc::new(RealExecutorBackend::new(hosts).echo_stdout(catalog.logging.cmd_std_out));

    // Ctrl-C → cooperative cancellation.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            info!("interrupt received; shutting down");
            cancel.cancel();
        });
    }

    let executor = Executor::new(catalog, backend, fetcher)
        .with_secrets(secrets)
        .with_metrics(metrics)
        .with_notifier(notifier)
        .with_options(ExecOptions {
            max_concurrency: args.max_concurrency,
            metrics_path: Some(metrics_path),
        })
        .with_cancel(cancel);

    let outcome = dispatch(&executor, &args.command).await;
    executor.shutdown().await;

    match outcome {
        Err(e) if e.is_cancelled() => {
            info!("run cancelled");
            Ok(())
        }
        other => other,
    }
}

async fn dispatch(executor: &Executor, command: &Commands) -> Result<()> {
    match command {
        Commands::Run {
            target: RunTarget::List { name, hosts },
        } => {
            let failed: Vec<String> = if hosts.is_empty() {
                let summary = executor.exec_list(name).await?;
                (!summary.success).then(|| name.clone()).into_iter().collect()
            } else {
                executor
                    .exec_list_on_hosts(name, hosts)
                    .await?
                    .into_iter()
                    .filter(|s| !s.success)
                    .map(|s| format!("{}@{}", name, s.host.unwrap_or_default()))
                    .collect()
            };
            if failed.is_empty() {
                Ok(())
            } else {
                Err(BackyError::CommandFailed {
                    name: failed.join(", "),
                    message: "list did not succeed".to_string(),
                })
            }
        }
        Commands::Run {
            target: RunTarget::Cmds { names, hosts },
        } => {
            let failed: Vec<String> = if hosts.is_empty() {
                executor
                    .exec_cmds(names)
                    .await?
                    .into_iter()
                    .filter(|r| !r.success)
                    .map(|r| r.name)
                    .collect()
            } else {
                executor
                    .exec_cmds_on_hosts(names, hosts)
                    .await?
                    .into_iter()
                    .flat_map(|report| report.results)
                    .filter(|r| !r.success)
                    .map(|r| format!("{}@{}", r.name, r.host))
                    .collect()
            };
            if failed.is_empty() {
                Ok(())
            } else {
                Err(BackyError::CommandFailed {
                    name: failed.join(", "),
                    message: "command did not succeed".to_string(),
                })
            }
        }
        Commands::Cron => executor.cron_run().await,
        Commands::Version { .. } | Commands::Validate => Ok(()),
    }
}

fn open_cache(dir: Option<PathBuf>) -> Option<Arc<Cache>> {
    let dir = dir.or_else(|| dirs::cache_dir().map(|d| d.join("backy")))?;
    match Cache::open(&dir) {
        Ok(cache) => Some(Arc::new(cache)),
        Err(e) => {
            warn!(dir = ?dir, error = %e, "cache unavailable; fetching from origin only");
            None
        }
    }
}

fn metrics_path(explicit: Option<PathBuf>, catalog: &Catalog) -> PathBuf {
    explicit
        .or_else(|| {
            catalog
                .global
                .metrics_file
                .as_deref()
                .map(|p| PathBuf::from(shellexpand::tilde(p).as_ref()))
        })
        .or_else(|| dirs::data_dir().map(|d| d.join("backy").join("metrics.yml")))
        .unwrap_or_else(|| PathBuf::from("backy-metrics.yml"))
}

fn print_validation(catalog: &Catalog) {
    println!("configuration OK");
    println!("  commands: {}", catalog.commands.len());
    println!("  lists: {}", catalog.lists.len());
    for list in catalog.lists.values() {
        match &list.cron {
            Some(cron) => println!("    - {} [{}] ({} commands)", list.name, cron, list.order.len()),
            None => println!("    - {} ({} commands)", list.name, list.order.len()),
        }
    }
    println!("  hosts: {}", catalog.hosts.len());
    for host in catalog.hosts.values() {
        let via = host.proxy_aliases();
        if via.is_empty() {
            println!("    - {} -> {}:{}", host.alias, host.hostname(), host.port());
        } else {
            println!("    - {} -> {}:{} via {}", host.alias, host.hostname(), host.port(), via.join(" -> "));
        }
    }
    println!("  notifications: {}", catalog.notifications.len());
}
