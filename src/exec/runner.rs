// src/exec/runner.rs

//! The executor: turns catalog entries into invocations, runs them through
//! an [`ExecutorBackend`], records metrics, runs hooks and notifies.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::env::parse_dotenv;
use crate::config::{Catalog, Command, CommandKind, CommandList, Host};
use crate::errors::{BackyError, Result};
use crate::exec::backend::ExecutorBackend;
use crate::exec::builders::{LinuxUserManager, UserManager, package_manager};
use crate::exec::command::{DEFAULT_SHELL, Destination, Invocation, Payload};
use crate::exec::summary::{CommandResult, HookRun, ListSummary};
use crate::fetch::{CachedFetcher, FetchOptions, Source};
use crate::metrics::Metrics;
use crate::notify::Notifier;
use crate::schedule::{CronScheduler, Job};
use crate::secrets::{NoSecrets, SecretResolver, resolve_value};
use crate::types::{BoxFuture, MetricKind};

#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Upper bound on commands running at once; `None` is unlimited.
    pub max_concurrency: Option<usize>,
    /// Where metrics are saved after every list run.
    pub metrics_path: Option<PathBuf>,
}

/// Per-host outcome of [`Executor::exec_cmds_on_hosts`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostReport {
    pub host: String,
    pub results: Vec<CommandResult>,
}

impl HostReport {
    pub fn success(&self) -> bool {
        self.results.iter().all(|r| r.success)
    }
}

/// Which host a command runs on and what its metrics are filed under.
#[derive(Debug, Clone)]
struct Target {
    /// `None` means "wherever the command says".
    host: Option<Destination>,
}

impl Target {
    fn own() -> Self {
        Self { host: None }
    }

    fn fixed(dest: Destination) -> Self {
        Self { host: Some(dest) }
    }

    fn destination(&self, cmd: &Command) -> Destination {
        self.host
            .clone()
            .unwrap_or_else(|| Destination::for_host(cmd.host.as_ref()))
    }

    fn metric_key(&self, name: &str) -> String {
        match &self.host {
            Some(dest) => format!("{}@{}", name, dest.alias()),
            None => name.to_string(),
        }
    }

    fn host_label(&self) -> Option<String> {
        self.host.as_ref().map(|d| d.alias().to_string())
    }
}

/// Cheap to clone; clones share everything.
#[derive(Clone)]
pub struct Executor {
    catalog: Arc<Catalog>,
    backend: Arc<dyn ExecutorBackend>,
    fetcher: Arc<CachedFetcher>,
    secrets: Arc<dyn SecretResolver>,
    users: Arc<dyn UserManager>,
    metrics: Arc<Metrics>,
    notifier: Arc<Notifier>,
    options: ExecOptions,
    limit: Option<Arc<Semaphore>>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Executor {
    pub fn new(catalog: Arc<Catalog>, backend: Arc<dyn ExecutorBackend>, fetcher: Arc<CachedFetcher>) -> Self {
        Self {
            catalog,
            backend,
            fetcher,
            secrets: Arc::new(NoSecrets),
            users: Arc::new(LinuxUserManager),
            metrics: Arc::new(Metrics::new()),
            notifier: Arc::new(Notifier::empty()),
            options: ExecOptions::default(),
            limit: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_secrets(mut self, secrets: Arc<dyn SecretResolver>) -> Self {
        self.secrets = secrets;
        self
    }

    pub fn with_user_manager(mut self, users: Arc<dyn UserManager>) -> Self {
        self.users = users;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_options(mut self, options: ExecOptions) -> Self {
        self.limit = options
            .max_concurrency
            .filter(|n| *n > 0)
            .map(|n| Arc::new(Semaphore::new(n)));
        self.options = options;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Close sessions held by the backend.
    pub async fn shutdown(&self) {
        self.backend.shutdown().await;
    }

    /// Run commands in order, each on its own host. Stops at the first
    /// failure.
    pub async fn exec_cmds(&self, names: &[String]) -> Result<Vec<CommandResult>> {
        let commands = self.lookup_commands(names)?;
        self.run_sequence(&commands, &Target::own(), false, true).await
    }

    /// Run the command sequence on every host; hosts run concurrently.
    pub async fn exec_cmds_on_hosts(&self, names: &[String], aliases: &[String]) -> Result<Vec<HostReport>> {
        let commands = self.lookup_commands(names)?;
        let mut set = JoinSet::new();

        for alias in aliases {
            let dest = self.destination_for_alias(alias);
            let this = self.clone();
            let commands = commands.clone();
            let alias = alias.clone();
            set.spawn(async move {
                let results = this
                    .run_sequence(&commands, &Target::fixed(dest), false, true)
                    .await;
                (alias, results)
            });
        }

        let mut reports = Vec::new();
        while let Some(joined) = set.join_next().await {
            let (host, results) = joined.map_err(|e| anyhow::anyhow!("host task failed: {e}"))?;
            reports.push(HostReport {
                host,
                results: results?,
            });
        }
        reports.sort_by(|a, b| a.host.cmp(&b.host));
        Ok(reports)
    }

    /// Run one list with its hooks, notifications and metrics.
    pub async fn exec_list(&self, name: &str) -> Result<ListSummary> {
        let list = self.catalog.list(name)?.clone();
        self.run_list(&list, Target::own()).await
    }

    /// Run a list on each host concurrently.
    pub async fn exec_list_on_hosts(&self, name: &str, aliases: &[String]) -> Result<Vec<ListSummary>> {
        let list = self.catalog.list(name)?.clone();
        let mut set = JoinSet::new();

        for alias in aliases {
            let target = Target::fixed(self.destination_for_alias(alias));
            let this = self.clone();
            let list = list.clone();
            set.spawn(async move { this.run_list(&list, target).await });
        }

        let mut summaries = Vec::new();
        while let Some(joined) = set.join_next().await {
            let summary = joined.map_err(|e| anyhow::anyhow!("host task failed: {e}"))??;
            summaries.push(summary);
        }
        summaries.sort_by(|a, b| a.host.cmp(&b.host));
        Ok(summaries)
    }

    /// Hand every cron list to a scheduler and block until cancelled.
    pub async fn cron_run(&self) -> Result<()> {
        let scheduler = self.build_scheduler()?;
        if scheduler.is_empty() {
            return Err(BackyError::ConfigError(
                "no lists with a cron expression found".to_string(),
            ));
        }
        info!(jobs = scheduler.len(), "starting cron scheduler");
        scheduler.start_blocking(self.cancel.clone()).await;
        Ok(())
    }

    pub fn build_scheduler(&self) -> Result<CronScheduler> {
        let mut scheduler = CronScheduler::new();
        for list in self.catalog.cron_lists() {
            let Some(expr) = list.cron.as_deref() else {
                continue;
            };
            let this = self.clone();
            let name = list.name.clone();
            let job: Job = Arc::new(move || -> BoxFuture<'static, ()> {
                let this = this.clone();
                let name = name.clone();
                Box::pin(async move {
                    match this.exec_list(&name).await {
                        Ok(summary) if summary.success => info!(list = %name, "scheduled run succeeded"),
                        Ok(_) => warn!(list = %name, "scheduled run failed"),
                        Err(e) if e.is_cancelled() => debug!(list = %name, "scheduled run cancelled"),
                        Err(e) => error!(list = %name, error = %e, "scheduled run error"),
                    }
                })
            });
            scheduler.register(list.name.clone(), expr, job)?;
        }
        Ok(scheduler)
    }

    fn lookup_commands(&self, names: &[String]) -> Result<Vec<Arc<Command>>> {
        names
            .iter()
            .map(|n| self.catalog.command(n).cloned())
            .collect()
    }

    fn destination_for_alias(&self, alias: &str) -> Destination {
        match self.catalog.hosts.get(alias) {
            Some(host) => Destination::for_host(Some(host)),
            None => {
                debug!(host = %alias, "undeclared host; using a stub");
                Destination::for_host(Some(&Arc::new(Host::stub(alias))))
            }
        }
    }

    async fn run_list(&self, list: &CommandList, target: Target) -> Result<ListSummary> {
        let started = Instant::now();
        let host_label = target.host_label();
        info!(list = %list.name, host = ?host_label, "running list");

        let commands: Vec<Arc<Command>> = list
            .order
            .iter()
            .map(|n| self.catalog.command(n).cloned())
            .collect::<Result<_>>()?;

        let mut hooks = Vec::new();
        let mut results = Vec::new();
        let mut success = true;

        if let Some(before) = &list.hooks.before {
            let run = self.run_hook("before", before, &target, list.get_output).await?;
            success = run.success();
            hooks.push(run);
        }

        if success {
            results = self
                .run_sequence(&commands, &target, list.get_output, !list.continue_on_error)
                .await?;
            success = results.iter().all(|r| r.success);
        } else {
            warn!(list = %list.name, "before hook failed; skipping list commands");
        }

        if success {
            if let Some(after) = &list.hooks.after {
                let run = self.run_hook("after", after, &target, list.get_output).await?;
                success = run.success();
                hooks.push(run);
            }
        } else if let Some(on_error) = &list.hooks.error {
            let run = self.run_hook("error", on_error, &target, list.get_output).await?;
            if !run.success() {
                warn!(list = %list.name, hook = %on_error, "error hook failed");
            }
            hooks.push(run);
        }

        let duration = started.elapsed();
        self.metrics.update(
            MetricKind::List,
            &target.metric_key(&list.name),
            success,
            duration,
            Utc::now(),
        );

        let summary = ListSummary {
            list: list.name.clone(),
            display_name: list.display_name.clone(),
            host: host_label,
            success,
            duration,
            results,
            hooks,
        };

        if success {
            info!(list = %list.name, host = ?summary.host, "list succeeded");
        } else {
            error!(list = %list.name, host = ?summary.host, failed = summary.failed_commands().count(), "list failed");
        }

        self.notify(list, &summary).await;
        self.save_metrics();

        Ok(summary)
    }

    /// Hook lists run their commands only: no nested hooks or notifications.
    async fn run_hook(&self, stage: &'static str, name: &str, target: &Target, capture: bool) -> Result<HookRun> {
        let hook = self.catalog.list(name)?.clone();
        debug!(hook = %name, stage, "running hook list");
        let commands: Vec<Arc<Command>> = hook
            .order
            .iter()
            .map(|n| self.catalog.command(n).cloned())
            .collect::<Result<_>>()?;
        let results = self
            .run_sequence(&commands, target, capture || hook.get_output, !hook.continue_on_error)
            .await?;
        Ok(HookRun {
            stage,
            list: hook.name.clone(),
            results,
        })
    }

    async fn run_sequence(
        &self,
        commands: &[Arc<Command>],
        target: &Target,
        capture: bool,
        stop_on_error: bool,
    ) -> Result<Vec<CommandResult>> {
        let mut results = Vec::with_capacity(commands.len());
        for cmd in commands {
            let result = self.run_command(cmd, target, capture).await?;
            let failed = !result.success;
            results.push(result);
            if failed && stop_on_error {
                break;
            }
        }
        Ok(results)
    }

    /// Errors only on cancellation; every other problem is a failed result.
    async fn run_command(&self, cmd: &Command, target: &Target, capture: bool) -> Result<CommandResult> {
        if self.cancel.is_cancelled() {
            return Err(BackyError::Cancelled);
        }

        let _permit = match &self.limit {
            Some(limit) => Some(
                limit
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| BackyError::Cancelled)?,
            ),
            None => None,
        };

        let dest = target.destination(cmd);
        let host = dest.alias().to_string();
        let key = target.metric_key(&cmd.name);
        let started = Instant::now();
        info!(command = %cmd.name, host = %host, kind = cmd.kind.label(), "running command");

        let outcome = match self.prepare(cmd, dest, capture).await {
            Ok(invocation) => self.backend.run(invocation, self.cancel.clone()).await,
            Err(e) => Err(e),
        };

        let duration = started.elapsed();
        let result = match outcome {
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                error!(command = %cmd.name, host = %host, error = %e, "command could not run");
                CommandResult::failed(&cmd.name, &host, duration, e.to_string())
            }
            Ok(out) => {
                let success = out.success();
                let output = (capture || cmd.get_output).then(|| out.combined_output());
                if success {
                    info!(command = %cmd.name, host = %host, elapsed = ?duration, "command succeeded");
                } else {
                    error!(command = %cmd.name, host = %host, exit_code = ?out.exit_code, "command failed");
                }
                CommandResult {
                    name: cmd.name.clone(),
                    host: host.clone(),
                    success,
                    exit_code: out.exit_code,
                    duration,
                    output,
                    error: (!success).then(|| match out.exit_code {
                        Some(code) => format!("exit status {code}"),
                        None => "terminated without exit status".to_string(),
                    }),
                }
            }
        };

        self.metrics
            .update(MetricKind::Command, &key, result.success, duration, Utc::now());
        Ok(result)
    }

    /// Resolve environment, fetch scripts and build the payload.
    pub async fn prepare(&self, cmd: &Command, dest: Destination, capture: bool) -> Result<Invocation> {
        let env = self.resolve_env(cmd).await?;

        let payload = match &cmd.kind {
            CommandKind::Shell { cmd: line } => Payload::Line {
                line: line.clone(),
                args: cmd.args.clone(),
            },
            CommandKind::Script { body } => Payload::Stdin {
                script: body.clone(),
                args: cmd.args.clone(),
            },
            CommandKind::RemoteScript { .. } if !dest.is_remote() => {
                return Err(BackyError::CommandFailed {
                    name: cmd.name.clone(),
                    message: "remoteScript commands need a remote host".to_string(),
                });
            }
            CommandKind::ScriptFile { source } | CommandKind::RemoteScript { source } => Payload::Stdin {
                script: self.script_body(cmd, source).await?,
                args: cmd.args.clone(),
            },
            CommandKind::Package(spec) => Payload::Argv(package_manager(&spec.manager)?.argv(spec)?),
            CommandKind::User(spec) => {
                let password = spec
                    .password
                    .as_deref()
                    .map(|p| resolve_value(self.secrets.as_ref(), p))
                    .transpose()?;
                Payload::Line {
                    line: self.users.command_line(spec, password.as_deref())?,
                    args: Vec::new(),
                }
            }
        };

        let local = !dest.is_remote();
        Ok(Invocation {
            name: cmd.name.clone(),
            destination: dest,
            payload,
            env,
            shell: cmd
                .shell
                .clone()
                .filter(|_| local)
                .unwrap_or_else(|| DEFAULT_SHELL.to_string()),
            dir: cmd.dir.clone().filter(|_| local),
            capture: capture || cmd.get_output,
        })
    }

    /// Env file first, then inline entries; `vault:` values resolved.
    async fn resolve_env(&self, cmd: &Command) -> Result<Vec<(String, String)>> {
        let mut env: Vec<(String, String)> = Vec::new();

        if let Some(file) = &cmd.env_file {
            let bytes = self.fetch_relative(file, "env").await?;
            for (key, value) in parse_dotenv(&bytes)? {
                env.push((key, resolve_value(self.secrets.as_ref(), &value)?));
            }
        }

        for (key, value) in &cmd.environment {
            let value = resolve_value(self.secrets.as_ref(), value)?;
            match env.iter_mut().find(|(k, _)| k == key) {
                Some(slot) => slot.1 = value,
                None => env.push((key.clone(), value)),
            }
        }

        Ok(env)
    }

    /// Fetched script, with the script env file sourced in front of it.
    async fn script_body(&self, cmd: &Command, source: &str) -> Result<String> {
        let script = self.fetch_relative(source, "script").await?;
        let script = String::from_utf8_lossy(&script).into_owned();

        let Some(env_source) = &cmd.script_env_file else {
            return Ok(script);
        };
        let env = self.fetch_relative(env_source, "env").await?;
        let env = String::from_utf8_lossy(&env);
        Ok(format!("set -a\n{}\nset +a\n{}", env.trim_end(), script))
    }

    /// Fetch through the cache; relative local paths are taken from the
    /// configuration directory.
    async fn fetch_relative(&self, source: &str, file_type: &str) -> Result<Vec<u8>> {
        let uri = match (Source::parse(source), &self.catalog.config_dir) {
            (Source::Local(path), Some(dir)) if is_relative(path) => {
                dir.join(path).to_string_lossy().into_owned()
            }
            _ => source.to_string(),
        };
        let opts = FetchOptions::default().with_file_type(file_type);
        Ok(self.fetcher.fetch(&uri, &opts).await?)
    }

    async fn notify(&self, list: &CommandList, summary: &ListSummary) {
        if list.notifications.is_empty() {
            return;
        }
        let subject = summary.subject();
        let body = summary.render_body(&list.templates);
        let report = self.notifier.send(&list.notifications, &subject, &body).await;
        if !report.all_delivered() {
            warn!(list = %list.name, failed = report.failed.len(), "some notifications were not delivered");
        }
    }

    fn save_metrics(&self) {
        let Some(path) = &self.options.metrics_path else {
            return;
        };
        if let Err(e) = self.metrics.save(path) {
            warn!(path = ?path, error = %e, "failed to save metrics");
        }
    }
}

fn is_relative(path: &str) -> bool {
    !path.starts_with('~') && Path::new(path).is_relative()
}
