// tests/config_resolution.rs

mod common;

use common::{demo, init_tracing, write_config};

use std::error::Error;
use std::sync::Arc;

use backy::config::{self, CommandKind, ResolveOptions, Selection};
use backy::errors::BackyError;
use backy::fetch::{CachedFetcher, Fetcher};
use backy_test_utils::builders::{
    CommandBuilder, DocumentBuilder, HostBuilder, ListBuilder, offline_fetcher,
};
use backy_test_utils::fake_fetch::FakeHttp;

type TestResult = Result<(), Box<dyn Error>>;

#[tokio::test]
async fn demo_document_resolves_hosts_commands_and_env() -> TestResult {
    init_tracing();

    let opts = ResolveOptions::default().with_config(demo("backy.yml").to_string_lossy());
    let catalog = config::resolve(&opts, &offline_fetcher()).await?;

    assert_eq!(catalog.commands.len(), 7);
    assert_eq!(catalog.lists.len(), 4);
    assert_eq!(
        catalog.hosts.keys().cloned().collect::<Vec<_>>(),
        vec!["bastion", "db", "web"]
    );

    let db = catalog.host("db")?;
    assert_eq!(db.hostname(), "db.internal");
    assert_eq!(db.proxy_aliases(), vec!["bastion"]);

    let web = catalog.host("web")?;
    assert_eq!(web.hostname(), "web.internal");
    assert_eq!(web.port(), 2222);

    let dump = catalog.command("dump-db")?;
    assert_eq!(dump.host_alias(), "db");
    assert!(dump.environment.contains(&("TARGET".to_string(), "/srv/backups/app.dump".to_string())));
    assert!(dump.environment.contains(&("PGPASSWORD".to_string(), "vault:db/backup".to_string())));

    let rotate = catalog.command("rotate")?;
    assert!(matches!(&rotate.kind, CommandKind::ScriptFile { source } if source == "scripts/rotate.sh"));
    assert!(rotate.is_local());

    let nightly = catalog.list("nightly")?;
    assert_eq!(nightly.display_name, "Nightly backup");
    assert_eq!(nightly.hook_lists().collect::<Vec<_>>(), vec!["done", "alarm"]);

    assert!(!catalog.notifications["chat"].enabled);
    assert_eq!(catalog.config_dir, demo("backy.yml").parent().map(|p| p.to_path_buf()));

    Ok(())
}

#[tokio::test]
async fn every_list_entry_resolves_to_a_command() -> TestResult {
    init_tracing();

    let opts = ResolveOptions::default().with_config(demo("backy.yml").to_string_lossy());
    let catalog = config::resolve(&opts, &offline_fetcher()).await?;

    for list in catalog.lists.values() {
        for name in &list.order {
            assert!(catalog.commands.contains_key(name), "{name} missing");
        }
        for channel in &list.notifications {
            assert!(catalog.notifications.contains_key(channel), "{channel} missing");
        }
    }
    Ok(())
}

#[tokio::test]
async fn selecting_unknown_list_reports_it_by_name() -> TestResult {
    init_tracing();

    let dir = tempfile::tempdir()?;
    let path = write_config(
        dir.path(),
        "commands:\n  a:\n    cmd: echo a\n  b:\n    cmd: echo b\n",
    );

    let opts = ResolveOptions::default()
        .with_config(path.to_string_lossy())
        .with_selection(Selection::Lists(vec!["x".to_string()]));
    let err = config::resolve(&opts, &offline_fetcher())
        .await
        .expect_err("unknown list must fail");

    assert!(matches!(err, BackyError::ReferenceMissing { kind: "list", .. }));
    assert!(err.to_string().contains("list x not found"));
    Ok(())
}

#[tokio::test]
async fn selecting_a_list_keeps_its_hooks_and_commands_only() -> TestResult {
    init_tracing();

    let opts = ResolveOptions::default()
        .with_config(demo("backy.yml").to_string_lossy())
        .with_selection(Selection::Lists(vec!["nightly".to_string()]));
    let catalog = config::resolve(&opts, &offline_fetcher()).await?;

    assert_eq!(
        catalog.lists.keys().cloned().collect::<Vec<_>>(),
        vec!["alarm", "done", "nightly"]
    );
    assert!(!catalog.commands.contains_key("install-tools"));
    assert!(catalog.commands.contains_key("announce"));
    assert!(catalog.commands.contains_key("page-oncall"));
    Ok(())
}

#[tokio::test]
async fn missing_document_is_config_not_found() {
    init_tracing();

    let opts = ResolveOptions::default().with_config("/nonexistent/backy-test/backy.yml");
    let err = config::resolve(&opts, &offline_fetcher())
        .await
        .expect_err("missing file must fail");
    assert!(matches!(err, BackyError::ConfigNotFound(_)));
}

#[tokio::test]
async fn proxy_chain_of_three_resolves_in_order() -> TestResult {
    init_tracing();

    let opts = ResolveOptions::default().with_config(demo("proxy-chain.yml").to_string_lossy());
    let catalog = config::resolve(&opts, &offline_fetcher()).await?;

    let target = catalog.host("target")?;
    assert_eq!(target.proxy_aliases(), vec!["edge", "relay"]);
    assert!(Arc::ptr_eq(&target.proxy_chain[0], catalog.host("edge")?));
    assert!(Arc::ptr_eq(&target.proxy_chain[1], catalog.host("relay")?));
    assert!(catalog.host("edge")?.proxy_chain.is_empty());
    Ok(())
}

#[test]
fn undeclared_aliases_become_stubs() -> TestResult {
    let catalog = DocumentBuilder::new()
        .with_host("inner", HostBuilder::new("inner.internal").proxy_jump("jump").build())
        .with_command("probe", CommandBuilder::shell("true").host("ghost").build())
        .build();

    let ghost = catalog.host("ghost")?;
    assert!(ghost.stub);
    assert_eq!(ghost.hostname(), "ghost");

    let inner = catalog.host("inner")?;
    assert_eq!(inner.proxy_aliases(), vec!["jump"]);
    let jump = &inner.proxy_chain[0];
    assert!(jump.stub);
    assert_eq!(jump.hostname.as_deref(), Some("jump"));
    Ok(())
}

#[test]
fn proxy_cycle_is_rejected() {
    let err = DocumentBuilder::new()
        .with_host("a", HostBuilder::new("a.internal").proxy_jump("b").build())
        .with_host("b", HostBuilder::new("b.internal").proxy_jump("a").build())
        .with_shell("noop", "true")
        .try_build()
        .expect_err("cycle must fail");
    assert!(matches!(err, BackyError::ProxyCycle(_)));
}

#[test]
fn self_proxy_is_rejected() {
    let err = DocumentBuilder::new()
        .with_host("a", HostBuilder::new("a.internal").proxy_jump("a").build())
        .with_shell("noop", "true")
        .try_build()
        .expect_err("self jump must fail");
    assert!(matches!(err, BackyError::ProxyCycle(alias) if alias == "a"));
}

#[test]
fn list_with_unknown_command_is_a_config_error() {
    let err = DocumentBuilder::new()
        .with_shell("a", "echo a")
        .with_list("broken", ListBuilder::new(&["a", "nope"]).build())
        .try_build()
        .expect_err("unknown command must fail");
    assert!(err.to_string().contains("unknown command 'nope'"));
}

#[test]
fn invalid_cron_is_a_config_error() {
    let err = DocumentBuilder::new()
        .with_shell("a", "echo a")
        .with_list("bad", ListBuilder::new(&["a"]).cron("every tuesday").build())
        .try_build()
        .expect_err("cron must parse");
    assert!(matches!(err, BackyError::ConfigError(_)));
}

#[test]
fn cron_mode_keeps_scheduled_lists_and_their_hooks() -> TestResult {
    let catalog = DocumentBuilder::new()
        .with_shell("a", "echo a")
        .with_shell("b", "echo b")
        .with_list("nightly", ListBuilder::new(&["a"]).cron("0 2 * * *").on_error("alarm").build())
        .with_list("adhoc", ListBuilder::new(&["a"]).build())
        .with_list("alarm", ListBuilder::new(&["b"]).build())
        .cron_mode()
        .build();

    assert_eq!(
        catalog.lists.keys().cloned().collect::<Vec<_>>(),
        vec!["alarm", "nightly"]
    );
    assert_eq!(catalog.cron_lists().count(), 1);
    Ok(())
}

#[test]
fn cron_mode_without_scheduled_lists_fails() {
    let err = DocumentBuilder::new()
        .with_shell("a", "echo a")
        .with_list("adhoc", ListBuilder::new(&["a"]).build())
        .cron_mode()
        .try_build()
        .expect_err("nothing to schedule");
    assert!(err.to_string().contains("no lists with a cron expression"));
}

#[test]
fn secret_tokens_are_not_env_expanded() -> TestResult {
    let catalog = DocumentBuilder::new()
        .with_env("HOME_DIR", "/home/backy")
        .with_command(
            "c",
            CommandBuilder::shell("env")
                .env("WORK=${HOME_DIR}/work")
                .env("TOKEN=vault:$NOT_EXPANDED")
                .build(),
        )
        .build();

    let env = &catalog.command("c")?.environment;
    assert_eq!(env[0], ("WORK".to_string(), "/home/backy/work".to_string()));
    assert_eq!(env[1], ("TOKEN".to_string(), "vault:$NOT_EXPANDED".to_string()));
    Ok(())
}

#[tokio::test]
async fn include_fragments_are_merged_into_hosts_and_lists() -> TestResult {
    init_tracing();

    let http = Arc::new(
        FakeHttp::new()
            .serve(
                "https://cfg.example.com/hosts.yml",
                "db:\n  hostname: db.from-fragment\n  port: 2200\nextra:\n  hostname: extra.internal\n",
            )
            .serve(
                "https://cfg.example.com/lists.yml",
                "weekly:\n  order: [a]\n  cron: \"0 3 * * SUN\"\n",
            ),
    );
    let fetcher = CachedFetcher::new(Fetcher::new(http.clone(), None), None);

    let dir = tempfile::tempdir()?;
    let path = write_config(
        dir.path(),
        r#"
commands:
  a:
    cmd: echo a
cmd-configs:
  daily:
    order: [a]
  $include:
    - source: https://cfg.example.com/lists.yml
hosts:
  db:
    hostname: db.local
    user: backup
  $include:
    - source: https://cfg.example.com/hosts.yml
    - source: https://cfg.example.com/missing.yml
      ignoreNotFound: true
"#,
    );

    let opts = ResolveOptions::default().with_config(path.to_string_lossy());
    let catalog = config::resolve(&opts, &fetcher).await?;

    let db = catalog.host("db")?;
    assert_eq!(db.hostname(), "db.from-fragment");
    assert_eq!(db.port(), 2200);
    assert_eq!(db.user.as_deref(), Some("backup"));
    assert!(catalog.hosts.contains_key("extra"));

    assert!(catalog.lists.contains_key("daily"));
    assert!(catalog.list("weekly")?.has_cron());

    assert_eq!(http.requests(), 3);
    Ok(())
}

#[tokio::test]
async fn required_fragment_that_is_missing_fails() -> TestResult {
    init_tracing();

    let dir = tempfile::tempdir()?;
    let path = write_config(
        dir.path(),
        "commands:\n  a:\n    cmd: echo a\nhosts:\n  $include:\n    - source: https://cfg.example.com/gone.yml\n",
    );

    let opts = ResolveOptions::default().with_config(path.to_string_lossy());
    let err = config::resolve(&opts, &offline_fetcher())
        .await
        .expect_err("missing fragment must fail");
    assert!(matches!(err, BackyError::Fetch(_)));
    Ok(())
}

#[tokio::test]
async fn document_without_commands_is_rejected() -> TestResult {
    init_tracing();

    let dir = tempfile::tempdir()?;
    let path = write_config(dir.path(), "hosts:\n  a:\n    hostname: a\n");

    let opts = ResolveOptions::default().with_config(path.to_string_lossy());
    let err = config::resolve(&opts, &offline_fetcher())
        .await
        .expect_err("commands is required");
    assert!(err.to_string().contains("missing required key(s): commands"));
    Ok(())
}
