// tests/host_sessions.rs

mod common;

use common::init_tracing;

use std::error::Error;
use std::sync::Arc;
use std::time::{Duration, Instant};

use backy::config::Host;
use backy::errors::BackyError;
use backy::exec::{Executor, RealExecutorBackend};
use backy::hosts::HostManager;
use backy::secrets::{NoSecrets, StaticSecrets};
use backy_test_utils::builders::{CommandBuilder, DocumentBuilder, HostBuilder, offline_fetcher};
use backy_test_utils::fake_ssh::{FakeConnector, SshLog};
use backy_test_utils::with_timeout;

type TestResult = Result<(), Box<dyn Error>>;

fn chain_document() -> DocumentBuilder {
    DocumentBuilder::new()
        .with_host("edge", HostBuilder::new("edge.example.com").isolated().build())
        .with_host("relay", HostBuilder::new("relay.internal").isolated().build())
        .with_host(
            "target",
            HostBuilder::new("target.internal")
                .isolated()
                .proxy_jump("edge,relay")
                .build(),
        )
        .with_command("uptime", CommandBuilder::shell("uptime").host("target").build())
        .with_command("hostname", CommandBuilder::shell("hostname").host("target").build())
}

#[tokio::test]
async fn proxy_chain_opens_in_order_and_closes_in_reverse() -> TestResult {
    init_tracing();

    let catalog = chain_document().build();
    let log = SshLog::default();
    let hosts = Arc::new(HostManager::new(
        Arc::new(FakeConnector::new(log.clone())),
        Arc::new(NoSecrets),
    ));
    let backend = Arc::new(RealExecutorBackend::new(hosts.clone()));
    let executor = Executor::new(catalog, backend, offline_fetcher());

    let results = executor
        .exec_cmds(&["uptime".to_string(), "hostname".to_string()])
        .await?;
    assert!(results.iter().all(|r| r.success));
    assert!(results.iter().all(|r| r.host == "target"));

    let events = log.snapshot();
    assert_eq!(events.opened, vec!["edge", "relay", "target"]);
    assert_eq!(
        events.tunnelled,
        vec![
            ("edge".to_string(), false),
            ("relay".to_string(), true),
            ("target".to_string(), true),
        ]
    );
    assert_eq!(
        events.dials,
        vec![
            ("edge".to_string(), "relay.internal:22".to_string()),
            ("relay".to_string(), "target.internal:22".to_string()),
        ]
    );
    assert_eq!(events.execs.len(), 2);
    assert!(events.execs.iter().all(|(alias, _)| alias == "target"));

    executor.shutdown().await;
    assert_eq!(log.snapshot().closed, vec!["target", "relay", "edge"]);
    assert!(hosts.open_sessions().await.is_empty());

    // Idempotent.
    executor.shutdown().await;
    assert_eq!(log.snapshot().closed.len(), 3);

    Ok(())
}

#[tokio::test]
async fn shared_proxies_are_pooled_across_targets() -> TestResult {
    init_tracing();

    let log = SshLog::default();
    let manager = HostManager::new(Arc::new(FakeConnector::new(log.clone())), Arc::new(NoSecrets));
    let catalog = DocumentBuilder::new()
        .with_host("bastion", HostBuilder::new("bastion.example.com").isolated().build())
        .with_host("db", HostBuilder::new("db.internal").isolated().proxy_jump("bastion").build())
        .with_host("web", HostBuilder::new("web.internal").isolated().proxy_jump("bastion").build())
        .with_shell("noop", "true")
        .build();

    manager.connect(catalog.host("db")?).await?;
    manager.connect(catalog.host("web")?).await?;
    manager.connect(catalog.host("db")?).await?;

    assert_eq!(log.snapshot().opened, vec!["bastion", "db", "web"]);
    assert_eq!(manager.open_sessions().await, vec!["bastion", "db", "web"]);

    manager.close_all().await;
    assert_eq!(log.snapshot().closed, vec!["web", "db", "bastion"]);
    Ok(())
}

#[tokio::test]
async fn proxy_with_its_own_jump_is_reached_through_it() -> TestResult {
    init_tracing();

    let log = SshLog::default();
    let manager = HostManager::new(Arc::new(FakeConnector::new(log.clone())), Arc::new(NoSecrets));
    let catalog = DocumentBuilder::new()
        .with_host("edge", HostBuilder::new("edge.example.com").isolated().build())
        .with_host("relay", HostBuilder::new("relay.internal").isolated().proxy_jump("edge").build())
        .with_host("target", HostBuilder::new("target.internal").isolated().proxy_jump("relay").build())
        .with_shell("noop", "true")
        .build();

    let session = manager.connect(catalog.host("target")?).await?;
    assert_eq!(session.alias(), "target");

    let events = log.snapshot();
    assert_eq!(events.opened, vec!["edge", "relay", "target"]);
    assert_eq!(
        events.tunnelled,
        vec![
            ("edge".to_string(), false),
            ("relay".to_string(), true),
            ("target".to_string(), true),
        ]
    );
    assert_eq!(
        events.dials,
        vec![
            ("edge".to_string(), "relay.internal:22".to_string()),
            ("relay".to_string(), "target.internal:22".to_string()),
        ]
    );

    // The intermediate hop is pooled like any other.
    manager.connect(catalog.host("relay")?).await?;
    assert_eq!(log.snapshot().opened.len(), 3);

    manager.close_all().await;
    assert_eq!(log.snapshot().closed, vec!["target", "relay", "edge"]);
    Ok(())
}

#[tokio::test]
async fn slow_host_does_not_hold_up_other_hosts() -> TestResult {
    init_tracing();

    let log = SshLog::default();
    let connector = FakeConnector::new(log.clone()).slow("slow", Duration::from_secs(2));
    let manager = Arc::new(HostManager::new(Arc::new(connector), Arc::new(NoSecrets)));
    let catalog = DocumentBuilder::new()
        .with_host("slow", HostBuilder::new("slow.internal").isolated().build())
        .with_host("fast", HostBuilder::new("fast.internal").isolated().build())
        .with_shell("noop", "true")
        .build();

    let slow = {
        let manager = manager.clone();
        let catalog = catalog.clone();
        tokio::spawn(async move {
            let host = catalog.host("slow")?;
            manager.connect(host).await.map(|_| ())
        })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    with_timeout(Duration::from_millis(500), manager.connect(catalog.host("fast")?)).await?;
    assert!(started.elapsed() < Duration::from_millis(500));
    assert_eq!(log.snapshot().opened, vec!["fast"]);

    slow.await??;
    assert_eq!(log.snapshot().opened, vec!["fast", "slow"]);
    Ok(())
}

#[tokio::test]
async fn concurrent_connects_share_one_handshake() -> TestResult {
    init_tracing();

    let log = SshLog::default();
    let connector = FakeConnector::new(log.clone()).slow("bastion", Duration::from_millis(200));
    let manager = Arc::new(HostManager::new(Arc::new(connector), Arc::new(NoSecrets)));
    let catalog = DocumentBuilder::new()
        .with_host("bastion", HostBuilder::new("bastion.example.com").isolated().build())
        .with_host("db", HostBuilder::new("db.internal").isolated().proxy_jump("bastion").build())
        .with_host("web", HostBuilder::new("web.internal").isolated().proxy_jump("bastion").build())
        .with_shell("noop", "true")
        .build();

    let (db, web) = tokio::join!(
        manager.connect(catalog.host("db")?),
        manager.connect(catalog.host("web")?),
    );
    db?;
    web?;

    let opened = log.snapshot().opened;
    assert_eq!(opened.iter().filter(|a| *a == "bastion").count(), 1);
    assert_eq!(opened.len(), 3);
    Ok(())
}

#[tokio::test]
async fn repeated_alias_in_chain_is_a_cycle() {
    init_tracing();

    let inner = Arc::new(Host {
        alias: "loop".to_string(),
        hostname: Some("loop.internal".to_string()),
        ..Default::default()
    });
    let host = Host {
        alias: "loop".to_string(),
        proxy_chain: vec![inner],
        ..Default::default()
    };

    let manager = HostManager::new(Arc::new(FakeConnector::new(SshLog::default())), Arc::new(NoSecrets));
    let err = match manager.connect(&host).await {
        Ok(_) => panic!("cycle must be rejected"),
        Err(e) => e,
    };
    assert!(matches!(err, BackyError::ProxyCycle(alias) if alias == "loop"));
}

#[tokio::test]
async fn auth_failure_becomes_a_failed_result() -> TestResult {
    init_tracing();

    let catalog = chain_document().build();
    let log = SshLog::default();
    let hosts = Arc::new(HostManager::new(
        Arc::new(FakeConnector::new(log.clone()).refuse("relay")),
        Arc::new(NoSecrets),
    ));
    let executor = Executor::new(catalog, Arc::new(RealExecutorBackend::new(hosts)), offline_fetcher());

    let results = executor.exec_cmds(&["uptime".to_string(), "hostname".to_string()]).await?;
    assert_eq!(results.len(), 1, "stops after the first failure");
    assert!(!results[0].success);
    assert!(results[0].error.as_deref().unwrap_or_default().contains("authentication failed"));

    executor.shutdown().await;
    assert_eq!(log.snapshot().closed, vec!["edge"]);
    Ok(())
}

#[test]
fn target_merges_ssh_config_and_resolves_secrets() -> TestResult {
    let dir = tempfile::tempdir()?;
    let ssh_config = dir.path().join("config");
    std::fs::write(
        &ssh_config,
        "Host db\n  HostName 10.0.0.5\n  User admin\n  Port 2022\n  IdentityFile ~/.ssh/db_key\n",
    )?;

    let host = Host {
        alias: "db".to_string(),
        password: Some("vault:hosts/db".to_string()),
        config_file_path: Some(ssh_config.to_string_lossy().into_owned()),
        known_hosts_file: Some("/tmp/backy-known-hosts".to_string()),
        ..Default::default()
    };

    let manager = HostManager::new(
        Arc::new(FakeConnector::new(SshLog::default())),
        Arc::new(StaticSecrets::new().with("hosts/db", "s3cret")),
    );
    let target = manager.resolve_target(&host)?;

    assert_eq!(target.hostname, "10.0.0.5");
    assert_eq!(target.user, "admin");
    assert_eq!(target.port, 2022);
    assert!(target.identity_file.as_deref().is_some_and(|p| p.ends_with(".ssh/db_key")));
    assert_eq!(target.password.as_deref(), Some("s3cret"));
    assert_eq!(target.known_hosts.to_string_lossy(), "/tmp/backy-known-hosts");
    assert!(!format!("{target:?}").contains("s3cret"));
    Ok(())
}

#[test]
fn explicit_settings_beat_ssh_config() -> TestResult {
    let dir = tempfile::tempdir()?;
    let ssh_config = dir.path().join("config");
    std::fs::write(&ssh_config, "Host *\n  User fallback\n  Port 2200\n")?;

    let host = Host {
        alias: "web".to_string(),
        hostname: Some("web.internal".to_string()),
        user: Some("deploy".to_string()),
        config_file_path: Some(ssh_config.to_string_lossy().into_owned()),
        ..Default::default()
    };

    let manager = HostManager::new(Arc::new(FakeConnector::new(SshLog::default())), Arc::new(NoSecrets));
    let target = manager.resolve_target(&host)?;
    assert_eq!(target.hostname, "web.internal");
    assert_eq!(target.user, "deploy");
    assert_eq!(target.port, 2200);
    Ok(())
}

#[test]
fn unresolvable_secret_fails_target_resolution() {
    let host = Host {
        alias: "db".to_string(),
        hostname: Some("db.internal".to_string()),
        password: Some("vault:hosts/missing".to_string()),
        config_file_path: Some("/nonexistent/backy-test/ssh_config".to_string()),
        ..Default::default()
    };
    let manager = HostManager::new(Arc::new(FakeConnector::new(SshLog::default())), Arc::new(NoSecrets));
    let err = manager.resolve_target(&host).expect_err("secret is missing");
    assert!(matches!(err, BackyError::Secret(_)));
}
