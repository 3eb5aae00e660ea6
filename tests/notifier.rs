// tests/notifier.rs

mod common;

use common::init_tracing;

use std::error::Error;
use std::sync::{Arc, Mutex};

use backy::config::NotificationChannel;
use backy::notify::{Notifier, Transport, TransportDeps, TransportRegistry};
use backy::secrets::StaticSecrets;
use backy_test_utils::builders::{DocumentBuilder, ListBuilder};
use backy_test_utils::recording_transport::{Outbox, RecordingTransport};

type TestResult = Result<(), Box<dyn Error>>;

fn deps() -> TransportDeps {
    TransportDeps {
        http: reqwest::Client::new(),
        secrets: Arc::new(StaticSecrets::new()),
    }
}

#[tokio::test]
async fn one_failing_channel_does_not_stop_the_others() {
    init_tracing();

    let outbox: Outbox = Arc::new(Mutex::new(Vec::new()));
    let notifier = Notifier::empty()
        .with_transport("a", Arc::new(RecordingTransport::new(outbox.clone())))
        .with_transport("b", Arc::new(RecordingTransport::failing(outbox.clone())))
        .with_transport("c", Arc::new(RecordingTransport::new(outbox.clone())));

    let channels: Vec<String> = ["a", "b", "c", "unknown"].map(String::from).to_vec();
    let report = notifier.send(&channels, "nightly succeeded", "all good").await;

    assert_eq!(report.delivered, vec!["a", "c"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "b");
    assert!(!report.all_delivered());
    assert_eq!(outbox.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn catalog_channels_are_built_through_the_registry() -> TestResult {
    init_tracing();

    let catalog = DocumentBuilder::new()
        .with_shell("a", "true")
        .with_notification("ops", "recording")
        .with_notification("audit", "log")
        .with_notification("mail", "mail")
        .with_list("L", ListBuilder::new(&["a"]).notify("ops").build())
        .build();

    let outbox: Outbox = Arc::new(Mutex::new(Vec::new()));
    let mut registry = TransportRegistry::with_builtins();
    {
        let outbox = outbox.clone();
        registry.register(
            "recording",
            Arc::new(move |_: &NotificationChannel, _: &TransportDeps| {
                Ok(Arc::new(RecordingTransport::new(outbox.clone())) as Arc<dyn Transport>)
            }),
        );
    }

    let notifier = Notifier::from_catalog(&catalog, &registry, &deps());
    // `mail` has no transport and is skipped.
    assert_eq!(notifier.len(), 2);

    let report = notifier
        .send(&["ops".to_string(), "audit".to_string()], "L succeeded", "body")
        .await;
    assert!(report.all_delivered());
    assert_eq!(
        outbox.lock().unwrap().clone(),
        vec![("L succeeded".to_string(), "body".to_string())]
    );
    Ok(())
}

#[test]
fn webhook_without_url_is_skipped() {
    init_tracing();

    let catalog = DocumentBuilder::new()
        .with_shell("a", "true")
        .with_notification("hook", "webhook")
        .build();
    let notifier = Notifier::from_catalog(&catalog, &TransportRegistry::with_builtins(), &deps());
    assert!(notifier.is_empty());
}
