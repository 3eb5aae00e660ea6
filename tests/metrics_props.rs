// tests/metrics_props.rs

use std::time::Duration;

use chrono::{TimeZone, Utc};
use proptest::prelude::*;

use backy::metrics::{Metrics, MetricsDocument};
use backy::types::MetricKind;

// A run is (success, duration in milliseconds).
fn runs_strategy() -> impl Strategy<Value = Vec<(bool, u64)>> {
    proptest::collection::vec((any::<bool>(), 0u64..120_000), 1..50)
}

proptest! {
    #[test]
    fn counters_stay_consistent(runs in runs_strategy()) {
        let metrics = Metrics::new();
        let when = Utc.with_ymd_and_hms(2026, 1, 1, 2, 0, 0).unwrap();
        for (success, ms) in &runs {
            metrics.update(MetricKind::Command, "job", *success, Duration::from_millis(*ms), when);
        }

        let entry = metrics.get(MetricKind::Command, "job").expect("entry exists");
        let successes = runs.iter().filter(|(s, _)| *s).count() as u64;

        prop_assert_eq!(entry.total, runs.len() as u64);
        prop_assert_eq!(entry.total, entry.successful + entry.failed);
        prop_assert_eq!(entry.successful, successes);
        prop_assert!((entry.avg_time * entry.total as f64 - entry.total_time).abs() < 1e-6);
        prop_assert!((entry.success_rate + entry.failure_rate - 100.0).abs() < 1e-9);
        prop_assert_eq!(entry.last_run, Some(when));
    }

    #[test]
    fn save_then_load_is_identity(
        runs in runs_strategy(),
        names in proptest::collection::vec("[a-z][a-z0-9-]{0,12}(@[a-z0-9]{1,6})?", 1..5),
    ) {
        let metrics = Metrics::new();
        let when = Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap();
        for (i, (success, ms)) in runs.iter().enumerate() {
            let name = &names[i % names.len()];
            let kind = if i % 3 == 0 { MetricKind::List } else { MetricKind::Command };
            metrics.update(kind, name, *success, Duration::from_millis(*ms), when);
        }

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.yml");
        metrics.save(&path).unwrap();

        let loaded = Metrics::load(&path).unwrap();
        prop_assert_eq!(loaded.snapshot(), metrics.snapshot());
    }
}

#[test]
fn missing_or_empty_file_loads_empty_metrics() {
    let dir = tempfile::tempdir().unwrap();
    let missing = Metrics::load(&dir.path().join("none.yml")).unwrap();
    assert_eq!(missing.snapshot(), MetricsDocument::default());

    let empty = dir.path().join("empty.yml");
    std::fs::write(&empty, "").unwrap();
    assert_eq!(Metrics::load(&empty).unwrap().snapshot(), MetricsDocument::default());
}

#[test]
fn saved_document_uses_kebab_case_keys() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("metrics.yml");

    let metrics = Metrics::new();
    metrics.update(MetricKind::List, "nightly", true, Duration::from_secs(4), Utc::now());
    metrics.save(&path).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("lists:"));
    assert!(text.contains("nightly:"));
    assert!(text.contains("success-rate: 100.0"));
    assert!(text.contains("avg-time: 4.0"));
    assert!(text.contains("last-run:"));
}

#[test]
fn corrupt_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("metrics.yml");
    std::fs::write(&path, "commands: [not, a, map]\n").unwrap();
    assert!(Metrics::load(&path).is_err());
}
