//! Fixtures shared by the backy integration tests: catalog builders and fake
//! implementations of every outward seam (executor backend, HTTP, object
//! store, SSH, notification transport).

pub mod builders;
pub mod fake_executor;
pub mod fake_fetch;
pub mod fake_ssh;
pub mod recording_transport;

use std::future::Future;
use std::sync::Once;
use std::time::Duration;

use tracing_subscriber::{EnvFilter, fmt};

static INIT: Once = Once::new();

/// Install a test-writer subscriber once per test binary.
///
/// Output is only shown for failing tests; `RUST_LOG=backy=debug` raises the
/// level.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .init();
    });
}

/// Await `future`, panicking if it takes longer than `limit`.
pub async fn with_timeout<F, T>(limit: Duration, future: F) -> T
where
    F: Future<Output = T>,
{
    match tokio::time::timeout(limit, future).await {
        Ok(value) => value,
        Err(_) => panic!("did not finish within {limit:?}"),
    }
}
