// tests/fetch_cache.rs

mod common;

use common::init_tracing;

use std::error::Error;
use std::sync::Arc;

use backy::fetch::cache::{Cache, CacheEntry, INDEX_FILE};
use backy::fetch::{CachedFetcher, FetchError, FetchOptions, Fetcher, sha256_hex};
use backy_test_utils::fake_fetch::{FakeHttp, FakeObjectStore};

type TestResult = Result<(), Box<dyn Error>>;

const FRAGMENT: &[u8] = b"db:\n  hostname: db.internal\n";

fn fetcher_with(store: Arc<FakeObjectStore>, cache: Arc<Cache>) -> CachedFetcher {
    CachedFetcher::new(Fetcher::new(Arc::new(FakeHttp::new()), Some(store)), Some(cache))
}

#[tokio::test]
async fn second_fetch_is_served_from_cache() -> TestResult {
    init_tracing();

    let dir = tempfile::tempdir()?;
    let cache_dir = dir.path().join("cache");
    let store = Arc::new(FakeObjectStore::new().put("bucket", "a.yml", FRAGMENT));
    let cache = Arc::new(Cache::open(&cache_dir)?);
    let fetcher = fetcher_with(store.clone(), cache.clone());

    let first = fetcher.fetch("s3://bucket/a.yml", &FetchOptions::default()).await?;
    let second = fetcher.fetch("s3://bucket/a.yml", &FetchOptions::default()).await?;

    assert_eq!(first, FRAGMENT);
    assert_eq!(second, FRAGMENT);
    assert_eq!(store.requests(), 1, "second fetch must not reach the object store");

    let hash = sha256_hex(FRAGMENT);
    let data_file = cache_dir.join(format!("a.yml-{hash}"));
    assert_eq!(std::fs::read(&data_file)?, FRAGMENT);

    let index: Vec<CacheEntry> =
        serde_yaml::from_str(&std::fs::read_to_string(cache_dir.join(INDEX_FILE))?)?;
    assert_eq!(index.len(), 1);
    assert_eq!(index[0].hash, hash);
    assert_eq!(index[0].source, "s3://bucket/a.yml");
    assert_eq!(index[0].path, data_file);

    Ok(())
}

#[tokio::test]
async fn cached_copy_survives_a_restart() -> TestResult {
    init_tracing();

    let dir = tempfile::tempdir()?;
    let store = Arc::new(FakeObjectStore::new().put("bucket", "a.yml", FRAGMENT));
    fetcher_with(store, Arc::new(Cache::open(dir.path())?))
        .fetch("s3://bucket/a.yml", &FetchOptions::default())
        .await?;

    let reopened = Cache::open(dir.path())?;
    assert_eq!(reopened.len(), 1);
    let (bytes, entry) = reopened.get(&sha256_hex(FRAGMENT)).expect("entry after reload");
    assert_eq!(bytes, FRAGMENT);
    assert_eq!(entry.kind, "yaml");
    Ok(())
}

#[tokio::test]
async fn tampered_entry_is_treated_as_absent() -> TestResult {
    init_tracing();

    let dir = tempfile::tempdir()?;
    let cache = Cache::open(dir.path())?;
    let hash = sha256_hex(FRAGMENT);
    let entry = cache.set("s3://bucket/a.yml", &hash, FRAGMENT, "yaml")?;
    assert!(entry.path.is_file());

    std::fs::write(&entry.path, b"something else")?;
    assert!(cache.get(&hash).is_none());
    Ok(())
}

#[tokio::test]
async fn missing_object_honours_ignore_not_found() -> TestResult {
    init_tracing();

    let dir = tempfile::tempdir()?;
    let store = Arc::new(FakeObjectStore::new());
    let fetcher = fetcher_with(store, Arc::new(Cache::open(dir.path())?));

    let ignored = fetcher
        .fetch("s3://bucket/none.yml", &FetchOptions::default().ignore_not_found(true))
        .await;
    assert!(matches!(ignored, Err(FetchError::NotFound(_))));

    let strict = fetcher
        .fetch("s3://bucket/none.yml", &FetchOptions::default())
        .await;
    assert!(matches!(strict, Err(FetchError::Missing { .. })));
    Ok(())
}

#[tokio::test]
async fn unreachable_origin_falls_back_to_cached_copy() -> TestResult {
    init_tracing();

    let dir = tempfile::tempdir()?;
    let store = Arc::new(FakeObjectStore::new().put("bucket", "a.yml", FRAGMENT));
    fetcher_with(store.clone(), Arc::new(Cache::open(dir.path())?))
        .fetch("s3://bucket/a.yml", &FetchOptions::default())
        .await?;

    store.set_unreachable(true);
    let restarted = fetcher_with(store.clone(), Arc::new(Cache::open(dir.path())?));
    let bytes = restarted.fetch("s3://bucket/a.yml", &FetchOptions::default()).await?;
    assert_eq!(bytes, FRAGMENT);
    assert_eq!(store.requests(), 2);
    Ok(())
}

#[tokio::test]
async fn source_deleted_upstream_is_not_served_from_cache() -> TestResult {
    init_tracing();

    let dir = tempfile::tempdir()?;
    let store = Arc::new(FakeObjectStore::new().put("bucket", "a.yml", FRAGMENT));
    fetcher_with(store.clone(), Arc::new(Cache::open(dir.path())?))
        .fetch("s3://bucket/a.yml", &FetchOptions::default())
        .await?;

    store.remove("bucket", "a.yml");
    let restarted = fetcher_with(store.clone(), Arc::new(Cache::open(dir.path())?));

    let strict = restarted.fetch("s3://bucket/a.yml", &FetchOptions::default()).await;
    assert!(matches!(strict, Err(FetchError::Missing { .. })), "{strict:?}");

    let ignored = restarted
        .fetch("s3://bucket/a.yml", &FetchOptions::default().ignore_not_found(true))
        .await;
    assert!(matches!(ignored, Err(FetchError::NotFound(_))));
    Ok(())
}

#[tokio::test]
async fn http_sources_use_the_http_client() -> TestResult {
    init_tracing();

    let http = Arc::new(FakeHttp::new().serve("https://cfg.example.com/run.sh", "echo hi\n"));
    let fetcher = CachedFetcher::new(Fetcher::new(http.clone(), None), None);

    let body = fetcher
        .fetch("https://cfg.example.com/run.sh", &FetchOptions::default().with_file_type("script"))
        .await?;
    assert_eq!(body, b"echo hi\n");
    assert_eq!(http.requests(), 1);

    let err = fetcher
        .fetch("s3://bucket/key", &FetchOptions::default())
        .await
        .expect_err("no object store configured");
    assert!(err.to_string().contains("no object-store client configured"));
    Ok(())
}

#[tokio::test]
async fn local_files_are_read_fresh_every_time() -> TestResult {
    init_tracing();

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("frag.yml");
    std::fs::write(&path, "one")?;

    let cache = Arc::new(Cache::open(dir.path().join("cache"))?);
    let fetcher = CachedFetcher::new(Fetcher::new(Arc::new(FakeHttp::new()), None), Some(cache.clone()));
    let uri = path.to_string_lossy().into_owned();

    assert_eq!(fetcher.fetch(&uri, &FetchOptions::default()).await?, b"one");
    std::fs::write(&path, "two")?;
    assert_eq!(fetcher.fetch(&uri, &FetchOptions::default()).await?, b"two");
    assert!(cache.is_empty());
    Ok(())
}
