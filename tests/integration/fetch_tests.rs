//! Fetch integration tests against a local object store.

use std::collections::BTreeMap;
use std::time::Duration;

use batch_validate::engine::staging::StagingArea;
use batch_validate::fetch::{FetchError, Fetcher};

use crate::mocks::{allow_http, content_for, Behavior, BlobServer, MockDataset};

fn fetcher() -> Fetcher {
    Fetcher::new(BTreeMap::new(), BTreeMap::new(), Duration::from_secs(10))
}

#[tokio::test]
async fn test_staging_the_same_unit_twice_is_byte_identical() {
    let dataset = MockDataset::new(1);
    let mut fetcher = fetcher();

    let first = StagingArea::create(None, 0).unwrap();
    let second = StagingArea::create(None, 0).unwrap();
    assert_ne!(first.path(), second.path());

    for uri in dataset.uris(0) {
        let a = fetcher.fetch(uri, &first.role_dir("r")).await.unwrap();
        let b = fetcher.fetch(uri, &second.role_dir("r")).await.unwrap();
        assert_eq!(std::fs::read(&a).unwrap(), std::fs::read(&b).unwrap());
    }

    first.release().unwrap();
    second.release().unwrap();
}

#[tokio::test]
async fn test_refetch_overwrites_staged_file() {
    let dataset = MockDataset::new(1);
    let mut fetcher = fetcher();
    let area = StagingArea::create(None, 0).unwrap();
    let dir = area.role_dir("sequence_path");

    let staged = fetcher.fetch(&dataset.uris(0)[0], &dir).await.unwrap();
    std::fs::write(&staged, "corrupted and much longer than the original").unwrap();
    let again = fetcher.fetch(&dataset.uris(0)[0], &dir).await.unwrap();

    assert_eq!(staged, again);
    assert_eq!(std::fs::read_to_string(&again).unwrap(), content_for(0, "bin"));
}

#[tokio::test]
async fn test_file_url_and_bare_path_share_a_store() {
    let dataset = MockDataset::new(1);
    let mut fetcher = fetcher();
    let area = StagingArea::create(None, 0).unwrap();

    let bare = &dataset.uris(0)[1];
    let as_url = url::Url::from_file_path(bare).unwrap().to_string();

    fetcher.fetch(bare, &area.role_dir("a")).await.unwrap();
    let staged = fetcher.fetch(&as_url, &area.role_dir("b")).await.unwrap();

    assert_eq!(fetcher.cached_stores(), 1);
    assert_eq!(std::fs::read_to_string(staged).unwrap(), content_for(0, "lbl"));

    fetcher.release();
    assert_eq!(fetcher.cached_stores(), 0);
}

#[tokio::test]
async fn test_missing_object_is_not_found() {
    let dataset = MockDataset::new(0);
    let mut fetcher = fetcher();
    let area = StagingArea::create(None, 0).unwrap();
    let missing = dataset.path().join("absent.bin").display().to_string();

    let err = fetcher.fetch(&missing, &area.role_dir("x")).await.unwrap_err();

    assert!(matches!(err, FetchError::NotFound { .. }), "{err:?}");
}

#[tokio::test]
async fn test_unsupported_scheme_is_store_error() {
    let mut fetcher = fetcher();
    let area = StagingArea::create(None, 0).unwrap();

    let err = fetcher
        .fetch("ftp://example.invalid/a.bin", &area.role_dir("x"))
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::Store { .. }), "{err:?}");
}

#[tokio::test]
async fn test_server_error_is_not_retried() {
    let server = BlobServer::start(Behavior::Unavailable);
    let mut fetcher = Fetcher::new(BTreeMap::new(), allow_http(), Duration::from_secs(10));
    let area = StagingArea::create(None, 0).unwrap();

    let err = fetcher
        .fetch(&server.url("data/a.bin"), &area.role_dir("x"))
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::Remote { .. }), "{err:?}");
    assert!(err.to_string().contains("503"), "{err}");
    assert_eq!(server.hits(), 1);
}

#[tokio::test]
async fn test_stalled_download_times_out() {
    let server = BlobServer::start(Behavior::Stall);
    let mut fetcher = Fetcher::new(BTreeMap::new(), allow_http(), Duration::from_millis(200));
    let area = StagingArea::create(None, 0).unwrap();

    let started = std::time::Instant::now();
    let err = fetcher
        .fetch(&server.url("data/a.bin"), &area.role_dir("x"))
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::Timeout { timeout_ms: 200, .. }), "{err:?}");
    assert!(started.elapsed() < Duration::from_secs(5));
}
