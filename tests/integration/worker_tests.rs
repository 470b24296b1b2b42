//! Worker integration tests.
//!
//! Each test runs real units end to end: local files are fetched through the
//! object store layer into staging areas and handed to a shell validator.
#![cfg(unix)]

use std::time::Duration;

use batch_validate::engine::worker::{Worker, SHUTDOWN_MESSAGE};
use batch_validate::platform::signal::{self, ShutdownSignal};
use batch_validate::{process_table, UnitStatus, WorkerConfig};

use crate::mocks::{
    allow_http, config_for, staging_entries, Behavior, BlobServer, MockDataset, CAT_STAGED, FAIL_7,
    FAIL_UNIT_1, PASS,
};

#[tokio::test]
async fn test_one_row_per_unit_in_order() {
    let dataset = MockDataset::new(5);
    let staging = tempfile::tempdir().unwrap();
    let table = dataset.table();

    let report = process_table(config_for(PASS, staging.path()), &table, ShutdownSignal::never()).await;

    assert_eq!(report.rows.len(), 5);
    let units: Vec<u64> = report.rows.iter().map(|r| r.unit).collect();
    assert_eq!(units, vec![0, 1, 2, 3, 4]);
    assert_eq!(report.summary().passed, 5);
    assert_eq!(report.summary().exit_code(), 0);
}

#[tokio::test]
async fn test_exit_zero_is_passed() {
    let dataset = MockDataset::new(1);
    let staging = tempfile::tempdir().unwrap();
    let mut worker = Worker::init(config_for(PASS, staging.path()), ShutdownSignal::never());

    let row = worker.run_unit(&dataset.table().units()[0]).await;

    assert_eq!(row.unit, 0);
    assert_eq!(row.status, UnitStatus::Passed);
    assert_eq!(row.exit_code, Some(0));
    assert_eq!(row.uri("label_path"), Some(dataset.uris(0)[1].as_str()));
}

#[tokio::test]
async fn test_exit_seven_is_failed_with_code() {
    let dataset = MockDataset::new(1);
    let staging = tempfile::tempdir().unwrap();
    let mut worker = Worker::init(config_for(FAIL_7, staging.path()), ShutdownSignal::never());

    let row = worker.run_unit(&dataset.table().units()[0]).await;

    assert_eq!(row.status, UnitStatus::Failed);
    assert_eq!(row.exit_code, Some(7));
    assert_eq!(row.message, "label mismatch");
}

#[tokio::test]
async fn test_validator_receives_staged_copies_in_role_order() {
    let dataset = MockDataset::new(1);
    let staging = tempfile::tempdir().unwrap();
    let mut worker = Worker::init(config_for(CAT_STAGED, staging.path()), ShutdownSignal::never());

    let row = worker.run_unit(&dataset.table().units()[0]).await;

    assert_eq!(row.status, UnitStatus::Passed);
    assert_eq!(row.message, "bin:0\nlbl:0\nmeta:0");
}

#[tokio::test]
async fn test_staged_paths_live_under_role_directories() {
    let dataset = MockDataset::new(1);
    let staging = tempfile::tempdir().unwrap();
    let script = "case \"$1|$2|$3\" in \
                  */sequence_path/unit-0.bin\\|*/label_path/unit-0.lbl\\|*/third_data_path/unit-0.meta) exit 0;; \
                  esac; echo \"$1|$2|$3\"; exit 1";
    let mut worker = Worker::init(config_for(script, staging.path()), ShutdownSignal::never());

    let row = worker.run_unit(&dataset.table().units()[0]).await;

    assert_eq!(row.status, UnitStatus::Passed, "unexpected paths: {}", row.message);
}

#[tokio::test]
async fn test_failure_in_one_unit_does_not_stop_siblings() {
    let dataset = MockDataset::new(3);
    let staging = tempfile::tempdir().unwrap();

    let report = process_table(config_for(FAIL_UNIT_1, staging.path()), &dataset.table(), ShutdownSignal::never()).await;

    let statuses: Vec<UnitStatus> = report.rows.iter().map(|r| r.status).collect();
    assert_eq!(statuses, vec![UnitStatus::Passed, UnitStatus::Failed, UnitStatus::Passed]);
    assert_eq!(report.summary().exit_code(), 1);
}

#[tokio::test]
async fn test_missing_validator_is_infrastructure_error_for_every_unit() {
    let dataset = MockDataset::new(3);
    let staging = tempfile::tempdir().unwrap();
    let config = WorkerConfig {
        validator_command: "/nonexistent/validate.sh".into(),
        validator_args: vec![],
        ..config_for(PASS, staging.path())
    };

    let report = process_table(config, &dataset.table(), ShutdownSignal::never()).await;

    assert_eq!(report.rows.len(), 3);
    for row in &report.rows {
        assert_eq!(row.status, UnitStatus::InfrastructureError);
        assert_eq!(row.exit_code, None);
        assert!(row.message.contains("/nonexistent/validate.sh"));
    }
    assert_eq!(report.summary().exit_code(), 2);
    assert_eq!(staging_entries(staging.path()), 0);
}

#[tokio::test]
async fn test_timeout_kills_validator() {
    let dataset = MockDataset::new(1);
    let staging = tempfile::tempdir().unwrap();
    let pid_file = dataset.path().join("validator.pid");
    let script = format!("echo $$ > '{}'; sleep 30", pid_file.display());
    let config = WorkerConfig {
        timeout_ms: 300,
        ..config_for(&script, staging.path())
    };
    let mut worker = Worker::init(config, ShutdownSignal::never());

    let row = worker.run_unit(&dataset.table().units()[0]).await;

    assert_eq!(row.status, UnitStatus::TimeoutError);
    assert_eq!(row.exit_code, None);
    assert!(row.duration_ms < 10_000);

    let pid: libc::pid_t = std::fs::read_to_string(&pid_file).unwrap().trim().parse().unwrap();
    // SAFETY: signal 0 only checks that the pid exists.
    let alive = unsafe { libc::kill(pid, 0) } == 0;
    assert!(!alive, "validator pid {} still running", pid);
}

#[tokio::test]
async fn test_unreachable_label_is_fetch_error_and_staging_is_removed() {
    let mut dataset = MockDataset::new(2);
    let missing = dataset.path().join("gone.lbl").display().to_string();
    dataset.set_uri(0, 1, missing.clone());

    let staging = tempfile::tempdir().unwrap();
    let marker = dataset.path().join("validator-ran");
    let script = format!("touch '{}'", marker.display());
    let mut worker = Worker::init(config_for(&script, staging.path()), ShutdownSignal::never());
    let table = dataset.table();

    let row = worker.run_unit(&table.units()[0]).await;

    assert_eq!(row.status, UnitStatus::FetchError);
    assert_eq!(row.exit_code, None);
    assert!(row.message.starts_with("label_path: "), "{}", row.message);
    assert!(!marker.exists(), "validator must not run after a fetch failure");
    assert_eq!(staging_entries(staging.path()), 0);

    let sibling = worker.run_unit(&table.units()[1]).await;
    assert_eq!(sibling.status, UnitStatus::Passed);
    assert!(marker.exists());
}

#[tokio::test]
async fn test_empty_identifier_is_fetch_error() {
    let mut dataset = MockDataset::new(1);
    dataset.set_uri(0, 2, "");
    let staging = tempfile::tempdir().unwrap();
    let mut worker = Worker::init(config_for(PASS, staging.path()), ShutdownSignal::never());

    let row = worker.run_unit(&dataset.table().units()[0]).await;

    assert_eq!(row.status, UnitStatus::FetchError);
    assert!(row.message.starts_with("third_data_path: "));
}

#[tokio::test]
async fn test_unknown_datastore_is_fetch_error() {
    let mut dataset = MockDataset::new(1);
    dataset.set_uri(
        0,
        0,
        "azureml://subscriptions/s/resourcegroups/r/workspaces/w/datastores/nowhere/paths/unit-0.bin",
    );
    let staging = tempfile::tempdir().unwrap();
    let mut worker = Worker::init(config_for(PASS, staging.path()), ShutdownSignal::never());

    let row = worker.run_unit(&dataset.table().units()[0]).await;

    assert_eq!(row.status, UnitStatus::FetchError);
    assert!(row.message.contains("nowhere"));
}

#[tokio::test]
async fn test_long_form_identifier_resolves_through_datastore_map() {
    let mut dataset = MockDataset::new(1);
    let base = url::Url::from_directory_path(dataset.path()).unwrap().to_string();
    dataset.set_uri(
        0,
        0,
        "azureml://subscriptions/s/resourcegroups/r/workspaces/w/datastores/localstore/paths/unit-0.bin",
    );
    let staging = tempfile::tempdir().unwrap();
    let mut config = config_for(CAT_STAGED, staging.path());
    config.datastores.insert("localstore".to_string(), base);
    let mut worker = Worker::init(config, ShutdownSignal::never());

    let row = worker.run_unit(&dataset.table().units()[0]).await;

    assert_eq!(row.status, UnitStatus::Passed, "{}", row.message);
    assert!(row.message.starts_with("bin:0"));
}

#[tokio::test]
async fn test_shutdown_before_run_reports_every_unit() {
    let dataset = MockDataset::new(3);
    let staging = tempfile::tempdir().unwrap();
    let (trigger, shutdown) = signal::channel();
    trigger.trigger();

    let report = process_table(config_for(PASS, staging.path()), &dataset.table(), shutdown).await;

    assert_eq!(report.rows.len(), 3);
    for row in &report.rows {
        assert_eq!(row.status, UnitStatus::InfrastructureError);
        assert_eq!(row.message, SHUTDOWN_MESSAGE);
    }
}

#[tokio::test]
async fn test_shutdown_terminates_in_flight_unit_and_reports_the_rest() {
    let dataset = MockDataset::new(3);
    let staging = tempfile::tempdir().unwrap();
    let (trigger, shutdown) = signal::channel();
    let table = dataset.table();

    let stopper = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.trigger();
    });

    let report = tokio::time::timeout(
        Duration::from_secs(10),
        process_table(config_for("sleep 30", staging.path()), &table, shutdown),
    )
    .await
    .expect("shutdown must end the batch promptly");
    stopper.await.unwrap();

    assert_eq!(report.rows.len(), 3);
    assert!(report.rows.iter().all(|r| r.status == UnitStatus::InfrastructureError));
    assert!(report.rows[0].message.contains("shutdown"));
    assert_eq!(report.rows[2].message, SHUTDOWN_MESSAGE);
    assert_eq!(staging_entries(staging.path()), 0);
}

#[tokio::test]
async fn test_worker_caches_store_clients_until_shutdown() {
    let dataset = MockDataset::new(2);
    let staging = tempfile::tempdir().unwrap();
    let mut worker = Worker::init(config_for(PASS, staging.path()), ShutdownSignal::never());
    assert_eq!(worker.cached_stores(), 0);

    let rows = worker.run_batch(dataset.table().units()).await;

    assert_eq!(rows.len(), 2);
    assert_eq!(worker.cached_stores(), 1);
    worker.shutdown();
}

#[tokio::test]
async fn test_long_output_is_truncated_in_message() {
    let dataset = MockDataset::new(1);
    let staging = tempfile::tempdir().unwrap();
    let config = WorkerConfig {
        capture_limit_bytes: 64,
        ..config_for("head -c 5000 /dev/zero | tr '\\0' x; exit 3", staging.path())
    };
    let mut worker = Worker::init(config, ShutdownSignal::never());

    let row = worker.run_unit(&dataset.table().units()[0]).await;

    assert_eq!(row.status, UnitStatus::Failed);
    assert_eq!(row.exit_code, Some(3));
    assert!(row.truncated);
    assert_eq!(row.message.len(), 64);
}

#[tokio::test]
async fn test_stalled_fetch_times_out_as_fetch_error() {
    let server = BlobServer::start(Behavior::Stall);
    let mut dataset = MockDataset::new(1);
    dataset.set_uri(0, 1, server.url("labels/unit-0.lbl"));

    let staging = tempfile::tempdir().unwrap();
    let marker = dataset.path().join("validator-ran");
    let config = WorkerConfig {
        fetch_timeout_ms: 200,
        store_options: allow_http(),
        ..config_for(&format!("touch '{}'", marker.display()), staging.path())
    };
    let mut worker = Worker::init(config, ShutdownSignal::never());

    let row = worker.run_unit(&dataset.table().units()[0]).await;

    assert_eq!(row.status, UnitStatus::FetchError);
    assert_eq!(row.exit_code, None);
    assert!(row.message.starts_with("label_path: "), "{}", row.message);
    assert!(row.message.contains("timed out after 200ms"), "{}", row.message);
    assert!(row.duration_ms < 10_000);
    assert!(!marker.exists());
    assert_eq!(staging_entries(staging.path()), 0);
}

#[tokio::test]
async fn test_shutdown_during_fetch_releases_staging() {
    let server = BlobServer::start(Behavior::Stall);
    let mut dataset = MockDataset::new(3);
    dataset.set_uri(0, 0, server.url("sequences/unit-0.bin"));

    let staging = tempfile::tempdir().unwrap();
    let config = WorkerConfig {
        store_options: allow_http(),
        ..config_for(PASS, staging.path())
    };
    let (trigger, shutdown) = signal::channel();
    let table = dataset.table();

    let stopper = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.trigger();
    });

    let report = tokio::time::timeout(Duration::from_secs(10), process_table(config, &table, shutdown))
        .await
        .expect("shutdown must interrupt the blocked fetch");
    stopper.await.unwrap();

    assert_eq!(report.rows.len(), 3);
    assert!(report.rows.iter().all(|r| r.status == UnitStatus::InfrastructureError));
    assert_eq!(report.rows[0].message, "fetch interrupted by worker shutdown");
    assert_eq!(report.rows[1].message, SHUTDOWN_MESSAGE);
    assert_eq!(report.rows[2].message, SHUTDOWN_MESSAGE);
    assert_eq!(staging_entries(staging.path()), 0);
}
