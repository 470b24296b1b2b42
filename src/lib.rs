//! batch-validate library
//!
//! Per-unit worker that stages blob-stored resources, runs an external
//! validator against them and reports exactly one result row per unit.
//!
//! This library provides:
//! - Dispatch table loading with an ordered list of named resource roles
//! - Resource locators for object-store URLs, long-form datastore URIs and local paths
//! - A worker that fetches, invokes, classifies and emits for each unit
//! - Result reports in text, JSON, JSON lines, CSV and JUnit XML
//!
//! Scheduling, mini-batch splitting and cross-worker aggregation are left to
//! whatever platform launches the worker.
//!
//! # Example
//!
//! ```no_run
//! use batch_validate::{build_runtime, process_table, DispatchTable, RoleSet, WorkerConfig};
//! use batch_validate::platform::signal::ShutdownSignal;
//!
//! let config = WorkerConfig::default();
//! let roles = RoleSet::new(config.roles.clone()).expect("invalid roles");
//! let table = DispatchTable::from_path("dispatch.csv".as_ref(), &roles, 0).expect("bad table");
//!
//! let runtime = build_runtime().expect("runtime");
//! let report = runtime.block_on(process_table(config, &table, ShutdownSignal::never()));
//! println!("Units passed: {}", report.summary().passed);
//! ```

pub mod cli;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod fetch;
pub mod logging;
pub mod platform;
pub mod version;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

use engine::result::BatchReport;
use engine::worker::Worker;
use platform::signal::ShutdownSignal;

// Re-exports for public API
pub use config::{ConfigError, WorkerConfig};
pub use dispatch::table::DispatchTable;
pub use dispatch::{DispatchError, Resource, RoleSet, ValidationUnit};
pub use engine::process::InvokeError;
pub use engine::result::{ResultRow, ResultSummary};
pub use fetch::FetchError;

/// Outcome status of a single validation unit.
///
/// Only `Passed` and `Failed` are verdicts from the validator itself; the
/// remaining variants mark infrastructure faults that were recovered into a
/// row instead of aborting the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnitStatus {
    /// Validator ran and exited with code 0
    Passed,
    /// Validator ran and exited with a non-zero code
    Failed,
    /// A resource could not be resolved or read
    FetchError,
    /// Validator exceeded the configured time bound and was terminated
    TimeoutError,
    /// Validator could not be launched, or the worker could not run the unit
    InfrastructureError,
}

impl UnitStatus {
    /// True for outcomes reported by the validator rather than by the worker.
    pub fn is_verdict(&self) -> bool {
        matches!(self, UnitStatus::Passed | UnitStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UnitStatus::Passed => "Passed",
            UnitStatus::Failed => "Failed",
            UnitStatus::FetchError => "FetchError",
            UnitStatus::TimeoutError => "TimeoutError",
            UnitStatus::InfrastructureError => "InfrastructureError",
        }
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error types for batch-validate operations that are not per-unit faults.
///
/// Per-unit faults never surface as `Error`; they become result rows.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration could not be loaded or is invalid
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Dispatch table could not be read or lacks a role column
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    /// Result output could not be written
    #[error("failed to write results to {context}: {source}")]
    Output {
        context: String,
        #[source]
        source: std::io::Error,
    },
    /// Async runtime could not be started
    #[error("failed to start runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

/// Build the single-threaded runtime a worker runs on.
///
/// Units are processed one at a time; the runtime only multiplexes the
/// child's output pipes, timers and the shutdown signal.
pub fn build_runtime() -> Result<tokio::runtime::Runtime, Error> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(Error::Runtime)
}

/// Process every unit of a dispatch table and collect one row per unit.
///
/// This is the main entry point: it initializes a worker, runs the batch
/// and tears the worker down again.
///
/// # Example
///
/// ```no_run
/// use batch_validate::{build_runtime, process_table, DispatchTable, RoleSet, WorkerConfig};
/// use batch_validate::platform::signal::ShutdownSignal;
///
/// let config = WorkerConfig {
///     timeout_ms: 60_000,
///     ..Default::default()
/// };
/// let roles = RoleSet::new(config.roles.clone()).unwrap();
/// let table = DispatchTable::from_path("batch-07.csv".as_ref(), &roles, 700).unwrap();
///
/// let report = build_runtime()
///     .unwrap()
///     .block_on(process_table(config, &table, ShutdownSignal::never()));
/// let summary = report.summary();
/// println!("Passed: {}, Failed: {}", summary.passed, summary.failed);
/// ```
pub async fn process_table(
    config: WorkerConfig,
    table: &DispatchTable,
    shutdown: ShutdownSignal,
) -> BatchReport {
    let start = Instant::now();
    let roles = table.roles().names().to_vec();

    let mut worker = Worker::init(config, shutdown);
    let rows = worker.run_batch(table.units()).await;
    worker.shutdown();

    BatchReport::new(roles, rows, start.elapsed().as_millis() as u64)
}
