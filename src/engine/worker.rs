//! Per-unit worker procedure.
//!
//! Each unit runs through a strictly linear sequence:
//!
//! 1. stage: create a private staging directory
//! 2. fetch: download every resource into its role directory
//! 3. invoke: run the validator on the staged paths
//! 4. classify: map the outcome to a [`UnitStatus`]
//! 5. emit: build the unit's single [`ResultRow`]
//!
//! # Graceful Degradation
//!
//! - Fetch failure: `FetchError` row naming the role, validator not run
//! - Launch failure: `InfrastructureError` row
//! - Timeout: `TimeoutError` row, process group killed
//! - Shutdown: in-flight and remaining units get `InfrastructureError` rows
//! - Panic inside a unit: caught, `InfrastructureError` row
//! - Staging cleanup failure: logged, row still emitted
//!
//! No fault in one unit stops the units after it.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::Instrument;

use super::process::{self, ExitKind, Invocation, InvokeError, InvokeLimits, ValidatorCommand};
use super::result::ResultRow;
use super::staging::StagingArea;
use crate::config::WorkerConfig;
use crate::dispatch::ValidationUnit;
use crate::fetch::{FetchError, Fetcher};
use crate::platform::signal::ShutdownSignal;
use crate::UnitStatus;

/// Message used for units that were never started because of shutdown.
pub const SHUTDOWN_MESSAGE: &str = "not run: worker shutting down";

/// What happened to a unit before classification.
#[derive(Debug)]
pub enum UnitOutcome {
    /// The validator ran to completion
    Completed(Invocation),
    /// A resource could not be fetched
    FetchFailed { role: String, error: FetchError },
    /// The validator could not be run to completion
    InvokeFailed(InvokeError),
    /// The worker could not prepare the unit
    Infrastructure(String),
    /// Shutdown arrived while fetching
    Interrupted,
}

/// A classified outcome, ready to become a row.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub status: UnitStatus,
    pub exit_code: Option<i32>,
    pub message: String,
    pub truncated: bool,
}

/// Map an outcome to a status, exit code and bounded message.
pub fn classify(outcome: UnitOutcome, message_limit: usize) -> Classification {
    let (status, exit_code, message, mut truncated) = match outcome {
        UnitOutcome::Completed(invocation) => {
            let truncated = invocation.stdout.is_truncated() || invocation.stderr.is_truncated();
            let text = combine_output(&invocation);
            match invocation.exit {
                ExitKind::Code(0) => (UnitStatus::Passed, Some(0), text, truncated),
                ExitKind::Code(code) => (UnitStatus::Failed, Some(code), text, truncated),
                ExitKind::Signal(signal) => (
                    UnitStatus::InfrastructureError,
                    None,
                    join_nonempty(&format!("validator killed by signal {}", signal), &text),
                    truncated,
                ),
                ExitKind::Unknown => (
                    UnitStatus::InfrastructureError,
                    None,
                    join_nonempty("validator exited without a status", &text),
                    truncated,
                ),
            }
        }
        UnitOutcome::FetchFailed { role, error } => {
            (UnitStatus::FetchError, None, format!("{}: {}", role, error), false)
        }
        UnitOutcome::InvokeFailed(InvokeError::Timeout { timeout_ms, stdout, stderr }) => {
            let truncated = stdout.is_truncated() || stderr.is_truncated();
            let partial = join_nonempty(stdout.text().trim(), stderr.text().trim());
            let message = join_nonempty(
                &format!("validator timed out after {}ms", timeout_ms),
                &partial,
            );
            (UnitStatus::TimeoutError, None, message, truncated)
        }
        UnitOutcome::InvokeFailed(error) => (UnitStatus::InfrastructureError, None, error.to_string(), false),
        UnitOutcome::Infrastructure(message) => (UnitStatus::InfrastructureError, None, message, false),
        UnitOutcome::Interrupted => (
            UnitStatus::InfrastructureError,
            None,
            "fetch interrupted by worker shutdown".to_string(),
            false,
        ),
    };

    let message = match bound(&message, message_limit) {
        Some(bounded) => {
            truncated = true;
            bounded
        }
        None => message,
    };

    Classification {
        status,
        exit_code,
        message,
        truncated,
    }
}

fn combine_output(invocation: &Invocation) -> String {
    join_nonempty(invocation.stdout.text().trim(), invocation.stderr.text().trim())
}

fn join_nonempty(first: &str, second: &str) -> String {
    match (first.is_empty(), second.is_empty()) {
        (_, true) => first.to_string(),
        (true, false) => second.to_string(),
        (false, false) => format!("{}\n{}", first, second),
    }
}

/// Cut `text` to at most `limit` bytes on a char boundary, or `None` if it fits.
fn bound(text: &str, limit: usize) -> Option<String> {
    if text.len() <= limit {
        return None;
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    Some(text[..end].to_string())
}

/// A worker instance: processes its units one at a time and owns the
/// store clients it creates until [`Worker::shutdown`].
pub struct Worker {
    config: WorkerConfig,
    command: ValidatorCommand,
    limits: InvokeLimits,
    fetcher: Fetcher,
    shutdown: ShutdownSignal,
}

impl Worker {
    /// Called once per worker instance.
    pub fn init(config: WorkerConfig, shutdown: ShutdownSignal) -> Self {
        let command = ValidatorCommand::new(&config.validator_command).with_args(config.validator_args.clone());
        let limits = InvokeLimits {
            timeout: Duration::from_millis(config.timeout_ms),
            capture_limit: config.capture_limit_bytes,
        };
        let fetcher = Fetcher::new(
            config.datastores.clone(),
            config.store_options.clone(),
            Duration::from_millis(config.fetch_timeout_ms),
        );

        if !process::looks_executable(&command.program) {
            tracing::warn!(
                validator = %command.program.display(),
                "validator is not an executable file; units will report InfrastructureError"
            );
        }

        tracing::info!(
            validator = %command.program.display(),
            timeout_ms = config.timeout_ms,
            roles = ?config.roles,
            "worker initialised"
        );

        Worker {
            config,
            command,
            limits,
            fetcher,
            shutdown,
        }
    }

    /// Process a mini-batch. Returns one row per unit, in input order.
    pub async fn run_batch(&mut self, units: &[ValidationUnit]) -> Vec<ResultRow> {
        let mut rows = Vec::with_capacity(units.len());

        for unit in units {
            let start = Instant::now();
            let row = match AssertUnwindSafe(self.run_unit(unit)).catch_unwind().await {
                Ok(row) => row,
                Err(_) => {
                    tracing::error!(unit = unit.index, "unit panicked");
                    ResultRow::new(unit, UnitStatus::InfrastructureError, start.elapsed().as_millis() as u64)
                        .with_message("worker panicked while processing unit", false)
                }
            };
            rows.push(row);
        }

        debug_assert_eq!(rows.len(), units.len());
        rows
    }

    /// Process one unit. Never fails: every fault becomes the unit's row.
    pub async fn run_unit(&mut self, unit: &ValidationUnit) -> ResultRow {
        let span = tracing::info_span!("unit", unit = unit.index, primary = %unit.primary_uri());
        self.run_unit_inner(unit).instrument(span).await
    }

    async fn run_unit_inner(&mut self, unit: &ValidationUnit) -> ResultRow {
        let start = Instant::now();

        let outcome = if self.shutdown.is_triggered() {
            UnitOutcome::Infrastructure(SHUTDOWN_MESSAGE.to_string())
        } else {
            match StagingArea::create(self.config.staging_root.as_deref(), unit.index) {
                Ok(staging) => {
                    let outcome = self.fetch_and_invoke(unit, &staging).await;
                    let staged_at = staging.path().to_path_buf();
                    if let Err(e) = staging.release() {
                        tracing::warn!(path = %staged_at.display(), error = %e, "failed to remove staging area");
                    }
                    outcome
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to create staging area");
                    UnitOutcome::Infrastructure(format!("failed to create staging area: {}", e))
                }
            }
        };

        let classification = classify(outcome, self.config.capture_limit_bytes);
        let row = ResultRow::new(unit, classification.status, start.elapsed().as_millis() as u64)
            .with_exit_code(classification.exit_code)
            .with_message(classification.message, classification.truncated);

        match row.status {
            UnitStatus::Passed => tracing::info!(status = %row.status, duration_ms = row.duration_ms, "unit finished"),
            _ => tracing::warn!(
                status = %row.status,
                exit_code = ?row.exit_code,
                duration_ms = row.duration_ms,
                "unit finished"
            ),
        }

        row
    }

    async fn fetch_and_invoke(&mut self, unit: &ValidationUnit, staging: &StagingArea) -> UnitOutcome {
        let mut paths: Vec<PathBuf> = Vec::with_capacity(unit.resources.len());

        for resource in &unit.resources {
            let dest = staging.role_dir(&resource.role);
            let mut shutdown = self.shutdown.clone();
            let fetched = tokio::select! {
                fetched = self.fetcher.fetch(&resource.uri, &dest) => fetched,
                _ = shutdown.triggered() => return UnitOutcome::Interrupted,
            };

            match fetched {
                Ok(path) => paths.push(path),
                Err(error) => {
                    tracing::error!(role = %resource.role, uri = %resource.uri, error = %error, "fetch failed");
                    return UnitOutcome::FetchFailed {
                        role: resource.role.clone(),
                        error,
                    };
                }
            }
        }

        let mut shutdown = self.shutdown.clone();
        match process::run_validator(&self.command, &paths, self.limits, &mut shutdown).await {
            Ok(invocation) => UnitOutcome::Completed(invocation),
            Err(error) => UnitOutcome::InvokeFailed(error),
        }
    }

    /// Number of store clients held by this worker.
    pub fn cached_stores(&self) -> usize {
        self.fetcher.cached_stores()
    }

    /// Called once when the worker is done. Releases cached store clients.
    pub fn shutdown(mut self) {
        let released = self.fetcher.cached_stores();
        self.fetcher.release();
        tracing::info!(released_stores = released, "worker shutdown complete");
    }
}
