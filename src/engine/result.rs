//! Result rows and batch reports.
//!
//! A [`ResultRow`] is emitted exactly once per unit. A [`BatchReport`] wraps
//! the rows of one worker run with host metadata and summary statistics.

use chrono::{DateTime, Utc};
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

use crate::dispatch::{Resource, ValidationUnit};
use crate::UnitStatus;

/// One output row.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow {
    pub unit: u64,
    pub resources: Vec<Resource>,
    pub status: UnitStatus,
    pub exit_code: Option<i32>,
    pub message: String,
    pub truncated: bool,
    pub duration_ms: u64,
}

impl ResultRow {
    pub fn new(unit: &ValidationUnit, status: UnitStatus, duration_ms: u64) -> Self {
        ResultRow {
            unit: unit.index,
            resources: unit.resources.clone(),
            status,
            exit_code: None,
            message: String::new(),
            truncated: false,
            duration_ms,
        }
    }

    pub fn with_exit_code(mut self, code: Option<i32>) -> Self {
        self.exit_code = code;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>, truncated: bool) -> Self {
        self.message = message.into();
        self.truncated = truncated;
        self
    }

    /// Identifier for `role`, if the row has one.
    pub fn uri(&self, role: &str) -> Option<&str> {
        self.resources
            .iter()
            .find(|r| r.role == role)
            .map(|r| r.uri.as_str())
    }
}

/// Rows serialize flat: the role columns sit next to the fixed columns.
impl Serialize for ResultRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.resources.len() + 6))?;
        map.serialize_entry("unit", &self.unit)?;
        for resource in &self.resources {
            map.serialize_entry(&resource.role, &resource.uri)?;
        }
        map.serialize_entry("status", &self.status)?;
        map.serialize_entry("exit_code", &self.exit_code)?;
        map.serialize_entry("message", &self.message)?;
        map.serialize_entry("truncated", &self.truncated)?;
        map.serialize_entry("duration_ms", &self.duration_ms)?;
        map.end()
    }
}

/// Result summary statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultSummary {
    pub passed: u32,
    pub failed: u32,
    pub fetch_errors: u32,
    pub timeouts: u32,
    pub infrastructure_errors: u32,
    pub total: u32,
    pub total_duration_ms: u64,
}

impl ResultSummary {
    /// Units that ended in a worker-side fault rather than a verdict.
    pub fn faults(&self) -> u32 {
        self.fetch_errors + self.timeouts + self.infrastructure_errors
    }

    /// Process exit code for this summary.
    ///
    /// `0` all passed, `1` at least one validator failure, `2` faults only.
    pub fn exit_code(&self) -> u8 {
        if self.failed > 0 {
            1
        } else if self.faults() > 0 {
            2
        } else {
            0
        }
    }
}

/// Report of one worker run.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub timestamp: DateTime<Utc>,
    pub hostname: String,
    pub roles: Vec<String>,
    pub total_duration_ms: u64,
    pub summary: ResultSummary,
    pub rows: Vec<ResultRow>,
}

impl BatchReport {
    pub fn new(roles: Vec<String>, rows: Vec<ResultRow>, total_duration_ms: u64) -> Self {
        let summary = summarize(&rows);
        BatchReport {
            timestamp: Utc::now(),
            hostname: crate::platform::host::get_hostname().unwrap_or_else(|_| "unknown".to_string()),
            roles,
            total_duration_ms,
            summary,
            rows,
        }
    }

    pub fn summary(&self) -> &ResultSummary {
        &self.summary
    }
}

/// Count rows by status.
pub fn summarize(rows: &[ResultRow]) -> ResultSummary {
    let mut summary = ResultSummary::default();

    for row in rows {
        summary.total += 1;
        summary.total_duration_ms += row.duration_ms;

        match row.status {
            UnitStatus::Passed => summary.passed += 1,
            UnitStatus::Failed => summary.failed += 1,
            UnitStatus::FetchError => summary.fetch_errors += 1,
            UnitStatus::TimeoutError => summary.timeouts += 1,
            UnitStatus::InfrastructureError => summary.infrastructure_errors += 1,
        }
    }

    summary
}
