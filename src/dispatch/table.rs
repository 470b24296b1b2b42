//! CSV dispatch table loading.
//!
//! The table must have a header row. Role columns are located by name, so
//! column order in the file does not matter and extra columns are ignored.
//!
//! # Graceful Degradation
//!
//! - Short records: missing fields become empty identifiers
//! - Non-UTF8 cells: decoded lossily
//! - Blank lines: skipped by the CSV reader
//!
//! Every record that the reader yields becomes a unit; only a missing role
//! column or an unreadable file fails the whole table.

use super::{DispatchError, RoleSet, ValidationUnit};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

/// A problem found by [`DispatchTable::schema_problems`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableProblem {
    pub unit: u64,
    pub role: String,
    pub message: String,
}

/// The loaded, ordered list of units for one mini-batch.
#[derive(Debug, Clone)]
pub struct DispatchTable {
    roles: RoleSet,
    units: Vec<ValidationUnit>,
}

impl DispatchTable {
    /// Load a table from a file path; `-` reads from stdin.
    pub fn from_path(path: &Path, roles: &RoleSet, first_unit: u64) -> Result<Self, DispatchError> {
        if path.as_os_str() == "-" {
            return Self::from_reader(io::stdin().lock(), roles, first_unit);
        }

        let file = File::open(path).map_err(|source| DispatchError::Open {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_reader(BufReader::new(file), roles, first_unit)
    }

    /// Load a table from any CSV source.
    pub fn from_reader<R: Read>(reader: R, roles: &RoleSet, first_unit: u64) -> Result<Self, DispatchError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = csv_reader.byte_headers()?.clone();
        let header_names: Vec<String> = headers
            .iter()
            .map(|h| String::from_utf8_lossy(h).into_owned())
            .collect();

        let mut columns = Vec::with_capacity(roles.len());
        for role in roles.names() {
            match header_names.iter().position(|h| h == role) {
                Some(idx) => columns.push(idx),
                None => {
                    return Err(DispatchError::MissingColumn {
                        role: role.clone(),
                        found: header_names.join(", "),
                    })
                }
            }
        }

        for extra in header_names.iter().filter(|h| !roles.names().contains(h)) {
            tracing::debug!(column = %extra, "ignoring dispatch table column");
        }

        let mut units = Vec::new();
        for (position, record) in csv_reader.byte_records().enumerate() {
            let record = record?;
            let uris = columns
                .iter()
                .map(|&idx| {
                    record
                        .get(idx)
                        .map(|cell| String::from_utf8_lossy(cell).into_owned())
                        .unwrap_or_default()
                })
                .collect();
            units.push(ValidationUnit::new(first_unit + position as u64, roles, uris));
        }

        tracing::debug!(units = units.len(), "loaded dispatch table");

        Ok(DispatchTable {
            roles: roles.clone(),
            units,
        })
    }

    pub fn roles(&self) -> &RoleSet {
        &self.roles
    }

    pub fn units(&self) -> &[ValidationUnit] {
        &self.units
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Cells that would make a unit fail before fetching: blank identifiers.
    pub fn schema_problems(&self) -> Vec<TableProblem> {
        self.units
            .iter()
            .flat_map(|unit| {
                unit.resources
                    .iter()
                    .filter(|r| r.uri.trim().is_empty())
                    .map(move |r| TableProblem {
                        unit: unit.index,
                        role: r.role.clone(),
                        message: "empty resource identifier".to_string(),
                    })
            })
            .collect()
    }
}
