//! Local-disk datasets that stand in for blob storage.

use batch_validate::{DispatchTable, RoleSet};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Extension of the file written for each default role.
const ROLE_EXTENSIONS: [&str; 3] = ["bin", "lbl", "meta"];

/// `count` units, each with one file per default role.
pub struct MockDataset {
    dir: TempDir,
    rows: Vec<Vec<String>>,
}

impl MockDataset {
    pub fn new(count: usize) -> Self {
        let dir = tempfile::tempdir().expect("create dataset dir");
        let mut rows = Vec::with_capacity(count);

        for i in 0..count {
            let row = ROLE_EXTENSIONS
                .iter()
                .map(|ext| {
                    let path = dir.path().join(format!("unit-{}.{}", i, ext));
                    std::fs::write(&path, content_for(i, ext)).expect("write dataset file");
                    path.display().to_string()
                })
                .collect();
            rows.push(row);
        }

        MockDataset { dir, rows }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Identifiers of unit `i`, in role order.
    pub fn uris(&self, i: usize) -> &[String] {
        &self.rows[i]
    }

    /// Point one role of one unit at a different identifier.
    pub fn set_uri(&mut self, unit: usize, role: usize, uri: impl Into<String>) {
        self.rows[unit][role] = uri.into();
    }

    pub fn csv(&self) -> String {
        let mut out = String::from("sequence_path,label_path,third_data_path\n");
        for row in &self.rows {
            out.push_str(&row.join(","));
            out.push('\n');
        }
        out
    }

    pub fn write_csv(&self) -> PathBuf {
        let path = self.dir.path().join("dispatch.csv");
        std::fs::write(&path, self.csv()).expect("write dispatch table");
        path
    }

    pub fn table(&self) -> DispatchTable {
        DispatchTable::from_reader(self.csv().as_bytes(), &RoleSet::default(), 0).expect("parse dispatch table")
    }
}

/// Bytes written for unit `i`'s file with extension `ext`.
pub fn content_for(i: usize, ext: &str) -> String {
    format!("{}:{}\n", ext, i)
}
