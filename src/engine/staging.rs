//! Per-unit staging areas.
//!
//! Each unit gets its own temporary directory with one sub-directory per
//! role, so resources whose remote names collide never overwrite each other.
//! Role names are plain identifiers (see [`crate::dispatch::check_role_name`]),
//! so each role maps to a distinct directory.
//! The directory is removed by [`StagingArea::release`] or, failing that,
//! when the area is dropped.

use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub struct StagingArea {
    dir: TempDir,
}

impl StagingArea {
    /// Create a staging directory under `root`, or under the system temp
    /// directory when no root is configured.
    pub fn create(root: Option<&Path>, unit: u64) -> io::Result<Self> {
        let prefix = format!("unit-{}-", unit);
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);

        let dir = match root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };

        Ok(StagingArea { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Directory that holds the file staged for `role`.
    ///
    /// Characters outside a valid role name are replaced so the result
    /// always stays inside the staging area.
    pub fn role_dir(&self, role: &str) -> PathBuf {
        let safe: String = role
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
            .collect();
        self.dir.path().join(safe)
    }

    /// Remove the staging directory, reporting any failure.
    pub fn release(self) -> io::Result<()> {
        self.dir.close()
    }
}
