//! Worker configuration.
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! environment variables and command line flags (applied by the CLI).
//!
//! ```toml
//! validator_command = "/opt/validation/validate.sh"
//! validator_args = []
//! timeout_ms = 600000
//! fetch_timeout_ms = 300000
//! capture_limit_bytes = 65536
//! roles = ["sequence_path", "label_path", "third_data_path"]
//! first_unit = 0
//!
//! [datastores]
//! workspaceblobstore = "az://validation-data"
//!
//! [store_options]
//! azure_storage_account_name = "examplestorage"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::dispatch::{RoleSet, DEFAULT_ROLES};

/// Default validator location inside the worker image.
pub const DEFAULT_VALIDATOR: &str = "/opt/validation/validate.sh";
/// Default per-unit validator bound: 10 minutes.
pub const DEFAULT_TIMEOUT_MS: u64 = 600_000;
/// Default per-resource fetch bound: 5 minutes.
pub const DEFAULT_FETCH_TIMEOUT_MS: u64 = 300_000;
/// Default per-stream output capture.
pub const DEFAULT_CAPTURE_LIMIT: usize = 64 * 1024;

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Everything a worker needs to process units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkerConfig {
    /// Validator program
    pub validator_command: PathBuf,
    /// Arguments placed before the staged paths
    pub validator_args: Vec<String>,
    /// Validator time bound per unit
    pub timeout_ms: u64,
    /// Time bound per resource download
    pub fetch_timeout_ms: u64,
    /// Parent of per-unit staging directories; system temp dir when unset
    pub staging_root: Option<PathBuf>,
    /// Bytes kept per output stream and for the row message
    pub capture_limit_bytes: usize,
    /// Ordered role names; also the dispatch table columns
    pub roles: Vec<String>,
    /// Index of the first unit in this worker's table
    pub first_unit: u64,
    /// Datastore name to store URL, for long-form identifiers
    pub datastores: BTreeMap<String, String>,
    /// Options passed to every object store client
    pub store_options: BTreeMap<String, String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            validator_command: PathBuf::from(DEFAULT_VALIDATOR),
            validator_args: Vec::new(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            fetch_timeout_ms: DEFAULT_FETCH_TIMEOUT_MS,
            staging_root: None,
            capture_limit_bytes: DEFAULT_CAPTURE_LIMIT,
            roles: DEFAULT_ROLES.iter().map(|r| r.to_string()).collect(),
            first_unit: 0,
            datastores: BTreeMap::new(),
            store_options: BTreeMap::new(),
        }
    }
}

impl WorkerConfig {
    /// Load a TOML file on top of the defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Reject values the worker cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_ms == 0 {
            return Err(ConfigError::Invalid("timeout_ms must be greater than zero".into()));
        }
        if self.fetch_timeout_ms == 0 {
            return Err(ConfigError::Invalid("fetch_timeout_ms must be greater than zero".into()));
        }
        if self.capture_limit_bytes == 0 {
            return Err(ConfigError::Invalid("capture_limit_bytes must be greater than zero".into()));
        }
        if self.validator_command.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("validator_command must not be empty".into()));
        }
        RoleSet::new(self.roles.clone()).map_err(|e| ConfigError::Invalid(e.to_string()))?;

        for (name, url) in &self.datastores {
            if url::Url::parse(url).is_err() {
                return Err(ConfigError::Invalid(format!(
                    "datastore '{}' maps to '{}', which is not a URL",
                    name, url
                )));
            }
        }

        Ok(())
    }
}
