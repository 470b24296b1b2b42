//! Command line arguments for batch-validate.
//!
//! Every worker setting can also come from the environment
//! (`BATCH_VALIDATE_*`), which is how batch platforms usually pass them.
//! Flags and environment override the TOML file given with `--config`.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::config::{ConfigError, WorkerConfig};
use crate::logging::LogFormat;

/// Stage blob-stored resources, run a validator on them and report one
/// row per unit.
#[derive(Debug, Parser)]
#[command(name = "batch-validate", version, about)]
pub struct Cli {
    /// Log line encoding (logs always go to stderr)
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text, env = "BATCH_VALIDATE_LOG_FORMAT")]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

/// Command to execute
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Process every unit of a dispatch table
    Run(RunArgs),
    /// Check a dispatch table without running anything
    CheckTable(TableArgs),
    /// Print version information
    Version,
}

/// Output format selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable terminal output
    #[default]
    Text,
    /// Full report as one JSON document
    Json,
    /// One JSON row per line
    Jsonl,
    /// One CSV row per unit
    Csv,
    /// JUnit XML for CI/CD integration
    Junit,
}

impl OutputFormat {
    /// Formats that can be appended to an existing result file.
    pub fn is_appendable(self) -> bool {
        matches!(self, OutputFormat::Jsonl | OutputFormat::Csv)
    }
}

/// Where the dispatch table comes from and how to read it.
#[derive(Debug, Clone, Args)]
pub struct TableArgs {
    /// Dispatch table CSV, or `-` for stdin
    #[arg(value_name = "TABLE")]
    pub table: String,

    /// Configuration file (TOML)
    #[arg(short, long, env = "BATCH_VALIDATE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Role names in validator argument order (comma-separated or repeated)
    #[arg(long = "role", value_name = "ROLE", value_delimiter = ',', env = "BATCH_VALIDATE_ROLES")]
    pub roles: Vec<String>,

    /// Index of the table's first unit
    #[arg(long, env = "BATCH_VALIDATE_FIRST_UNIT")]
    pub first_unit: Option<u64>,
}

/// Arguments of the `run` command.
#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub table: TableArgs,

    /// Validator program
    #[arg(long, env = "BATCH_VALIDATE_VALIDATOR")]
    pub validator: Option<PathBuf>,

    /// Argument placed before the staged paths (repeatable)
    #[arg(long = "validator-arg", value_name = "ARG", allow_hyphen_values = true)]
    pub validator_args: Vec<String>,

    /// Validator time bound per unit, in milliseconds
    #[arg(long, env = "BATCH_VALIDATE_TIMEOUT_MS")]
    pub timeout_ms: Option<u64>,

    /// Download time bound per resource, in milliseconds
    #[arg(long, env = "BATCH_VALIDATE_FETCH_TIMEOUT_MS")]
    pub fetch_timeout_ms: Option<u64>,

    /// Directory that holds per-unit staging areas
    #[arg(long, env = "BATCH_VALIDATE_STAGING_ROOT")]
    pub staging_root: Option<PathBuf>,

    /// Bytes of validator output kept per stream
    #[arg(long, env = "BATCH_VALIDATE_CAPTURE_LIMIT")]
    pub capture_limit: Option<usize>,

    /// Datastore location for long-form identifiers (repeatable)
    #[arg(long = "datastore", value_name = "NAME=URL", value_parser = parse_key_val)]
    pub datastores: Vec<(String, String)>,

    /// Object store client option (repeatable)
    #[arg(long = "store-option", value_name = "KEY=VALUE", value_parser = parse_key_val)]
    pub store_options: Vec<(String, String)>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text, env = "BATCH_VALIDATE_FORMAT")]
    pub format: OutputFormat,

    /// Write results to FILE instead of stdout
    #[arg(short, long, value_name = "FILE", env = "BATCH_VALIDATE_OUTPUT")]
    pub output: Option<PathBuf>,

    /// Append rows to FILE (jsonl and csv only)
    #[arg(long, requires = "output")]
    pub append: bool,

    /// Only show units that did not pass
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Show validator output for every unit
    #[arg(short, long)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long, env = "NO_COLOR", value_parser = clap::builder::FalseyValueParser::new())]
    pub no_color: bool,
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim().to_string(), value.trim().to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", s)),
    }
}

impl TableArgs {
    /// Defaults, then the config file, then table-level flags.
    pub fn resolve_config(&self) -> Result<WorkerConfig, ConfigError> {
        let config = self.merge_config()?;
        config.validate()?;
        Ok(config)
    }

    /// Layers without validation; later layers may still fix a bad value.
    fn merge_config(&self) -> Result<WorkerConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => WorkerConfig::from_file(path)?,
            None => WorkerConfig::default(),
        };

        if !self.roles.is_empty() {
            config.roles = self.roles.clone();
        }
        if let Some(first) = self.first_unit {
            config.first_unit = first;
        }

        Ok(config)
    }
}

impl RunArgs {
    /// Full worker configuration with every override applied.
    pub fn resolve_config(&self) -> Result<WorkerConfig, ConfigError> {
        let mut config = self.table.merge_config()?;

        if let Some(validator) = &self.validator {
            config.validator_command = validator.clone();
        }
        if !self.validator_args.is_empty() {
            config.validator_args = self.validator_args.clone();
        }
        if let Some(ms) = self.timeout_ms {
            config.timeout_ms = ms;
        }
        if let Some(ms) = self.fetch_timeout_ms {
            config.fetch_timeout_ms = ms;
        }
        if let Some(root) = &self.staging_root {
            config.staging_root = Some(root.clone());
        }
        if let Some(limit) = self.capture_limit {
            config.capture_limit_bytes = limit;
        }
        config.datastores.extend(self.datastores.iter().cloned());
        config.store_options.extend(self.store_options.iter().cloned());

        if self.append && !self.format.is_appendable() {
            return Err(ConfigError::Invalid(format!(
                "--append requires jsonl or csv output, not {:?}",
                self.format
            )));
        }

        config.validate()?;
        Ok(config)
    }
}
