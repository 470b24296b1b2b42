//! Output formatting for batch-validate.
//!
//! Provides terminal, JSON, JSON lines, CSV and JUnit XML formatters.
//!
//! # Graceful Degradation
//!
//! - Non-TTY output: color disabled via NO_COLOR or --no-color
//! - Non-UTF8 validator output: already lossily decoded into the row message
//! - Empty reports: valid output with zero units
//! - Appending: CSV header written only when the target file is new or empty
//!
//! No function in this module will panic.

use chrono::SecondsFormat;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use crate::cli::args::OutputFormat;
use crate::engine::result::{BatchReport, ResultRow};
use crate::UnitStatus;

/// Trait for output formatters
pub trait OutputFormatter {
    /// Format a batch report into a string
    fn format(&self, report: &BatchReport) -> String;
}

/// Terminal (human-readable) formatter
pub struct TerminalFormatter {
    color: bool,
    verbose: bool,
    quiet: bool,
}

impl TerminalFormatter {
    pub fn new(color: bool, verbose: bool, quiet: bool) -> Self {
        TerminalFormatter {
            color,
            verbose,
            quiet,
        }
    }

    fn colorize(&self, text: &str, color_code: &str) -> String {
        if self.color {
            format!("\x1b[{}m{}\x1b[0m", color_code, text)
        } else {
            text.to_string()
        }
    }

    fn badge(&self, status: UnitStatus) -> String {
        match status {
            UnitStatus::Passed => self.colorize("[PASS]", "32"),
            UnitStatus::Failed => self.colorize("[FAIL]", "31"),
            UnitStatus::FetchError => self.colorize("[FTCH]", "33"),
            UnitStatus::TimeoutError => self.colorize("[TIME]", "33"),
            UnitStatus::InfrastructureError => self.colorize("[INFR]", "35"),
        }
    }

    fn gray(&self, text: &str) -> String {
        self.colorize(text, "90")
    }
}

impl OutputFormatter for TerminalFormatter {
    fn format(&self, report: &BatchReport) -> String {
        let rule = "--------------------------------------------------------------------------------\n";
        let mut output = String::new();

        output.push_str(rule);
        output.push_str("batch-validate report\n");
        output.push_str(&format!("Host: {}\n", report.hostname));
        output.push_str(&format!("Roles: {}\n", report.roles.join(", ")));
        output.push_str(&format!("Timestamp: {}\n", format_timestamp(report)));
        output.push_str(rule);
        output.push('\n');

        for row in &report.rows {
            if self.quiet && row.status == UnitStatus::Passed {
                continue;
            }

            let code = match row.exit_code {
                Some(code) => format!("exit {}", code),
                None => "no exit code".to_string(),
            };
            output.push_str(&format!(
                "  {} unit {}: {} ({}, {}ms)\n",
                self.badge(row.status),
                row.unit,
                primary_label(row),
                code,
                row.duration_ms
            ));

            let show_message = self.verbose || !row.status.is_verdict() || row.status == UnitStatus::Failed;
            if show_message && !row.message.is_empty() {
                for line in row.message.lines() {
                    output.push_str(&format!("      {}\n", self.gray(line)));
                }
                if row.truncated {
                    output.push_str(&format!("      {}\n", self.gray("[output truncated]")));
                }
            }
        }

        if !report.rows.is_empty() {
            output.push('\n');
        }

        let summary = report.summary();
        output.push_str(rule);
        output.push_str(&format!(
            "SUMMARY: {} passed, {} failed, {} fetch errors, {} timeouts, {} infrastructure errors\n",
            summary.passed, summary.failed, summary.fetch_errors, summary.timeouts, summary.infrastructure_errors
        ));
        output.push_str(&format!(
            "Total time: {:.1}s\n",
            report.total_duration_ms as f64 / 1000.0
        ));

        let exit_desc = match summary.exit_code() {
            0 => "all units passed",
            1 => "validation failures detected",
            _ => "infrastructure faults detected",
        };
        output.push_str(&format!("Exit code: {} ({})\n", summary.exit_code(), exit_desc));
        output.push_str(rule.trim_end());

        output
    }
}

/// JSON formatter: the whole report as one document
pub struct JsonFormatter {
    pretty: bool,
}

impl JsonFormatter {
    pub fn new(pretty: bool) -> Self {
        JsonFormatter { pretty }
    }
}

impl OutputFormatter for JsonFormatter {
    fn format(&self, report: &BatchReport) -> String {
        let rendered = if self.pretty {
            serde_json::to_string_pretty(report)
        } else {
            serde_json::to_string(report)
        };
        rendered.unwrap_or_else(|e| serde_json::json!({ "error": e.to_string() }).to_string())
    }
}

/// JSON lines formatter: one row object per line
pub struct JsonLinesFormatter;

impl OutputFormatter for JsonLinesFormatter {
    fn format(&self, report: &BatchReport) -> String {
        let mut output = String::new();
        for row in &report.rows {
            match serde_json::to_string(row) {
                Ok(line) => {
                    output.push_str(&line);
                    output.push('\n');
                }
                Err(e) => tracing::error!(unit = row.unit, error = %e, "failed to encode row"),
            }
        }
        output
    }
}

/// CSV formatter: one record per row, role columns in role order
pub struct CsvFormatter {
    header: bool,
}

impl CsvFormatter {
    pub fn new(header: bool) -> Self {
        CsvFormatter { header }
    }

    fn columns(roles: &[String]) -> Vec<&str> {
        let mut columns = vec!["unit"];
        columns.extend(roles.iter().map(String::as_str));
        columns.extend(["status", "exit_code", "message", "truncated", "duration_ms"]);
        columns
    }

    fn record(roles: &[String], row: &ResultRow) -> Vec<String> {
        let mut record = vec![row.unit.to_string()];
        record.extend(roles.iter().map(|role| row.uri(role).unwrap_or_default().to_string()));
        record.push(row.status.to_string());
        record.push(row.exit_code.map(|c| c.to_string()).unwrap_or_default());
        record.push(row.message.clone());
        record.push(row.truncated.to_string());
        record.push(row.duration_ms.to_string());
        record
    }

    fn render(&self, report: &BatchReport) -> Result<String, csv::Error> {
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(Vec::new());

        if self.header {
            writer.write_record(Self::columns(&report.roles))?;
        }
        for row in &report.rows {
            writer.write_record(Self::record(&report.roles, row))?;
        }

        let bytes = writer.into_inner().map_err(|e| csv::Error::from(e.into_error()))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl OutputFormatter for CsvFormatter {
    fn format(&self, report: &BatchReport) -> String {
        self.render(report).unwrap_or_else(|e| {
            tracing::error!(error = %e, "failed to encode CSV output");
            String::new()
        })
    }
}

/// JUnit XML formatter
pub struct JunitFormatter;

impl JunitFormatter {
    pub fn new() -> Self {
        JunitFormatter
    }

    fn escape_xml(s: &str) -> String {
        let mut result = String::with_capacity(s.len());
        for c in s.chars() {
            match c {
                '&' => result.push_str("&amp;"),
                '<' => result.push_str("&lt;"),
                '>' => result.push_str("&gt;"),
                '"' => result.push_str("&quot;"),
                '\'' => result.push_str("&apos;"),
                // Not representable in XML 1.0
                c if c.is_control() && !matches!(c, '\n' | '\r' | '\t') => {}
                c => result.push(c),
            }
        }
        result
    }
}

impl Default for JunitFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputFormatter for JunitFormatter {
    fn format(&self, report: &BatchReport) -> String {
        let summary = report.summary();
        let time = report.total_duration_ms as f64 / 1000.0;
        let mut output = String::new();

        output.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        output.push_str(&format!(
            "<testsuites tests=\"{}\" failures=\"{}\" errors=\"{}\" skipped=\"0\" time=\"{:.3}\">\n",
            summary.total,
            summary.failed,
            summary.faults(),
            time
        ));
        output.push_str(&format!(
            "  <testsuite name=\"batch-validate\" hostname=\"{}\" timestamp=\"{}\" tests=\"{}\" failures=\"{}\" errors=\"{}\" skipped=\"0\" time=\"{:.3}\">\n",
            Self::escape_xml(&report.hostname),
            format_timestamp(report),
            summary.total,
            summary.failed,
            summary.faults(),
            time
        ));

        for row in &report.rows {
            output.push_str(&format!(
                "    <testcase name=\"unit-{}\" classname=\"batch-validate.{}\" time=\"{:.3}\">\n",
                row.unit,
                Self::escape_xml(&primary_label(row)),
                row.duration_ms as f64 / 1000.0
            ));

            let message = Self::escape_xml(&row.message);
            match row.status {
                UnitStatus::Passed => {
                    output.push_str(&format!("      <system-out>{}</system-out>\n", message));
                }
                UnitStatus::Failed => {
                    let code = row.exit_code.map(|c| c.to_string()).unwrap_or_default();
                    output.push_str(&format!(
                        "      <failure message=\"validator exited with {}\" type=\"Failed\">{}</failure>\n",
                        code, message
                    ));
                }
                fault => {
                    let first_line = row.message.lines().next().unwrap_or_default();
                    output.push_str(&format!(
                        "      <error message=\"{}\" type=\"{}\">{}</error>\n",
                        Self::escape_xml(first_line),
                        fault,
                        message
                    ));
                }
            }

            output.push_str("    </testcase>\n");
        }

        output.push_str("  </testsuite>\n");
        output.push_str("</testsuites>");
        output
    }
}

/// Get a formatter based on the output format.
///
/// `header` only affects CSV output.
pub fn get_formatter(
    format: OutputFormat,
    no_color: bool,
    verbose: bool,
    quiet: bool,
    header: bool,
) -> Box<dyn OutputFormatter> {
    match format {
        OutputFormat::Text => Box::new(TerminalFormatter::new(!no_color, verbose, quiet)),
        OutputFormat::Json => Box::new(JsonFormatter::new(true)),
        OutputFormat::Jsonl => Box::new(JsonLinesFormatter),
        OutputFormat::Csv => Box::new(CsvFormatter::new(header)),
        OutputFormat::Junit => Box::new(JunitFormatter::new()),
    }
}

/// True unless rows are being appended to a file that already has content.
pub fn needs_header(output: Option<&Path>, append: bool) -> bool {
    match output {
        Some(path) if append => std::fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true),
        _ => true,
    }
}

/// Write rendered output to `output`, or stdout when no file is given.
pub fn write_output(rendered: &str, output: Option<&Path>, append: bool) -> Result<(), crate::Error> {
    let context = output
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "stdout".to_string());
    let to_error = |source| crate::Error::Output {
        context: context.clone(),
        source,
    };

    match output {
        Some(path) => {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .append(append)
                .truncate(!append)
                .open(path)
                .map_err(to_error)?;
            file.write_all(rendered.as_bytes()).map_err(to_error)?;
            if !rendered.is_empty() && !rendered.ends_with('\n') {
                file.write_all(b"\n").map_err(to_error)?;
            }
            file.flush().map_err(to_error)
        }
        None => {
            let stdout = std::io::stdout();
            let mut lock = stdout.lock();
            lock.write_all(rendered.as_bytes()).map_err(to_error)?;
            if !rendered.is_empty() && !rendered.ends_with('\n') {
                lock.write_all(b"\n").map_err(to_error)?;
            }
            lock.flush().map_err(to_error)
        }
    }
}

fn format_timestamp(report: &BatchReport) -> String {
    report.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// File name of the unit's first resource, for display.
fn primary_label(row: &ResultRow) -> String {
    let uri = row.resources.first().map(|r| r.uri.as_str()).unwrap_or_default();
    if uri.is_empty() {
        return "(empty)".to_string();
    }
    uri.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(uri)
        .to_string()
}
