//! CLI module for loom - command-line interface, subcommands and report
//! printing.

pub mod commands;

pub use commands::Cli;

use colored::*;
use eyre::{Context, Result};
use loom::domain::{BulkResult, Outcome};
use serde::Serialize;

/// Print `value` as pretty JSON on stdout.
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("Failed to serialize report")?;
    println!("{}", text);
    Ok(())
}

/// Print the report and a one-line summary on stderr. Returns whether every
/// repository succeeded or was skipped.
pub fn print_report<T: Outcome + Serialize>(label: &str, report: &BulkResult<T>) -> Result<bool> {
    print_json(report)?;
    Ok(print_summary(label, report))
}

/// Colored counts line on stderr.
pub fn print_summary<T: Outcome>(label: &str, report: &BulkResult<T>) -> bool {
    let line = format!(
        "{}: {} succeeded, {} skipped, {} failed ({:.0}% success) in {}ms",
        label,
        report.succeeded_count,
        report.skipped_count,
        report.failed_count,
        report.success_rate() * 100.0,
        report.total_duration_ms
    );
    if report.failed_count == 0 {
        eprintln!("{}", line.green());
    } else {
        eprintln!("{}", line.red());
    }
    report.failed_count == 0
}
