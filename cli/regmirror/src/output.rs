//! Output formatting for CLI commands.

use std::time::Duration;

use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{Table, Tabled};

/// Output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table format.
    #[default]
    Table,
    /// JSON format.
    Json,
}

/// Print rows in the specified format.
pub fn print_output<T: Serialize + Tabled>(data: &[T], format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            if data.is_empty() {
                println!("{}", "No items found.".dimmed());
            } else {
                println!("{}", Table::new(data));
            }
        }
        OutputFormat::Json => print_json(&data),
    }
}

/// Print a value as pretty JSON.
pub fn print_json<T: Serialize + ?Sized>(data: &T) {
    let json = serde_json::to_string_pretty(data).unwrap_or_else(|_| "{}".to_string());
    println!("{json}");
}

/// Print a success message.
pub fn print_success(message: &str) {
    println!("{} {}", "Success:".green().bold(), message);
}

/// Print an info message.
pub fn print_info(message: &str) {
    println!("{} {}", "Info:".blue().bold(), message);
}

/// Print a warning message.
pub fn print_warning(message: &str) {
    println!("{} {}", "Warning:".yellow().bold(), message);
}

/// Bytes as MiB with two decimals.
pub fn format_mib(bytes: u64) -> String {
    format!("{:.2} MiB", bytes as f64 / (1024.0 * 1024.0))
}

/// Seconds with one decimal.
pub fn format_secs(secs: f64) -> String {
    format!("{secs:.1}s")
}

pub fn format_duration(duration: Duration) -> String {
    format_secs(duration.as_secs_f64())
}
