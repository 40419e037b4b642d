//! Output formatting utilities

use chrono::{TimeZone, Utc};
use clap::ValueEnum;
use colored::Colorize;

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Format a utilization percentage
pub fn format_percent(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:.1}%", v),
        None => "-".to_string(),
    }
}

/// Format a unix timestamp in UTC
pub fn format_timestamp(secs: i64) -> String {
    Utc.timestamp_opt(secs, 0)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| secs.to_string())
}

/// Color status based on value
pub fn color_status(status: &str) -> String {
    match status.to_lowercase().as_str() {
        "success" | "healthy" | "running" | "deleted" => status.green().to_string(),
        "unsafe" | "degraded" | "stopping" | "terminated" => status.yellow().to_string(),
        "failed" | "unhealthy" => status.red().to_string(),
        "critical_failure" => status.red().bold().to_string(),
        _ => status.to_string(),
    }
}
