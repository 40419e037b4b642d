//! Migration commands

use anyhow::Result;
use clap::ValueEnum;
use tabled::Tabled;

use crate::client::{ApiClient, MigrationRequest, MigrationResult};
use crate::output::{
    color_status, format_percent, format_timestamp, print_error, print_info, print_success,
    print_warning, OutputFormat,
};

/// Migration strategy accepted on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StrategyArg {
    /// Stop, change machine type, start
    InPlace,
    /// Snapshot the boot disk and recreate the instance
    Snapshot,
}

impl StrategyArg {
    /// Wire name understood by the executor API
    pub fn as_api_str(&self) -> &'static str {
        match self {
            StrategyArg::InPlace => "in_place",
            StrategyArg::Snapshot => "snapshot",
        }
    }
}

/// Row for the migration result table
#[derive(Tabled)]
struct ResultRow {
    #[tabled(rename = "Field")]
    field: String,
    #[tabled(rename = "Value")]
    value: String,
}

/// Process exit code for a terminal migration status
pub fn exit_code(status: &str) -> i32 {
    match status {
        "SUCCESS" | "UNSAFE" => 0,
        "CRITICAL_FAILURE" => 3,
        _ => 2,
    }
}

/// Run a migration and print its result; returns the terminal status
pub async fn migrate(
    client: &ApiClient,
    request: MigrationRequest,
    format: OutputFormat,
) -> Result<String> {
    if format == OutputFormat::Table {
        print_info(&format!(
            "Migrating {} to {} (this waits for the migration to finish)",
            request.instance_id, request.target_type
        ));
    }

    let result = client.migrate(&request).await?;

    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&result)?;
            println!("{}", json);
        }
        OutputFormat::Table => print_result(&result),
    }

    Ok(result.status)
}

fn print_result(result: &MigrationResult) {
    match result.status.as_str() {
        "SUCCESS" => print_success(&result.message),
        "UNSAFE" => print_warning(&result.message),
        _ => print_error(&result.message),
    }

    let mut rows = vec![
        row("Instance", result.instance_id.clone()),
        row("Strategy", result.strategy.clone()),
        row("Target type", result.target_machine_type.clone()),
        row("Status", color_status(&result.status)),
        row("Avg CPU", format_percent(result.avg_cpu)),
        row("Avg memory", format_percent(result.avg_mem)),
    ];
    if let Some(id) = &result.new_instance_id {
        rows.push(row("New instance", id.clone()));
    }
    if let Some(step) = &result.failed_step {
        rows.push(row("Failed step", step.clone()));
    }
    if let Some(state) = &result.last_known_state {
        let machine_type = state.machine_type.as_deref().unwrap_or("unknown");
        rows.push(row(
            "Last known state",
            format!("{} {} ({})", state.instance_id, color_status(&state.status), machine_type),
        ));
    }
    if let Some(cleanup) = &result.cleanup {
        let value = match &cleanup.reason {
            Some(reason) => format!("{} {}: {}", cleanup.instance_id, color_status(&cleanup.outcome), reason),
            None => format!("{} {}", cleanup.instance_id, color_status(&cleanup.outcome)),
        };
        rows.push(row("Cleanup", value));
    }
    if let Some(error) = &result.error {
        rows.push(row("Error", error.clone()));
    }
    rows.push(row("Finished", format_timestamp(result.finished_at)));

    let table = tabled::Table::new(rows)
        .with(tabled::settings::Style::rounded())
        .to_string();
    println!("{}", table);
}

fn row(field: &str, value: String) -> ResultRow {
    ResultRow {
        field: field.to_string(),
        value,
    }
}
