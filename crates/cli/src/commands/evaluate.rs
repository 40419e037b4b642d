//! Forecast safety evaluation

use anyhow::Result;
use tabled::Tabled;

use crate::client::{ApiClient, EvaluateRequest};
use crate::output::{format_percent, print_success, print_warning, OutputFormat};

#[derive(Tabled)]
struct VerdictRow {
    #[tabled(rename = "Safe")]
    safe: String,
    #[tabled(rename = "Avg CPU")]
    avg_cpu: String,
    #[tabled(rename = "Avg Memory")]
    avg_mem: String,
}

/// Ask the executor whether a 7-day forecast permits migration
pub async fn evaluate(
    client: &ApiClient,
    cpu: Vec<f64>,
    memory: Vec<f64>,
    format: OutputFormat,
) -> Result<()> {
    let verdict = client.evaluate(&EvaluateRequest { cpu, memory }).await?;

    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&verdict)?;
            println!("{}", json);
        }
        OutputFormat::Table => {
            if verdict.safe {
                print_success("Forecast is below both thresholds; migration is safe");
            } else {
                print_warning("Forecast exceeds a threshold; migration would be refused");
            }

            let table = tabled::Table::new([VerdictRow {
                safe: if verdict.safe { "yes" } else { "no" }.to_string(),
                avg_cpu: format_percent(Some(verdict.avg_cpu)),
                avg_mem: format_percent(Some(verdict.avg_mem)),
            }])
            .with(tabled::settings::Style::rounded())
            .to_string();
            println!("{}", table);
        }
    }

    Ok(())
}
