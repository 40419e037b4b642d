//! In-flight migration listing

use anyhow::Result;
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{print_warning, OutputFormat};

#[derive(Tabled)]
struct ActiveRow {
    #[tabled(rename = "Instance")]
    instance: String,
}

pub async fn list_active(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let active = client.active().await?;

    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&active)?;
            println!("{}", json);
        }
        OutputFormat::Table => {
            if active.instances.is_empty() {
                print_warning("No migrations in flight");
                return Ok(());
            }

            let rows: Vec<ActiveRow> = active
                .instances
                .iter()
                .map(|instance| ActiveRow {
                    instance: instance.clone(),
                })
                .collect();

            let table = tabled::Table::new(rows)
                .with(tabled::settings::Style::rounded())
                .to_string();
            println!("{}", table);
            println!("\nTotal: {} in flight", active.instances.len());
        }
    }

    Ok(())
}
