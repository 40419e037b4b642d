//! Service health

use anyhow::Result;
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{color_status, format_timestamp, OutputFormat};

#[derive(Tabled)]
struct ComponentRow {
    #[tabled(rename = "Component")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Message")]
    message: String,
    #[tabled(rename = "Last Check")]
    last_check: String,
}

pub async fn show_health(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let health = client.health().await?;

    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&health)?;
            println!("{}", json);
        }
        OutputFormat::Table => {
            println!("Executor: {}\n", color_status(&health.status));

            let rows: Vec<ComponentRow> = health
                .components
                .iter()
                .map(|(name, component)| ComponentRow {
                    name: name.clone(),
                    status: color_status(&component.status),
                    message: component.message.clone().unwrap_or_default(),
                    last_check: format_timestamp(component.last_check_timestamp),
                })
                .collect();

            let table = tabled::Table::new(rows)
                .with(tabled::settings::Style::rounded())
                .to_string();
            println!("{}", table);
        }
    }

    Ok(())
}
