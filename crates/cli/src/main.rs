//! GreenOps CLI
//!
//! A command-line tool for running safe instance migrations through the
//! executor service and inspecting its state.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use commands::{active, evaluate, health, migrate};

const DEFAULT_API_URL: &str = "http://localhost:8080";

/// GreenOps CLI
#[derive(Parser)]
#[command(name = "greenops")]
#[command(author, version, about = "CLI for the GreenOps safe migration executor", long_about = None)]
pub struct Cli {
    /// API endpoint URL (can also be set via GREENOPS_API_URL env var)
    #[arg(long, env = "GREENOPS_API_URL")]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short)]
    pub format: Option<output::OutputFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Migrate an instance to a new machine type if its forecast allows it
    Migrate {
        /// Instance to migrate
        instance_id: String,

        /// Machine type to move to
        #[arg(long)]
        target_type: String,

        /// Machine type the instance is expected to have
        #[arg(long)]
        current_type: Option<String>,

        /// Region used for snapshot storage
        #[arg(long)]
        region: Option<String>,

        /// Zone for the replacement instance (snapshot strategy only)
        #[arg(long)]
        target_zone: Option<String>,

        /// Migration strategy (defaults to the executor's configuration)
        #[arg(long, value_enum)]
        strategy: Option<migrate::StrategyArg>,
    },

    /// Evaluate a 7-day utilization forecast without migrating
    Evaluate {
        /// Daily CPU forecast percentages, comma separated
        #[arg(long, value_delimiter = ',', required = true)]
        cpu: Vec<f64>,

        /// Daily memory forecast percentages, comma separated
        #[arg(long, value_delimiter = ',', required = true)]
        memory: Vec<f64>,
    },

    /// List instances with a migration in flight
    Active,

    /// Show executor health
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::Config::load()?;

    let api_url = cli
        .api_url
        .or(config.api_url)
        .unwrap_or_else(|| DEFAULT_API_URL.to_string());
    let format = cli
        .format
        .or_else(|| {
            config
                .default_format
                .as_deref()
                .and_then(|f| output::OutputFormat::from_str(f, true).ok())
        })
        .unwrap_or_default();

    // Initialize client
    let client = client::ApiClient::new(&api_url)?;

    // Execute command
    match cli.command {
        Commands::Migrate {
            instance_id,
            target_type,
            current_type,
            region,
            target_zone,
            strategy,
        } => {
            let strategy = strategy
                .map(|s| s.as_api_str().to_string())
                .or(config.default_strategy);
            let request = client::MigrationRequest {
                instance_id,
                target_type,
                current_type,
                region,
                target_zone,
                strategy,
            };
            let status = migrate::migrate(&client, request, format).await?;
            let code = migrate::exit_code(&status);
            if code != 0 {
                std::process::exit(code);
            }
        }
        Commands::Evaluate { cpu, memory } => {
            evaluate::evaluate(&client, cpu, memory, format).await?;
        }
        Commands::Active => {
            active::list_active(&client, format).await?;
        }
        Commands::Health => {
            health::show_health(&client, format).await?;
        }
    }

    Ok(())
}
