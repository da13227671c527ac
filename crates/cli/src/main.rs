//! Conduit Expose CLI
//!
//! Queries a running conduit-expose agent and renders its latest snapshot.

mod client;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{containers, countries, status};

/// Conduit Expose CLI
#[derive(Parser)]
#[command(name = "expose")]
#[command(author, version, about = "CLI for Conduit Expose", long_about = None)]
pub struct Cli {
    /// Agent URL (can also be set via EXPOSE_URL env var)
    #[arg(long, env = "EXPOSE_URL", default_value = "http://localhost:8081")]
    pub url: String,

    /// Shared secret sent in the X-Conduit-Auth header
    #[arg(long, env = "EXPOSE_AUTH", hide_env_values = true)]
    pub auth: Option<String>,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the host summary: clients, system, session and settings
    Status,

    /// List Conduit containers
    Containers {
        /// Filter by status (running, down, unhealthy)
        #[arg(long)]
        status: Option<String>,
    },

    /// Show clients and traffic by country
    Countries {
        /// Maximum rows per table
        #[arg(long, short, default_value_t = 10)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let client = client::ApiClient::new(&cli.url, cli.auth)?;

    match cli.command {
        Commands::Status => status::show_status(&client, cli.format).await?,
        Commands::Containers { status } => {
            containers::list_containers(&client, status, cli.format).await?
        }
        Commands::Countries { limit } => {
            countries::show_countries(&client, limit, cli.format).await?
        }
    }

    Ok(())
}
