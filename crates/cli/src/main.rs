//! AI service CLI
//!
//! Operator tool for requesting predictions and inspecting the models
//! built for a repository.

mod client;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{models, prediction};

/// AI service CLI
#[derive(Parser)]
#[command(name = "aictl")]
#[command(author, version, about = "CLI for the AI prediction service", long_about = None)]
pub struct Cli {
    /// API endpoint URL (can also be set via AI_API_URL env var)
    #[arg(long, env = "AI_API_URL", default_value = "http://localhost:3004")]
    pub api_url: String,

    /// Bearer token sent with every request
    #[arg(long, env = "AI_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Request a prediction for a job (service token required)
    Predict {
        /// Repository ID
        repo_id: String,

        /// Job to predict
        job: String,

        /// Oldest job of the range (defaults to the predicted job)
        #[arg(long)]
        oldest_job: Option<String>,
    },

    /// List the models built for a repository (admin token required)
    Models {
        /// Repository ID
        repo_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let client = client::ApiClient::new(&cli.api_url, cli.token)?;

    match cli.command {
        Commands::Predict {
            repo_id,
            job,
            oldest_job,
        } => {
            prediction::predict(&client, &repo_id, &job, oldest_job.as_deref(), cli.format).await?;
        }
        Commands::Models { repo_id } => {
            models::list_models(&client, &repo_id, cli.format).await?;
        }
    }

    Ok(())
}
