//! `aictl models`

use anyhow::Result;
use tabled::Tabled;

use crate::client::{ApiClient, ModelSummary};
use crate::output::{color_status, format_score, format_time, print_json, print_table, print_warning, OutputFormat};

/// Row for models table
#[derive(Tabled)]
struct ModelRow {
    #[tabled(rename = "Version")]
    version: u32,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "F1")]
    f1: String,
    #[tabled(rename = "Train (buggy/clean)")]
    train: String,
    #[tabled(rename = "Test (buggy/clean)")]
    test: String,
    #[tabled(rename = "Expired")]
    expired: String,
    #[tabled(rename = "Created")]
    created_at: String,
    #[tabled(rename = "Last Use")]
    last_use: String,
}

impl From<&ModelSummary> for ModelRow {
    fn from(model: &ModelSummary) -> Self {
        let (train, test) = match &model.data {
            Some(data) => (
                format!("{}/{}", data.train.buggy, data.train.clean),
                format!("{}/{}", data.test.buggy, data.test.clean),
            ),
            None => ("-".to_string(), "-".to_string()),
        };

        Self {
            version: model.version,
            status: color_status(&model.status),
            f1: model.f1_score().map(format_score).unwrap_or_else(|| "-".to_string()),
            train,
            test,
            expired: if model.expired { "yes" } else { "no" }.to_string(),
            created_at: format_time(&model.created_at),
            last_use: format_time(&model.last_use),
        }
    }
}

/// List the models of a repository
pub async fn list_models(client: &ApiClient, repo_id: &str, format: OutputFormat) -> Result<()> {
    let models = client.models(repo_id).await?;

    match format {
        OutputFormat::Json => print_json(&models)?,
        OutputFormat::Table => {
            if models.is_empty() {
                print_warning(&format!("No models found for repository {}", repo_id));
                return Ok(());
            }

            let rows: Vec<ModelRow> = models.iter().map(ModelRow::from).collect();
            print_table(rows);
            println!("\nTotal: {} models", models.len());
        }
    }

    Ok(())
}
