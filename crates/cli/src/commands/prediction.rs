//! `aictl predict`

use anyhow::Result;
use serde_json::Value;
use tabled::Tabled;

use crate::client::{ApiClient, Prediction};
use crate::output::{
    color_confidence, color_status, print_info, print_json, print_table, print_warning,
    OutputFormat,
};

/// Row for the per-commit predictions table
#[derive(Tabled)]
struct PredictionRow {
    #[tabled(rename = "Commit")]
    commit: String,
    #[tabled(rename = "Prediction")]
    prediction: String,
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Records carry their commit in `commit_id`; anything else is keyed by index
fn record_row(index: usize, record: &Value) -> PredictionRow {
    let Value::Object(fields) = record else {
        return PredictionRow {
            commit: index.to_string(),
            prediction: render(record),
        };
    };

    match fields.get("commit_id").and_then(Value::as_str) {
        Some(commit) => {
            let mut rest = fields.clone();
            rest.remove("commit_id");
            PredictionRow {
                commit: commit.to_string(),
                prediction: Value::Object(rest).to_string(),
            }
        }
        None => PredictionRow {
            commit: index.to_string(),
            prediction: render(record),
        },
    }
}

/// Flatten the opaque predictions payload into table rows
fn prediction_rows(predictions: &Value) -> Vec<PredictionRow> {
    match predictions {
        Value::Object(map) => map
            .iter()
            .map(|(commit, prediction)| PredictionRow {
                commit: commit.clone(),
                prediction: render(prediction),
            })
            .collect(),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, prediction)| record_row(i, prediction))
            .collect(),
        Value::Null => Vec::new(),
        other => vec![PredictionRow {
            commit: "-".to_string(),
            prediction: render(other),
        }],
    }
}

/// Request a prediction for `job` and print it
pub async fn predict(
    client: &ApiClient,
    repo_id: &str,
    job: &str,
    oldest_job: Option<&str>,
    format: OutputFormat,
) -> Result<()> {
    let prediction: Prediction = client.prediction(repo_id, job, oldest_job).await?;

    match format {
        OutputFormat::Json => print_json(&prediction)?,
        OutputFormat::Table => {
            println!("Status:     {}", color_status(&prediction.status));
            println!("Confidence: {}", color_confidence(prediction.confidence));
            if prediction.quantiles.is_some() {
                print_info("Quantiles available (use --format json to view)");
            }

            let rows = prediction
                .predictions
                .as_ref()
                .map(prediction_rows)
                .unwrap_or_default();
            if rows.is_empty() {
                print_warning("No predictions returned");
                return Ok(());
            }

            let total = rows.len();
            print_table(rows);
            println!("\nTotal: {} predictions", total);
        }
    }

    Ok(())
}
