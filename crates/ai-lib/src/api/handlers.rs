//! Request handlers for the `/ai` routes

use super::AppState;
use crate::error::{PredictError, StoreError};
use crate::metrics::{DataPoints, ModelMedians, ModelReport, Quantiles};
use crate::model::{Model, ModelId, DEFAULT_LIST_LIMIT};
use crate::orchestrator::PredictionResponse;
use crate::status::PredictionStatus;
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

const NDJSON: &str = "application/x-ndjson";

#[derive(Debug, Default, Deserialize)]
pub struct PredictionQuery {
    #[serde(default)]
    pub oldest_job: Option<String>,
}

/// Public form of a stored model; the artifact path is never exposed
#[derive(Debug, Serialize)]
pub struct ModelView<'a> {
    pub id: ModelId,
    pub repo_id: &'a str,
    pub version: u32,
    pub status: PredictionStatus,
    pub report: Option<&'a ModelReport>,
    #[serde(rename = "data")]
    pub data_points: Option<&'a DataPoints>,
    pub expired: bool,
    pub medians: Option<&'a ModelMedians>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantiles: Option<&'a Quantiles>,
    pub created_at: DateTime<Utc>,
    pub last_use: DateTime<Utc>,
}

impl<'a> From<&'a Model> for ModelView<'a> {
    fn from(model: &'a Model) -> Self {
        Self {
            id: model.id,
            repo_id: &model.repo_id,
            version: model.version,
            status: model.status,
            report: model.report.as_ref(),
            data_points: model.data_points.as_ref(),
            expired: model.expired,
            medians: model.medians.as_ref(),
            quantiles: model.quantiles.as_ref(),
            created_at: model.created_at,
            last_use: model.last_use,
        }
    }
}

fn ndjson_line(model: &Model) -> Result<Vec<u8>, StoreError> {
    let mut line = serde_json::to_vec(&ModelView::from(model))?;
    line.push(b'\n');
    Ok(line)
}

/// `GET /ai/repositories/:repo_id/jobs/:job/prediction?oldest_job=`
pub async fn prediction(
    State(state): State<Arc<AppState>>,
    Path((repo_id, job)): Path<(String, String)>,
    Query(query): Query<PredictionQuery>,
) -> Result<Json<PredictionResponse>, PredictError> {
    let oldest_job = query
        .oldest_job
        .filter(|job| !job.is_empty())
        .unwrap_or_else(|| job.clone());

    info!(repo_id = %repo_id, job = %job, oldest_job = %oldest_job, "Received prediction request");

    let response = state.predictions.predict(&repo_id, &oldest_job, &job).await?;
    Ok(Json(response))
}

/// `GET /ai/repositories/:repo_id/models`, newest first as NDJSON
pub async fn models(
    State(state): State<Arc<AppState>>,
    Path(repo_id): Path<String>,
) -> Result<Response, StoreError> {
    let models = state
        .models
        .find_by_repo(&repo_id, DEFAULT_LIST_LIMIT)
        .await?;

    let lines = models.map(|item| item.and_then(|model| ndjson_line(&model)));

    Ok(([(header::CONTENT_TYPE, NDJSON)], Body::from_stream(lines)).into_response())
}
