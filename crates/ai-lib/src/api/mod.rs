//! HTTP adapter for the prediction service
//!
//! Routes:
//! - `GET /ai/repositories/:repo_id/jobs/:job/prediction` (service tokens)
//! - `GET /ai/repositories/:repo_id/models` (site admins, NDJSON)
//! - `GET /healthz`, `GET /readyz`, `GET /metrics` (unauthenticated)

mod handlers;
mod middleware;

pub use handlers::{ModelView, PredictionQuery};
pub use middleware::{authenticate, only_admin, only_service};

use crate::auth::AuthCheck;
use crate::error::{PredictError, StoreError};
use crate::health::{ComponentStatus, HealthRegistry};
use crate::model::ModelRepository;
use crate::observability::ServiceMetrics;
use crate::orchestrator::PredictionService;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub predictions: Arc<PredictionService>,
    pub models: Arc<dyn ModelRepository>,
    pub auth: AuthCheck,
    pub health_registry: HealthRegistry,
    pub metrics: ServiceMetrics,
}

impl AppState {
    pub fn new(
        predictions: Arc<PredictionService>,
        auth: AuthCheck,
        health_registry: HealthRegistry,
        metrics: ServiceMetrics,
    ) -> Self {
        Self {
            models: Arc::clone(predictions.models()),
            predictions,
            auth,
            health_registry,
            metrics,
        }
    }
}

/// Body of a 500 response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub message: String,
}

fn internal_error(message: String) -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorMessage { message })).into_response()
}

impl IntoResponse for PredictError {
    fn into_response(self) -> Response {
        error!(kind = self.kind(), error = %self, "Prediction failed");
        internal_error(self.to_string())
    }
}

impl IntoResponse for StoreError {
    fn into_response(self) -> Response {
        error!(error = %self, "Model store request failed");
        internal_error(self.to_string())
    }
}

/// Health check response - returns 200 if operational, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    match state.metrics.render() {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            text,
        )
            .into_response(),
        Err(e) => internal_error(e.to_string()),
    }
}

/// Routes under `/ai`, behind bearer authentication
fn ai_routes(state: &Arc<AppState>) -> Router<Arc<AppState>> {
    let prediction = Router::new()
        .route(
            "/repositories/:repo_id/jobs/:job/prediction",
            get(handlers::prediction),
        )
        .route_layer(axum::middleware::from_fn(only_service));

    let models = Router::new()
        .route("/repositories/:repo_id/models", get(handlers::models))
        .route_layer(axum::middleware::from_fn(only_admin));

    prediction
        .merge(models)
        .route_layer(axum::middleware::from_fn_with_state(
            Arc::clone(state),
            authenticate,
        ))
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .nest("/ai", ai_routes(&state))
        .with_state(state)
}
