//! Model lifecycle and prediction library
//!
//! This crate provides the core functionality for:
//! - Deciding whether to build a new defect-prediction model or reuse one
//! - Running the external ML worker and classifying its output
//! - Persisting model records
//! - The authenticated HTTP surface
//! - Health checks and observability

pub mod api;
pub mod artifact;
pub mod auth;
pub mod error;
pub mod health;
pub mod metrics;
pub mod model;
pub mod observability;
pub mod orchestrator;
pub mod status;
pub mod worker;

pub use error::{AuthError, PredictError, StoreError, WorkerError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use model::{Model, ModelId, ModelRepository};
pub use observability::{ServiceMetrics, StructuredLogger};
pub use orchestrator::{PredictionResponse, PredictionService};
pub use status::PredictionStatus;
