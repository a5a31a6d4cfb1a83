//! Error types shared across the service

use std::time::Duration;
use thiserror::Error;

/// Errors raised by a [`ModelRepository`](crate::model::ModelRepository)
#[derive(Error, Debug)]
pub enum StoreError {
    /// No model exists for the repository (only from `find_latest`)
    #[error("model not exist")]
    NotFound,

    #[error("database error: {0}")]
    Backend(#[from] rusqlite::Error),

    #[error("model document error: {0}")]
    Document(#[from] serde_json::Error),

    #[error("store task failed: {0}")]
    Task(String),
}

/// Errors raised while validating or minting bearer credentials
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("missing bearer authentication token")]
    MissingToken,

    #[error("invalid token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),

    #[error("unknown token issuer: {0}")]
    UnknownIssuer(String),

    #[error("invalid token issuer {0}: only the accounts service can authenticate users")]
    UserIssuer(String),

    #[error("token signing failed: {0}")]
    Signing(#[source] jsonwebtoken::errors::Error),

    #[error("no access info")]
    MissingAccessInfo,
}

/// Errors raised while invoking the ML worker
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("failed to run model CMD: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("model CMD error - {status}: {stderr}")]
    Exited { status: String, stderr: String },

    #[error("malformed model CMD output: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("failed to encode model CMD arguments: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("model CMD timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to prepare model directory: {0}")]
    Io(#[source] std::io::Error),

    #[error("failed to mint worker credentials: {0}")]
    Auth(#[from] AuthError),
}

/// Failure of a prediction request, as surfaced to the HTTP adapter
#[derive(Error, Debug)]
pub enum PredictError {
    #[error("{0}")]
    Storage(#[from] StoreError),

    #[error("{0}")]
    Worker(WorkerError),

    #[error("{0}")]
    Decode(WorkerError),

    #[error("{0}")]
    Auth(WorkerError),

    #[error("{0}")]
    Cancelled(WorkerError),
}

impl From<WorkerError> for PredictError {
    fn from(err: WorkerError) -> Self {
        match err {
            WorkerError::Decode(_) => PredictError::Decode(err),
            WorkerError::Auth(_) => PredictError::Auth(err),
            WorkerError::Timeout(_) => PredictError::Cancelled(err),
            _ => PredictError::Worker(err),
        }
    }
}

impl PredictError {
    /// Stable label for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            PredictError::Storage(_) => "storage",
            PredictError::Worker(_) => "worker",
            PredictError::Decode(_) => "decode",
            PredictError::Auth(_) => "auth",
            PredictError::Cancelled(_) => "cancelled",
        }
    }
}
