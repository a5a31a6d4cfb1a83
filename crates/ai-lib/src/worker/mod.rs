//! ML worker invocation
//!
//! The worker is an external program that trains a model for a repository
//! or scores new commits with an existing one. It reports back a single
//! JSON object on stdout.

mod process;
mod result;

pub use process::{ProcessWorker, WorkerConfig};
pub use result::{Stage, StageFailure, WorkerResult};

use crate::error::WorkerError;
use crate::metrics::ChangeMeasures;
use async_trait::async_trait;
use std::fmt;
use std::path::Path;

/// Worker subcommand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerMode {
    Build,
    Predict,
}

impl WorkerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerMode::Build => "build",
            WorkerMode::Predict => "predict",
        }
    }
}

impl fmt::Display for WorkerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Train a new model and score the current job with it
#[derive(Debug, Clone, Copy)]
pub struct BuildRequest<'a> {
    pub repo_id: &'a str,
    /// Where the worker writes the artifact
    pub model_path: &'a Path,
    pub last_job_id: &'a str,
}

/// Score a job range with an existing model
#[derive(Debug, Clone, Copy)]
pub struct PredictRequest<'a> {
    pub repo_id: &'a str,
    pub model_path: &'a Path,
    pub medians: &'a ChangeMeasures,
    pub medians_score: f32,
    pub start_job_id: &'a str,
    pub last_job_id: &'a str,
}

/// Runs the ML worker
///
/// An in-band `WorkerResult::error` is not an invocation failure; it is
/// returned in the result for the status classifier.
#[async_trait]
pub trait ModelWorker: Send + Sync {
    async fn build(&self, request: BuildRequest<'_>) -> Result<WorkerResult, WorkerError>;

    async fn predict(&self, request: PredictRequest<'_>) -> Result<WorkerResult, WorkerError>;
}
