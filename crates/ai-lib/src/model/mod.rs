//! Trained model records and their persistence
//!
//! This module provides:
//! - The `Model` record bound to one repository
//! - The `ModelRepository` persistence seam
//! - An in-memory store and a SQLite document store

mod memory;
mod sqlite;

pub use memory::InMemoryModelStore;
pub use sqlite::SqliteModelStore;

use crate::artifact::ArtifactProbe;
use crate::error::StoreError;
use crate::metrics::{DataPoints, ModelMedians, ModelReport, Quantiles};
use crate::status::PredictionStatus;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Default bound for repository model listings
pub const DEFAULT_LIST_LIMIT: usize = 50;

/// Opaque identifier assigned to a model on insert
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelId(i64);

impl ModelId {
    /// Placeholder carried by records that were never inserted
    pub const UNASSIGNED: ModelId = ModelId(0);

    pub fn new(raw: i64) -> Self {
        Self(raw)
    }

    pub fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A trained predictor bound to one repository
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub id: ModelId,
    pub repo_id: String,
    pub version: u32,
    pub status: PredictionStatus,
    /// Location of the artifact written by the worker
    pub path: PathBuf,
    #[serde(default)]
    pub report: Option<ModelReport>,
    #[serde(default)]
    pub data_points: Option<DataPoints>,
    #[serde(default)]
    pub medians: Option<ModelMedians>,
    #[serde(default)]
    pub quantiles: Option<Quantiles>,
    #[serde(default)]
    pub expired: bool,
    pub created_at: DateTime<Utc>,
    pub last_use: DateTime<Utc>,
}

/// Build outputs used to create a new model record
#[derive(Debug, Clone, Default)]
pub struct BuildOutputs {
    pub report: Option<ModelReport>,
    pub data_points: Option<DataPoints>,
    pub medians: Option<ModelMedians>,
    pub quantiles: Option<Quantiles>,
}

impl Model {
    /// Create an un-inserted record stamped with `now`
    pub fn new(
        repo_id: impl Into<String>,
        version: u32,
        path: impl Into<PathBuf>,
        status: PredictionStatus,
        outputs: BuildOutputs,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ModelId::UNASSIGNED,
            repo_id: repo_id.into(),
            version,
            status,
            path: path.into(),
            report: outputs.report,
            data_points: outputs.data_points,
            medians: outputs.medians,
            quantiles: outputs.quantiles,
            expired: false,
            created_at: now,
            last_use: now,
        }
    }

    /// Weighted F1 score of the model, or 0 without a report
    pub fn confidence(&self) -> f32 {
        self.report
            .as_ref()
            .map(|r| r.weighted_avg.f1_score)
            .unwrap_or(0.0)
    }

    /// A model is valid when it is not expired and its artifact exists
    pub async fn is_valid(&self, probe: &dyn ArtifactProbe) -> bool {
        !self.expired && probe.exists(&self.path).await
    }
}

/// Version for the next build after `latest`
pub fn next_version(latest: Option<&Model>) -> u32 {
    latest.map(|m| m.version + 1).unwrap_or(1)
}

/// Artifact location for a repository's model version
pub fn artifact_path(models_root: &Path, repo_id: &str, version: u32) -> PathBuf {
    models_root.join(repo_id).join(version.to_string())
}

/// Source of wall-clock time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Bounded, newest-first sequence of models; consumed once
pub type ModelStream = BoxStream<'static, Result<Model, StoreError>>;

/// Persistence of model records
#[async_trait]
pub trait ModelRepository: Send + Sync {
    /// Persist a new model and return its assigned id
    async fn insert(&self, model: &Model) -> Result<ModelId, StoreError>;

    /// Model with the greatest id for the repository.
    ///
    /// Returns `Err(StoreError::NotFound)` when the repository has none.
    async fn find_latest(&self, repo_id: &str) -> Result<Model, StoreError>;

    /// Up to `limit` models of the repository, newest first
    async fn find_by_repo(&self, repo_id: &str, limit: usize) -> Result<ModelStream, StoreError>;

    /// Stamp `last_use` with the current time; succeeds for unknown ids
    async fn log_usage(&self, id: ModelId) -> Result<(), StoreError>;

    /// Operator action marking a model (un)usable for reuse
    async fn set_expired(&self, id: ModelId, expired: bool) -> Result<(), StoreError>;

    /// Check the backend is reachable
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
