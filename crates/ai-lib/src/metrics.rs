//! Change measures, quality reports and data-point counts
//!
//! These are immutable value types produced by the ML worker and embedded
//! verbatim in stored model records. Field names on the wire follow the
//! worker's JSON output.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use std::collections::HashMap;

/// Per-commit change measures used as model features
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChangeMeasures {
    /// Number of modified subsystems
    pub ns: f64,
    /// Number of modified directories
    pub nd: f64,
    /// Number of modified files
    pub nf: f64,
    /// Distribution of modified code across files
    pub entropy: f64,
    /// Lines added
    pub la: f64,
    /// Lines deleted
    pub ld: f64,
    /// Hunks added
    pub ha: f64,
    /// Hunks deleted
    pub hd: f64,
    /// Lines in the modified files before the change
    pub lt: f64,
    /// Developers that previously changed the modified files
    pub ndev: f64,
    /// Average interval since the last change of the modified files
    pub age: f64,
    /// Unique last changes touching the modified files
    pub nuc: f64,
    /// Developer experience
    pub exp: f64,
    /// Recent developer experience
    pub rexp: f64,
    /// Subsystem experience
    pub sexp: f64,
}

/// Per-file change measures
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileMeasures {
    pub la: f64,
    pub ld: f64,
    pub ha: f64,
    pub hd: f64,
    pub lt: f64,
    pub ndev: f64,
    pub age: f64,
    pub nuc: f64,
    /// Number of fixing changes
    pub nfc: f64,
    pub exp: f64,
    pub rexp: f64,
}

/// Quantile tables as forwarded from the worker
///
/// Kept as the worker's raw JSON so responses carry the exact bytes that
/// were stored at build time. Use [`Quantiles::tables`] to inspect them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Quantiles(Box<RawValue>);

impl Quantiles {
    /// Parse a JSON document into an opaque quantiles value
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        Ok(Self(RawValue::from_string(json.to_string())?))
    }

    pub fn as_str(&self) -> &str {
        self.0.get()
    }

    /// Decode the typed quantile tables
    pub fn tables(&self) -> Result<QuantileTables, serde_json::Error> {
        serde_json::from_str(self.0.get())
    }
}

impl PartialEq for Quantiles {
    fn eq(&self, other: &Self) -> bool {
        self.0.get() == other.0.get()
    }
}

/// Typed view of [`Quantiles`], keyed by quantile label (e.g. "0.25")
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuantileTables {
    #[serde(default)]
    pub commit: HashMap<String, Option<ChangeMeasures>>,
    #[serde(default)]
    pub developer: HashMap<String, Option<ChangeMeasures>>,
    #[serde(default)]
    pub file: HashMap<String, Option<FileMeasures>>,
}

/// Change-measure medians over the training data
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelMedians {
    pub all: ChangeMeasures,
    pub buggy: ChangeMeasures,
    pub clean: ChangeMeasures,
}

/// Class counts for one data split
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagsStat {
    #[serde(rename = "True", default)]
    pub num_buggy: u64,
    #[serde(rename = "False", default)]
    pub num_clean: u64,
}

impl TagsStat {
    pub fn total(&self) -> u64 {
        self.num_buggy + self.num_clean
    }

    /// Fraction of buggy samples, or `None` for an empty split
    pub fn buggy_ratio(&self) -> Option<f32> {
        let total = self.total();
        if total == 0 {
            return None;
        }
        Some(self.num_buggy as f32 / total as f32)
    }
}

/// Data points used in each phase of a build
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataPoints {
    pub all: u64,
    pub train: TagsStat,
    pub test: TagsStat,
    pub predict: u64,
}

/// Hyper-parameters of the trained estimator
///
/// Unset fields are omitted on the wire so the worker keeps its own defaults.
/// A null value from the worker reads back as `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HyperParameters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n_estimators: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_features: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_depth: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bootstrap: Option<bool>,
}

/// Precision/recall/F1 for one class or average
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationMetrics {
    #[serde(rename = "f1-score")]
    pub f1_score: f32,
    pub precision: f32,
    pub recall: f32,
    pub support: u64,
}

/// Quality report of a trained model
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelReport {
    pub format: String,
    pub params: HyperParameters,
    pub feature_importance: HashMap<String, f32>,
    pub accuracy: f32,
    #[serde(rename = "medians_score")]
    pub median_score: f32,
    pub buggy: ClassificationMetrics,
    pub clean: ClassificationMetrics,
    pub weighted_avg: ClassificationMetrics,
    pub macro_avg: ClassificationMetrics,
}
