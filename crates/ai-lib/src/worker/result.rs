//! Structured output of the ML worker

use crate::metrics::{DataPoints, ModelMedians, ModelReport, Quantiles};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::value::RawValue;
use std::fmt;

/// Pipeline stage the worker reports a failure in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    DataPreparation,
    DataSplitting,
    ModelBuilding,
    Predicting,
    QuantileCalculation,
    Unknown,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::DataPreparation => "data_preparation",
            Stage::DataSplitting => "data_splitting",
            Stage::ModelBuilding => "model_building",
            Stage::Predicting => "predicting",
            Stage::QuantileCalculation => "quantile_calculation",
            Stage::Unknown => "unknown",
        }
    }

    /// Parse a stage name; the worker spells stages with spaces
    pub fn parse(name: &str) -> Self {
        match name.trim().replace(' ', "_").to_ascii_lowercase().as_str() {
            "data_preparation" => Stage::DataPreparation,
            "data_splitting" => Stage::DataSplitting,
            "model_building" => Stage::ModelBuilding,
            "predicting" => Stage::Predicting,
            "quantile_calculation" => Stage::QuantileCalculation,
            _ => Stage::Unknown,
        }
    }
}

impl<'de> Deserialize<'de> for Stage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Stage::parse(&name))
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure the worker reports in-band (the process itself exited 0)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFailure {
    pub stage: Stage,
    #[serde(default)]
    pub message: String,
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AI service failed in {} stage: {}", self.stage, self.message)
    }
}

/// Decoded stdout of a successful worker run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerResult {
    #[serde(default)]
    pub is_built: bool,
    #[serde(default)]
    pub is_predicted: bool,
    /// Worker-side status hint; the classifier decides the final status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Box<RawValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StageFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_points: Option<DataPoints>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_report: Option<ModelReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medians: Option<ModelMedians>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantiles: Option<Quantiles>,
    /// Per-commit predictions, forwarded verbatim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prediction: Option<Box<RawValue>>,
}
