//! Prediction status codes and the worker result classifier

use crate::worker::{Stage, WorkerResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Minimum number of labelled training samples for a usable model
pub const MIN_TRAINING_SAMPLES: u64 = 50;

/// Minimum number of samples required in each class
pub const MIN_CLASS_SAMPLES: u64 = 10;

/// Accepted range for the buggy-class ratio of the training data
pub const CLASS_BALANCE_RANGE: (f32, f32) = (0.10, 0.90);

/// Minimum weighted F1 score for a model to be trusted
pub const MIN_WEIGHTED_F1: f32 = 0.5;

/// Outcome code carried by every successful prediction response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionStatus {
    PredictUnknownState,
    PredictLastModel,
    PredictOk,
    PredictLowTrainingData,
    PredictClassUnbalanced,
    PredictLowModelQuality,
    PredictFailDataPreparing,
    PredictFailTraining,
    PredictFailPredicting,
}

impl PredictionStatus {
    pub const ALL: [PredictionStatus; 9] = [
        PredictionStatus::PredictUnknownState,
        PredictionStatus::PredictLastModel,
        PredictionStatus::PredictOk,
        PredictionStatus::PredictLowTrainingData,
        PredictionStatus::PredictClassUnbalanced,
        PredictionStatus::PredictLowModelQuality,
        PredictionStatus::PredictFailDataPreparing,
        PredictionStatus::PredictFailTraining,
        PredictionStatus::PredictFailPredicting,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PredictionStatus::PredictUnknownState => "predict_unknown_state",
            PredictionStatus::PredictLastModel => "predict_last_model",
            PredictionStatus::PredictOk => "predict_ok",
            PredictionStatus::PredictLowTrainingData => "predict_low_training_data",
            PredictionStatus::PredictClassUnbalanced => "predict_class_unbalanced",
            PredictionStatus::PredictLowModelQuality => "predict_low_model_quality",
            PredictionStatus::PredictFailDataPreparing => "predict_fail_data_preparing",
            PredictionStatus::PredictFailTraining => "predict_fail_training",
            PredictionStatus::PredictFailPredicting => "predict_fail_predicting",
        }
    }
}

impl fmt::Display for PredictionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Translate a worker result into a prediction status.
///
/// Rules are evaluated in order and the first match wins, so data
/// problems take precedence over an in-band worker error.
pub fn classify(result: &WorkerResult) -> PredictionStatus {
    if !result.is_built && result.is_predicted {
        return PredictionStatus::PredictLastModel;
    }

    let Some(data_points) = result.data_points.as_ref() else {
        return PredictionStatus::PredictFailDataPreparing;
    };

    let train = data_points.train;
    if train.total() < MIN_TRAINING_SAMPLES {
        return PredictionStatus::PredictLowTrainingData;
    }

    let balance = train.buggy_ratio().unwrap_or(0.0);
    let (min_balance, max_balance) = CLASS_BALANCE_RANGE;
    if balance < min_balance
        || balance > max_balance
        || train.num_buggy < MIN_CLASS_SAMPLES
        || train.num_clean < MIN_CLASS_SAMPLES
    {
        return PredictionStatus::PredictClassUnbalanced;
    }

    let Some(report) = result.model_report.as_ref() else {
        return PredictionStatus::PredictFailTraining;
    };

    if report.weighted_avg.f1_score < MIN_WEIGHTED_F1 {
        return PredictionStatus::PredictLowModelQuality;
    }

    if let Some(failure) = result.error.as_ref() {
        return match failure.stage {
            Stage::DataPreparation | Stage::DataSplitting => {
                PredictionStatus::PredictFailDataPreparing
            }
            Stage::ModelBuilding => PredictionStatus::PredictFailTraining,
            Stage::Predicting => PredictionStatus::PredictFailPredicting,
            Stage::QuantileCalculation | Stage::Unknown => PredictionStatus::PredictUnknownState,
        };
    }

    if result.is_built && result.is_predicted {
        return PredictionStatus::PredictOk;
    }

    PredictionStatus::PredictUnknownState
}
