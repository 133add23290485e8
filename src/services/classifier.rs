use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::models::moderation::PredictResponse;
use crate::services::features::{FeatureVector, FEATURE_COUNT};

/// Scores a feature vector. Implementations are loaded once and shared
/// between request handlers and the worker, so `score` must not mutate.
pub trait Classifier: Send + Sync {
    fn score(&self, features: &FeatureVector) -> Result<PredictResponse, ClassifierError>;
}

/// Logistic regression over the four listing features.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogisticModel {
    pub weights: [f64; FEATURE_COUNT],
    pub intercept: f64,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
}

fn default_threshold() -> f64 {
    0.5
}

impl Default for LogisticModel {
    /// Baseline coefficients: unverified sellers with few photos are flagged.
    fn default() -> Self {
        Self {
            weights: [-6.2, -9.4, 0.35, 0.05],
            intercept: 2.8,
            threshold: default_threshold(),
        }
    }
}

impl LogisticModel {
    fn validate(&self) -> Result<(), ClassifierError> {
        if !self.weights.iter().all(|w| w.is_finite()) || !self.intercept.is_finite() {
            return Err(ClassifierError::InvalidModel(
                "coefficients must be finite".to_string(),
            ));
        }
        if !(self.threshold > 0.0 && self.threshold < 1.0) {
            return Err(ClassifierError::InvalidModel(format!(
                "threshold {} outside (0, 1)",
                self.threshold
            )));
        }
        Ok(())
    }

    /// Positive-class probability for a feature vector.
    pub fn probability(&self, features: &FeatureVector) -> f64 {
        let z = self
            .weights
            .iter()
            .zip(features.as_slice())
            .fold(self.intercept, |acc, (w, x)| acc + w * x);
        1.0 / (1.0 + (-z).exp())
    }
}

impl Classifier for LogisticModel {
    fn score(&self, features: &FeatureVector) -> Result<PredictResponse, ClassifierError> {
        let probability = self.probability(features);
        if !probability.is_finite() {
            return Err(ClassifierError::Scoring(format!(
                "non-finite probability for features {:?}",
                features.0
            )));
        }
        let probability = probability.clamp(0.0, 1.0);

        Ok(PredictResponse {
            is_violation: probability >= self.threshold,
            probability,
        })
    }
}

/// Load the model from `path`, writing the baseline model there first if the
/// file does not exist yet.
pub fn load_or_init(path: impl AsRef<Path>) -> Result<LogisticModel, ClassifierError> {
    let path = path.as_ref();

    if path.exists() {
        let raw = std::fs::read_to_string(path)?;
        let model: LogisticModel = serde_json::from_str(&raw)?;
        model.validate()?;
        tracing::info!(path = %path.display(), "Loaded moderation model");
        return Ok(model);
    }

    let model = LogisticModel::default();
    let raw = serde_json::to_string_pretty(&model)?;
    std::fs::write(path, raw)?;
    tracing::warn!(path = %path.display(), "Model file missing, persisted baseline model");
    Ok(model)
}

#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("Model file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Model format error: {0}")]
    Format(#[from] serde_json::Error),

    #[error("Invalid model: {0}")]
    InvalidModel(String),

    #[error("Scoring failed: {0}")]
    Scoring(String),
}
