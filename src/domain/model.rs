//! The trained model bundle and the parameters published to clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::crypto::compute_fingerprint;
use super::features::{self, FeatureError, NormalizationStats, PolynomialExpansion};

/// Statistics recorded at the end of a training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub rows: usize,
    pub clients: usize,
    pub rounds: usize,
    pub train_accuracy: f64,
    /// Matthews correlation coefficient on the training set.
    pub train_mcc: f64,
    pub dp_enabled: bool,
}

/// Everything needed to reproduce the server-side computation.
///
/// Immutable once written; a retrain replaces it wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelBundle {
    pub version: u32,
    pub feature_names: Vec<String>,
    pub normalization: NormalizationStats,
    pub expansion: Option<PolynomialExpansion>,
    pub weights: Vec<f64>,
    pub intercept: f64,
    pub trained_at: DateTime<Utc>,
    pub summary: TrainingSummary,
}

impl ModelBundle {
    pub const VERSION: u32 = 1;

    /// Width of a raw (pre-normalization) input row.
    #[must_use]
    pub fn input_width(&self) -> usize {
        self.normalization.width()
    }

    /// Width of a transformed row, i.e. the number of weights.
    #[must_use]
    pub fn model_width(&self) -> usize {
        match &self.expansion {
            Some(poly) => poly.output_width(self.input_width()),
            None => self.input_width(),
        }
    }

    /// Check that every part of the bundle agrees on dimensionality.
    ///
    /// # Errors
    /// Returns a description of the first inconsistency found.
    pub fn validate(&self) -> Result<(), String> {
        if self.version != Self::VERSION {
            return Err(format!("unsupported bundle version {}", self.version));
        }
        if self.normalization.mean.len() != self.normalization.std.len() {
            return Err("normalization mean/std length differ".to_string());
        }
        if self.input_width() == 0 {
            return Err("bundle has no input features".to_string());
        }
        if !self.feature_names.is_empty() && self.feature_names.len() != self.input_width() {
            return Err(format!(
                "{} feature names for {} inputs",
                self.feature_names.len(),
                self.input_width()
            ));
        }
        if self.weights.len() != self.model_width() {
            return Err(format!(
                "{} weights for {} transformed features",
                self.weights.len(),
                self.model_width()
            ));
        }
        if self.normalization.std.iter().any(|s| !s.is_finite() || *s == 0.0) {
            return Err("normalization std must be finite and non-zero".to_string());
        }
        if !self.intercept.is_finite() || self.weights.iter().any(|w| !w.is_finite()) {
            return Err("non-finite model coefficient".to_string());
        }
        Ok(())
    }

    /// Apply the bundle's feature transform to a raw row.
    ///
    /// # Errors
    /// Returns `FeatureError::DimensionMismatch` on a wrong-width row.
    pub fn transform(&self, row: &[f64]) -> Result<Vec<f64>, FeatureError> {
        features::transform(row, &self.normalization, self.expansion.as_ref())
    }

    /// Plaintext linear score of an already transformed row.
    ///
    /// # Errors
    /// Returns `FeatureError::DimensionMismatch` on a wrong-width row.
    pub fn score_transformed(&self, transformed: &[f64]) -> Result<f64, FeatureError> {
        if transformed.len() != self.weights.len() {
            return Err(FeatureError::DimensionMismatch {
                expected: self.weights.len(),
                found: transformed.len(),
            });
        }
        Ok(self
            .weights
            .iter()
            .zip(transformed)
            .map(|(w, x)| w * x)
            .sum::<f64>()
            + self.intercept)
    }

    /// Identifies the exact preprocessing and coefficients of this bundle.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut buf = Vec::new();
        for v in self.normalization.mean.iter().chain(&self.normalization.std) {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        if let Some(poly) = &self.expansion {
            buf.extend_from_slice(&(poly.degree as u64).to_le_bytes());
            buf.push(u8::from(poly.interaction_only));
            buf.push(u8::from(poly.include_bias));
        }
        for v in self.weights.iter().chain(std::iter::once(&self.intercept)) {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        compute_fingerprint(&buf)
    }

    /// What `GET /params` hands to clients.
    #[must_use]
    pub fn published(&self, include_weights: bool) -> PublishedParams {
        PublishedParams {
            feature_names: self.feature_names.clone(),
            normalization: self.normalization.clone(),
            expansion: self.expansion,
            input_width: self.input_width(),
            model_width: self.model_width(),
            model_fingerprint: self.fingerprint(),
            weights: include_weights.then(|| self.weights.clone()),
            intercept: include_weights.then_some(self.intercept),
        }
    }
}

/// Preprocessing parameters published to clients.
///
/// Weights and intercept are only present when the server is configured to
/// publish them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedParams {
    pub feature_names: Vec<String>,
    pub normalization: NormalizationStats,
    pub expansion: Option<PolynomialExpansion>,
    pub input_width: usize,
    pub model_width: usize,
    pub model_fingerprint: String,
    pub weights: Option<Vec<f64>>,
    pub intercept: Option<f64>,
}

impl PublishedParams {
    /// # Errors
    /// Returns `FeatureError::DimensionMismatch` on a wrong-width row.
    pub fn transform(&self, row: &[f64]) -> Result<Vec<f64>, FeatureError> {
        let out = features::transform(row, &self.normalization, self.expansion.as_ref())?;
        if out.len() != self.model_width {
            return Err(FeatureError::DimensionMismatch {
                expected: self.model_width,
                found: out.len(),
            });
        }
        Ok(out)
    }
}
