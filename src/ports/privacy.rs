//! Differential Privacy port: Trait for privatizing model updates.
//!
//! Federated clients pass their local update through this port before it is
//! averaged into the global model.

use serde::{Deserialize, Serialize};

/// Errors that can occur during differential privacy operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DpError {
    #[error("Invalid clip threshold: {0}")]
    InvalidClipThreshold(f64),

    #[error("Invalid noise scale: {0}")]
    InvalidNoiseScale(f64),

    #[error("Update contains a non-finite coefficient")]
    NonFiniteUpdate,

    #[error("DP RNG unavailable")]
    RngUnavailable,
}

/// One simulated client's contribution to a round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientUpdate {
    pub weights: Vec<f64>,
    pub intercept: f64,
}

impl ClientUpdate {
    #[must_use]
    pub fn zeros(width: usize) -> Self {
        Self {
            weights: vec![0.0; width],
            intercept: 0.0,
        }
    }

    /// Largest absolute coefficient, intercept included.
    #[must_use]
    pub fn linf_norm(&self) -> f64 {
        self.weights
            .iter()
            .chain(std::iter::once(&self.intercept))
            .fold(0.0f64, |acc, v| acc.max(v.abs()))
    }

    /// Euclidean norm over weights and intercept.
    #[must_use]
    pub fn l2_norm(&self) -> f64 {
        self.weights
            .iter()
            .chain(std::iter::once(&self.intercept))
            .map(|v| v * v)
            .sum::<f64>()
            .sqrt()
    }
}

/// Trait for differential privacy on client updates.
///
/// Implementations bound each update's norm and add calibrated noise, so no
/// single shard can dominate (or be read back out of) the aggregate.
pub trait DifferentialPrivacy: Send + Sync {
    /// Clip the update in place, then add noise to every coordinate.
    ///
    /// # Errors
    /// Returns `DpError` if the mechanism is misconfigured or its RNG is
    /// unavailable; the update must then be discarded.
    fn privatize(&self, update: &mut ClientUpdate) -> Result<(), DpError>;

    /// Norm bound applied before noising.
    fn clip_threshold(&self) -> f64;

    /// Standard deviation of the per-coordinate noise.
    fn noise_scale(&self) -> f64;

    /// Number of updates privatized so far.
    fn updates_privatized(&self) -> u64;

    /// Whether `privatize` changes updates at all.
    fn is_enabled(&self) -> bool;
}
