//! Prediction results.
//!
//! The decrypted value is the raw linear score of the model; the label comes
//! from thresholding that score.

use serde::{Deserialize, Serialize};

/// Thresholding rule applied to a decrypted score.
///
/// `label = 1` only when the score exceeds `threshold` by more than
/// `tolerance`, so approximation noise around the threshold never flips a
/// score that is exactly at it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecisionThreshold {
    pub threshold: f64,
    pub tolerance: f64,
}

impl Default for DecisionThreshold {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            tolerance: 1e-6,
        }
    }
}

impl DecisionThreshold {
    #[must_use]
    pub fn classify(&self, score: f64) -> PredictionRecord {
        let label = u8::from(score - self.threshold > self.tolerance);
        PredictionRecord { label, score }
    }
}

/// One decrypted, thresholded prediction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    /// 1 = elevated diabetes risk, 0 = not
    pub label: u8,

    /// Raw decrypted linear score
    pub score: f64,
}

impl PredictionRecord {
    #[must_use]
    pub fn is_positive(&self) -> bool {
        self.label == 1
    }
}

/// Label counts over a batch, skipped rows included.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictionSummary {
    pub total: usize,
    pub positives: usize,
    pub negatives: usize,
    pub skipped: usize,
}

impl PredictionSummary {
    #[must_use]
    pub fn from_records(records: &[Option<PredictionRecord>]) -> Self {
        let mut summary = Self {
            total: records.len(),
            ..Self::default()
        };
        for record in records {
            match record {
                Some(r) if r.is_positive() => summary.positives += 1,
                Some(_) => summary.negatives += 1,
                None => summary.skipped += 1,
            }
        }
        summary
    }
}

impl std::fmt::Display for PredictionSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} rows: {} positive, {} negative, {} skipped",
            self.total, self.positives, self.negatives, self.skipped
        )
    }
}
