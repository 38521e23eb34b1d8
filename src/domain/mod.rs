//! Domain layer: Core business types and logic.
//!
//! Plain Rust types with strict validation; no I/O and no cryptographic
//! arithmetic lives here.

mod crypto;
pub mod dataset;
pub mod features;
mod model;
mod prediction;

pub use crypto::{
    compute_fingerprint, BatchEntry, CryptoError, EncryptedBatch, EncryptedVector,
    EncryptionContext, SchemeParameters, SecretKeyMaterial,
};
pub use dataset::{DatasetError, LabeledDataset};
pub use features::{FeatureError, NormalizationStats, PolynomialExpansion};
pub use model::{ModelBundle, PublishedParams, TrainingSummary};
pub use prediction::{DecisionThreshold, PredictionRecord, PredictionSummary};

#[cfg(test)]
pub(crate) use model::test_support;
