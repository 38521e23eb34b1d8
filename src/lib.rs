//! # Glycosecure
//!
//! Privacy-preserving diabetes risk scoring.
//!
//! This crate provides:
//! - Federated logistic-regression training with clipped, noised client updates
//! - A CKKS engine on `fhe-math` rings for encrypted linear inference
//! - An HTTP server that scores ciphertexts without ever holding a secret key
//! - A client pipeline that encrypts rows, submits them and decrypts scores
//!
//! ## Architecture
//!
//! The crate follows Hexagonal Architecture:
//! - `domain`: Core types (encryption context, batches, model bundle, features)
//! - `ports`: Trait definitions for external operations
//! - `adapters`: Concrete implementations (CKKS, Gaussian noise, files, CSV)
//! - `application`: Use cases orchestrating domain and ports
//! - `transport`: HTTP server, HTTP client and wire codec
//! - `config` / `logging`: Environment-driven settings and tracing setup

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod logging;
pub mod ports;
pub mod transport;

pub use domain::{EncryptedBatch, ModelBundle, PredictionRecord, PublishedParams};

/// Result type for Glycosecure operations
pub type Result<T> = std::result::Result<T, GlycosecureError>;

/// Main error type for Glycosecure
#[derive(Debug, thiserror::Error)]
pub enum GlycosecureError {
    #[error("Cryptographic operation failed: {0}")]
    Crypto(domain::CryptoError),

    #[error("Storage operation failed: {0}")]
    Storage(#[from] adapters::StorageError),

    #[error("Feature transform failed: {0}")]
    Feature(domain::FeatureError),

    #[error("Dataset error: {0}")]
    Dataset(#[from] domain::DatasetError),

    #[error("Privacy error: {0}")]
    Privacy(#[from] ports::DpError),

    #[error("Missing artifact: {0}")]
    MissingArtifact(String),

    #[error("Dimension mismatch: expected {expected} features, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("Stale or incompatible encryption context: {0}")]
    StaleOrIncompatibleContext(String),

    #[error("Stale model: client preprocessed with {found}, server has {expected}")]
    StaleModel { expected: String, found: String },

    #[error("Refusing a context that carries a secret key")]
    PrivateKeyRejected,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Training failed: {0}")]
    Training(String),

    #[error("Wire format error: {0}")]
    Wire(#[from] transport::WireError),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<domain::CryptoError> for GlycosecureError {
    /// Lifts the shape errors every layer must tell apart out of the
    /// engine's error type.
    fn from(e: domain::CryptoError) -> Self {
        match e {
            domain::CryptoError::DimensionMismatch { expected, found } => {
                Self::DimensionMismatch { expected, found }
            }
            domain::CryptoError::ContextMismatch { expected, found } => {
                Self::StaleOrIncompatibleContext(format!(
                    "expected context {expected}, found {found}"
                ))
            }
            other => Self::Crypto(other),
        }
    }
}

impl From<domain::FeatureError> for GlycosecureError {
    fn from(e: domain::FeatureError) -> Self {
        match e {
            domain::FeatureError::DimensionMismatch { expected, found } => {
                Self::DimensionMismatch { expected, found }
            }
            other => Self::Feature(other),
        }
    }
}
