//! Adapters layer: Concrete implementations of ports.
//!
//! - `ckks`: RNS-CKKS engine on `fhe-math` rings
//! - `gaussian`: clipped Gaussian mechanism for federated updates
//! - `fs`: file-backed artifact storage
//! - `csv`: dataset loading and prediction output
//! - `sanitize`: log filtering for health data and key material

pub mod ckks;
pub mod csv;
pub mod fs;
pub mod gaussian;
pub mod sanitize;

pub use ckks::CkksEngine;
pub use fs::{FileStore, StorageError};
pub use gaussian::GaussianMechanism;
