//! Storage port: Trait for persisted artifacts.
//!
//! Both sides persist opaque artifacts: the server its model bundle, the
//! client its contexts and encrypted batches.

use crate::domain::{LabeledDataset, ModelBundle};

/// Which serialized context to load or store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKind {
    /// Parameters and public key only; safe to share.
    Public,
    /// Includes the secret key; never leaves the client.
    Private,
}

/// Which encrypted batch to load or store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchKind {
    /// Encrypted feature rows sent to the server.
    Input,
    /// Encrypted scores returned by the server.
    Output,
}

/// Trait for artifact storage.
///
/// Writes must be atomic: a concurrent reader sees either the old or the new
/// artifact, never a partial one.
pub trait ArtifactStore: Send + Sync {
    /// Error type for storage operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Load the current model bundle.
    ///
    /// # Returns
    /// `None` if no bundle has been written yet.
    ///
    /// # Errors
    /// Returns error if the bundle exists but cannot be read or parsed.
    fn load_bundle(&self) -> Result<Option<ModelBundle>, Self::Error>;

    /// Replace the model bundle.
    ///
    /// # Errors
    /// Returns error if storage operation fails.
    fn save_bundle(&self, bundle: &ModelBundle) -> Result<(), Self::Error>;

    /// Check if a bundle exists.
    fn has_bundle(&self) -> Result<bool, Self::Error>;

    /// Delete the bundle (used when it is found corrupt).
    ///
    /// # Errors
    /// Returns error if storage operation fails.
    fn delete_bundle(&self) -> Result<(), Self::Error>;

    /// Load a serialized context.
    ///
    /// # Errors
    /// Returns error if storage operation fails.
    fn load_context(&self, kind: ContextKind) -> Result<Option<Vec<u8>>, Self::Error>;

    /// Store a serialized context.
    ///
    /// # Errors
    /// Returns error if storage operation fails.
    fn save_context(&self, kind: ContextKind, bytes: &[u8]) -> Result<(), Self::Error>;

    /// Load a serialized encrypted batch.
    ///
    /// # Errors
    /// Returns error if storage operation fails.
    fn load_batch(&self, kind: BatchKind) -> Result<Option<Vec<u8>>, Self::Error>;

    /// Store a serialized encrypted batch.
    ///
    /// # Errors
    /// Returns error if storage operation fails.
    fn save_batch(&self, kind: BatchKind, bytes: &[u8]) -> Result<(), Self::Error>;
}

/// Where training data comes from when the server has to (re)train.
pub trait DatasetSource: Send + Sync {
    /// Load the full labeled training set.
    ///
    /// # Errors
    /// Returns `DatasetError` if the source is missing or malformed.
    fn load_training_set(&self) -> Result<LabeledDataset, crate::domain::DatasetError>;

    /// Human-readable description for logs.
    fn describe(&self) -> String;
}
