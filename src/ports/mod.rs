//! Ports layer: Trait definitions for external operations.
//!
//! Following Hexagonal Architecture, these traits define the boundaries
//! between the application and external systems (homomorphic scheme,
//! noise mechanism, storage, training data).

mod fhe_engine;
mod privacy;
mod storage;

pub use fhe_engine::HomomorphicEngine;
pub use privacy::{ClientUpdate, DifferentialPrivacy, DpError};
pub use storage::{ArtifactStore, BatchKind, ContextKind, DatasetSource};
