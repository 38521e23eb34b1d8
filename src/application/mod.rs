//! Application layer: Use cases and services.
//!
//! This module orchestrates domain logic with ports to implement
//! the core use cases: training, serving encrypted inference, and the
//! client-side session.

mod client;
mod inference;
mod registry;
mod training;

pub use client::{ClientSession, SessionState};
pub use inference::InferenceService;
pub use registry::ModelRegistry;
pub use training::{FederatedTrainer, Partition, TrainingConfig};
