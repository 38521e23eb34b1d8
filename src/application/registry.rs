//! Model registry: owns the persisted bundle and retrain-if-missing.

use std::sync::{Arc, Mutex};

use crate::adapters::StorageError;
use crate::domain::ModelBundle;
use crate::ports::{ArtifactStore, DatasetSource, DifferentialPrivacy};
use crate::GlycosecureError;

use super::training::FederatedTrainer;

/// Loads the current bundle, training and persisting one when none is usable.
///
/// # Mutex Behavior
///
/// Retraining is serialized by a `Mutex` with a double-checked load, so
/// concurrent requests that all find the bundle missing train it once. A
/// poisoned mutex fails closed with `GlycosecureError::Training`.
pub struct ModelRegistry<S, D>
where
    S: ArtifactStore,
    D: DifferentialPrivacy,
{
    store: Arc<S>,
    trainer: FederatedTrainer<D>,
    source: Arc<dyn DatasetSource>,
    retrain_lock: Mutex<()>,
}

impl<S, D> ModelRegistry<S, D>
where
    S: ArtifactStore,
    S::Error: Into<StorageError>,
    D: DifferentialPrivacy,
{
    pub fn new(store: Arc<S>, trainer: FederatedTrainer<D>, source: Arc<dyn DatasetSource>) -> Self {
        Self {
            store,
            trainer,
            source,
            retrain_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Current bundle, retraining once if it is missing or unreadable.
    ///
    /// # Errors
    /// Returns error if storage fails, or if no bundle exists even after a
    /// retrain attempt.
    pub fn ensure_bundle(&self) -> Result<ModelBundle, GlycosecureError> {
        if let Some(bundle) = self.load_usable(false)? {
            return Ok(bundle);
        }

        let _guard = self
            .retrain_lock
            .lock()
            .map_err(|_| GlycosecureError::Training("retrain lock poisoned".to_string()))?;

        // Another request may have finished training while we waited.
        if let Some(bundle) = self.load_usable(true)? {
            return Ok(bundle);
        }

        tracing::warn!(
            "No usable model bundle; retraining from {}",
            self.source.describe()
        );
        if let Err(e) = self.retrain_locked() {
            tracing::error!("Retrain failed: {e}");
            return Err(e);
        }

        self.load_usable(false)?.ok_or_else(|| {
            GlycosecureError::MissingArtifact("model bundle missing after retrain".to_string())
        })
    }

    /// Train from the dataset source and replace the bundle.
    ///
    /// # Errors
    /// Returns error if loading, training or persisting fails; the previous
    /// bundle is left untouched then.
    pub fn retrain(&self) -> Result<ModelBundle, GlycosecureError> {
        let _guard = self
            .retrain_lock
            .lock()
            .map_err(|_| GlycosecureError::Training("retrain lock poisoned".to_string()))?;
        self.retrain_locked()
    }

    fn retrain_locked(&self) -> Result<ModelBundle, GlycosecureError> {
        let dataset = self.source.load_training_set()?;
        let bundle = self.trainer.train(&dataset)?;
        self.store
            .save_bundle(&bundle)
            .map_err(|e| GlycosecureError::Storage(e.into()))?;
        tracing::info!(
            "Persisted model bundle {} ({} weights)",
            bundle.fingerprint(),
            bundle.weights.len()
        );
        Ok(bundle)
    }

    /// `Ok(None)` for a missing or corrupt bundle.
    fn load_usable(&self, remove_corrupt: bool) -> Result<Option<ModelBundle>, GlycosecureError> {
        let error: StorageError = match self.store.load_bundle() {
            Ok(bundle) => return Ok(bundle),
            Err(e) => e.into(),
        };
        match error {
            StorageError::Corrupt { path, reason } => {
                tracing::warn!(
                    "Model bundle at {} is unreadable ({reason}); treating as missing",
                    path.display()
                );
                if remove_corrupt {
                    self.store
                        .delete_bundle()
                        .map_err(|e| GlycosecureError::Storage(e.into()))?;
                }
                Ok(None)
            }
            other => Err(GlycosecureError::Storage(other)),
        }
    }
}
