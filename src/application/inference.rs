//! Inference service: server-side encrypted scoring.
//!
//! This service coordinates:
//! - Loading (or retraining) the model bundle
//! - Validating the client's public context and batch headers
//! - Blind evaluation of the linear model on every entry
//!
//! It never holds a secret key and never sees a plaintext feature or score.

use std::sync::Arc;

use rayon::prelude::*;

use crate::adapters::StorageError;
use crate::domain::{BatchEntry, CryptoError, EncryptedBatch, PublishedParams};
use crate::ports::{ArtifactStore, DifferentialPrivacy, HomomorphicEngine};
use crate::transport::WireError;
use crate::GlycosecureError;

use super::registry::ModelRegistry;

/// Service for encrypted inference requests.
pub struct InferenceService<E, S, D>
where
    E: HomomorphicEngine,
    S: ArtifactStore,
    D: DifferentialPrivacy,
{
    engine: Arc<E>,
    registry: Arc<ModelRegistry<S, D>>,
    publish_weights: bool,
}

impl<E, S, D> InferenceService<E, S, D>
where
    E: HomomorphicEngine,
    S: ArtifactStore,
    S::Error: Into<StorageError>,
    D: DifferentialPrivacy,
{
    pub fn new(engine: Arc<E>, registry: Arc<ModelRegistry<S, D>>, publish_weights: bool) -> Self {
        Self {
            engine,
            registry,
            publish_weights,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ModelRegistry<S, D>> {
        &self.registry
    }

    /// Whether a bundle is on disk right now (no retrain is triggered).
    #[must_use]
    pub fn model_ready(&self) -> bool {
        self.registry.store().has_bundle().unwrap_or(false)
    }

    /// Preprocessing parameters for clients.
    ///
    /// # Errors
    /// Returns error if no bundle exists and none can be trained.
    pub fn params(&self) -> Result<PublishedParams, GlycosecureError> {
        let bundle = self.registry.ensure_bundle()?;
        Ok(bundle.published(self.publish_weights))
    }

    /// Score every entry of `batch` under the client's public context.
    ///
    /// The response has the same length and order as the request. Entries
    /// that cannot be parsed come back as `Skipped` in place.
    ///
    /// # Errors
    /// Fails the whole request on a private or unreadable context, a
    /// fingerprint mismatch, a width mismatch, or an engine failure other
    /// than a corrupt entry.
    pub fn predict(
        &self,
        batch: &EncryptedBatch,
        context_bytes: &[u8],
    ) -> Result<EncryptedBatch, GlycosecureError> {
        if batch.version != EncryptedBatch::VERSION {
            return Err(WireError::UnsupportedVersion(batch.version).into());
        }

        let context = self.engine.deserialize_context(context_bytes)?;
        if context.is_private() {
            tracing::warn!("Rejected a context carrying secret key material");
            return Err(GlycosecureError::PrivateKeyRejected);
        }
        context.ensure_fingerprint(&batch.context_fingerprint)?;

        let bundle = self.registry.ensure_bundle()?;
        let model_fingerprint = bundle.fingerprint();
        if let Some(found) = &batch.model_fingerprint {
            if *found != model_fingerprint {
                return Err(GlycosecureError::StaleModel {
                    expected: model_fingerprint,
                    found: found.clone(),
                });
            }
        }

        let width = bundle.model_width();
        for entry in &batch.entries {
            if let BatchEntry::Ciphertext(vector) = entry {
                context.ensure_fingerprint(&vector.context_fingerprint)?;
                if vector.len != width {
                    return Err(GlycosecureError::DimensionMismatch {
                        expected: width,
                        found: vector.len,
                    });
                }
            }
        }

        tracing::info!(
            "Scoring {} entries under context {} with model {}",
            batch.len(),
            context.fingerprint(),
            model_fingerprint
        );

        let entries = batch
            .entries
            .par_iter()
            .enumerate()
            .map(|(index, entry)| match entry {
                BatchEntry::Skipped { reason } => Ok(BatchEntry::Skipped {
                    reason: reason.clone(),
                }),
                BatchEntry::Ciphertext(vector) => match self.engine.linear_score(
                    vector,
                    &bundle.weights,
                    bundle.intercept,
                    &context,
                ) {
                    Ok(score) => Ok(BatchEntry::Ciphertext(score)),
                    Err(CryptoError::CorruptCiphertext(reason)) => {
                        tracing::warn!("Skipping entry {index}: corrupt ciphertext ({reason})");
                        Ok(BatchEntry::Skipped { reason })
                    }
                    Err(e) => Err(e),
                },
            })
            .collect::<Result<Vec<_>, CryptoError>>()?;

        let response = EncryptedBatch::new(
            context.fingerprint().to_string(),
            Some(model_fingerprint),
            entries,
        );
        tracing::info!(
            "Scored {} entries ({} skipped, {} bytes)",
            response.len(),
            response.skipped(),
            response.size_bytes()
        );
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::ckks::test_support::small_parameters;
    use crate::adapters::gaussian::{GaussianMechanism, PrivacyConfig};
    use crate::adapters::{CkksEngine, FileStore};
    use crate::application::training::{FederatedTrainer, TrainingConfig};
    use crate::domain::test_support::sample_bundle;
    use crate::domain::{DatasetError, EncryptionContext, LabeledDataset, ModelBundle};
    use crate::ports::DatasetSource;

    struct NoDataset;

    impl DatasetSource for NoDataset {
        fn load_training_set(&self) -> Result<LabeledDataset, DatasetError> {
            Err(DatasetError::Empty)
        }

        fn describe(&self) -> String {
            "none".to_string()
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        engine: Arc<CkksEngine>,
        service: InferenceService<CkksEngine, FileStore, GaussianMechanism>,
        bundle: ModelBundle,
        context: EncryptionContext,
    }

    fn fixture(publish_weights: bool) -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(FileStore::new(dir.path()).expect("store"));
        let bundle = sample_bundle();
        store.save_bundle(&bundle).expect("save bundle");

        let trainer = FederatedTrainer::new(
            TrainingConfig::default(),
            Arc::new(GaussianMechanism::with_config(PrivacyConfig::default())),
        );
        let registry = Arc::new(ModelRegistry::new(store, trainer, Arc::new(NoDataset)));
        let engine = Arc::new(CkksEngine::new());
        let service = InferenceService::new(Arc::clone(&engine), registry, publish_weights);
        let context = engine
            .create_context(&small_parameters())
            .expect("context");
        Fixture {
            _dir: dir,
            engine,
            service,
            bundle,
            context,
        }
    }

    fn request(f: &Fixture, rows: &[Vec<f64>]) -> (EncryptedBatch, Vec<u8>) {
        let public = f.context.derive_public();
        let transformed: Vec<Vec<f64>> = rows
            .iter()
            .map(|r| f.bundle.transform(r).expect("transform"))
            .collect();
        let entries = f
            .engine
            .encrypt_batch(&transformed, &public)
            .expect("encrypt")
            .into_iter()
            .map(BatchEntry::Ciphertext)
            .collect();
        let batch = EncryptedBatch::new(
            public.fingerprint().to_string(),
            Some(f.bundle.fingerprint()),
            entries,
        );
        let bytes = f
            .engine
            .serialize_context(&public, false)
            .expect("serialize");
        (batch, bytes)
    }

    fn decrypt_score(f: &Fixture, entry: &BatchEntry) -> f64 {
        match entry {
            BatchEntry::Ciphertext(v) => f.engine.decrypt(v, &f.context).expect("decrypt")[0],
            BatchEntry::Skipped { reason } => panic!("unexpected skip: {reason}"),
        }
    }

    #[test]
    fn test_scores_match_plaintext_model() {
        let f = fixture(false);
        let rows = vec![vec![150.0, 36.0], vec![90.0, 22.0], vec![120.0, 30.0]];
        let (batch, ctx) = request(&f, &rows);

        let response = f.service.predict(&batch, &ctx).expect("predict");
        assert_eq!(response.len(), rows.len());
        assert_eq!(response.model_fingerprint, Some(f.bundle.fingerprint()));

        for (row, entry) in rows.iter().zip(&response.entries) {
            let expected = f
                .bundle
                .score_transformed(&f.bundle.transform(row).expect("transform"))
                .expect("score");
            let got = decrypt_score(&f, entry);
            assert!((got - expected).abs() < 1e-3, "{got} vs {expected}");
        }
    }

    #[test]
    fn test_corrupt_entry_skipped_in_place() {
        let f = fixture(false);
        let rows: Vec<Vec<f64>> = (0..4).map(|i| vec![100.0 + 20.0 * f64::from(i), 30.0]).collect();
        let (mut batch, ctx) = request(&f, &rows);
        if let BatchEntry::Ciphertext(v) = &mut batch.entries[2] {
            v.ciphertext.truncate(10);
        }

        let response = f.service.predict(&batch, &ctx).expect("predict");
        assert_eq!(response.len(), 4);
        assert_eq!(response.skipped(), 1);
        assert!(response.entries[2].is_skipped());
        for i in [0, 1, 3] {
            assert!(!response.entries[i].is_skipped());
            let expected = f
                .bundle
                .score_transformed(&f.bundle.transform(&rows[i]).expect("transform"))
                .expect("score");
            assert!((decrypt_score(&f, &response.entries[i]) - expected).abs() < 1e-3);
        }
    }

    #[test]
    fn test_private_context_rejected() {
        let f = fixture(false);
        let (batch, _) = request(&f, &[vec![150.0, 36.0]]);
        let private = f
            .engine
            .serialize_context(&f.context, true)
            .expect("serialize");
        assert!(matches!(
            f.service.predict(&batch, &private),
            Err(GlycosecureError::PrivateKeyRejected)
        ));
    }

    #[test]
    fn test_stale_context_and_model_fail_fast() {
        let f = fixture(false);
        let (mut batch, ctx) = request(&f, &[vec![150.0, 36.0]]);

        let mut stale = batch.clone();
        stale.context_fingerprint = "0000000000000000".to_string();
        assert!(matches!(
            f.service.predict(&stale, &ctx),
            Err(GlycosecureError::StaleOrIncompatibleContext(_))
        ));

        batch.model_fingerprint = Some("ffffffffffffffff".to_string());
        assert!(matches!(
            f.service.predict(&batch, &ctx),
            Err(GlycosecureError::StaleModel { .. })
        ));
    }

    #[test]
    fn test_width_mismatch_fails_request() {
        let f = fixture(false);
        let public = f.context.derive_public();
        let raw = f.engine.encrypt(&[150.0, 36.0], &public).expect("encrypt");
        let batch = EncryptedBatch::new(
            public.fingerprint().to_string(),
            None,
            vec![BatchEntry::Ciphertext(raw)],
        );
        let ctx = f.engine.serialize_context(&public, false).expect("serialize");
        assert!(matches!(
            f.service.predict(&batch, &ctx),
            Err(GlycosecureError::DimensionMismatch {
                expected: 5,
                found: 2
            })
        ));
    }

    #[test]
    fn test_params_hide_weights_unless_published() {
        let hidden = fixture(false).service.params().expect("params");
        assert!(hidden.weights.is_none());
        assert!(hidden.intercept.is_none());
        assert_eq!(hidden.model_width, 5);

        let shown = fixture(true).service.params().expect("params");
        assert_eq!(shown.weights, Some(sample_bundle().weights));
    }
}
