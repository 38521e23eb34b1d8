//! Force a federated retrain and persist the new model bundle.
//!
//! Usage: `glycosecure-train [DATASET_CSV]`

use std::sync::Arc;

use anyhow::{Context, Result};

use glycosecure::adapters::csv::CsvDataset;
use glycosecure::adapters::{FileStore, GaussianMechanism};
use glycosecure::application::{FederatedTrainer, ModelRegistry, TrainingConfig};
use glycosecure::config::ServerConfig;
use glycosecure::logging::init_logging;

fn main() -> Result<()> {
    let _guard = init_logging("logs/glycosecure-train.log")?;

    let mut config = ServerConfig::from_env_or_default();
    if let Some(path) = std::env::args().nth(1) {
        config.dataset_path = path.into();
    }

    let training = TrainingConfig::from_env_or_default();
    tracing::info!(
        "Training {} clients x {} rounds on {}",
        training.num_clients,
        training.num_rounds,
        config.dataset_path.display()
    );

    let store = Arc::new(
        FileStore::new(&config.artifact_dir)
            .with_context(|| format!("artifact dir {}", config.artifact_dir.display()))?,
    );
    let bundle_path = store.bundle_path();
    let dataset = Arc::new(CsvDataset::with_label_column(
        &config.dataset_path,
        &config.label_column,
    ));
    let trainer = FederatedTrainer::new(training, Arc::new(GaussianMechanism::new()));
    let registry = ModelRegistry::new(store, trainer, dataset);

    let bundle = registry.retrain()?;
    let summary = &bundle.summary;
    println!(
        "Model {} written to {}: {} rows, accuracy {:.3}, MCC {:.3}",
        bundle.fingerprint(),
        bundle_path.display(),
        summary.rows,
        summary.train_accuracy,
        summary.train_mcc
    );
    Ok(())
}
