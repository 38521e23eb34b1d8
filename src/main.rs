//! Glycosecure: encrypted diabetes risk scoring.
//!
//! Main entry point for the inference server.

use std::sync::Arc;

use anyhow::{Context, Result};

use glycosecure::adapters::csv::CsvDataset;
use glycosecure::adapters::{CkksEngine, FileStore, GaussianMechanism};
use glycosecure::application::{FederatedTrainer, InferenceService, ModelRegistry, TrainingConfig};
use glycosecure::config::ServerConfig;
use glycosecure::logging::init_logging;
use glycosecure::transport::{router, ServerState};

#[tokio::main]
async fn main() -> Result<()> {
    let _guard = init_logging("logs/glycosecure-server.log")?;

    let config = ServerConfig::from_env_or_default();
    tracing::info!("Starting Glycosecure server v{}...", env!("CARGO_PKG_VERSION"));

    let store = Arc::new(
        FileStore::new(&config.artifact_dir)
            .with_context(|| format!("artifact dir {}", config.artifact_dir.display()))?,
    );
    let dataset = Arc::new(CsvDataset::with_label_column(
        &config.dataset_path,
        &config.label_column,
    ));
    let trainer = FederatedTrainer::new(
        TrainingConfig::from_env_or_default(),
        Arc::new(GaussianMechanism::new()),
    );
    let registry = Arc::new(ModelRegistry::new(store, trainer, dataset));
    let service = InferenceService::new(
        Arc::new(CkksEngine::new()),
        registry,
        config.publish_weights,
    );

    if config.publish_weights {
        tracing::warn!("GLYCOSECURE_PUBLISH_WEIGHTS is on: /params exposes model weights");
    }

    let state = Arc::new(ServerState { service });

    // Train before accepting traffic when no bundle exists; on failure the
    // next request retries.
    if !state.service.model_ready() {
        tracing::info!(
            "No model bundle yet; training from {}",
            config.dataset_path.display()
        );
        let warm = Arc::clone(&state);
        if let Err(e) = tokio::task::spawn_blocking(move || warm.service.params()).await? {
            tracing::error!("Initial training failed: {e}");
        }
    }

    let app = router(state, config.max_request_bytes);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("bind {}", config.bind))?;
    tracing::info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Glycosecure server shutdown complete.");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
