//! Glycosecure client: encrypt a feature CSV, have it scored, decrypt.
//!
//! Usage: `glycosecure-client [INPUT_CSV] [OUTPUT_CSV] [--new-context]`
//!
//! Everything else comes from `GLYCOSECURE_*` environment variables.

use std::sync::Arc;

use anyhow::{bail, Context, Result};

use glycosecure::adapters::csv::{read_feature_rows, write_predictions};
use glycosecure::adapters::{CkksEngine, FileStore};
use glycosecure::application::ClientSession;
use glycosecure::config::ClientConfig;
use glycosecure::domain::PredictionSummary;
use glycosecure::logging::init_logging;
use glycosecure::ports::{ArtifactStore, BatchKind, ContextKind, HomomorphicEngine};
use glycosecure::transport::{codec, RemoteServer};

struct Args {
    input: Option<String>,
    output: Option<String>,
    new_context: bool,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        input: None,
        output: None,
        new_context: false,
    };
    for arg in std::env::args().skip(1) {
        if arg == "--new-context" {
            args.new_context = true;
        } else if arg == "-h" || arg == "--help" {
            println!("usage: glycosecure-client [INPUT_CSV] [OUTPUT_CSV] [--new-context]");
            std::process::exit(0);
        } else if arg.starts_with('-') {
            bail!("unknown option {arg}");
        } else if args.input.is_none() {
            args.input = Some(arg);
        } else if args.output.is_none() {
            args.output = Some(arg);
        } else {
            bail!("unexpected argument {arg}");
        }
    }
    Ok(args)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args()?;
    let _guard = init_logging("logs/glycosecure-client.log")?;

    let mut config = ClientConfig::from_env_or_default();
    if let Some(input) = args.input {
        config.input_path = input.into();
    }
    if let Some(output) = args.output {
        config.output_path = output.into();
    }

    let store = FileStore::new(&config.artifact_dir)
        .with_context(|| format!("artifact dir {}", config.artifact_dir.display()))?;
    let engine = Arc::new(CkksEngine::new());
    let server = RemoteServer::new(&config.server_url, config.request_timeout)?;

    let mut session = ClientSession::new(Arc::clone(&engine), config.scheme.clone());
    if !args.new_context {
        if let Some(bytes) = store.load_context(ContextKind::Private)? {
            let context = engine
                .deserialize_context(&bytes)
                .context("stored private context is unreadable; rerun with --new-context")?;
            tracing::info!("Reusing context {}", context.fingerprint());
            session = session.with_context(context)?;
        }
    }

    let params = server.fetch_params().await?;
    let feature_names = params.feature_names.clone();
    session.accept_params(params)?;

    let rows = read_feature_rows(
        &config.input_path,
        &config.label_column,
        Some(feature_names.as_slice()),
    )
    .with_context(|| format!("reading {}", config.input_path.display()))?;
    tracing::info!("Encrypting {} rows from {}", rows.len(), config.input_path.display());

    let request = session.encrypt_rows(&rows)?;
    store.save_batch(BatchKind::Input, &codec::encode(request)?)?;
    store.save_context(ContextKind::Public, &session.public_context_bytes()?)?;
    store.save_context(ContextKind::Private, &session.private_context_bytes()?)?;

    let (batch, public_context) = session.submission()?;
    let response = server.predict(&batch, public_context).await?;
    store.save_batch(BatchKind::Output, &codec::encode(&response)?)?;
    session.accept_results(response)?;

    let predictions = session.decrypt()?;
    write_predictions(&config.output_path, predictions)?;

    let summary = PredictionSummary::from_records(predictions);
    tracing::info!("{summary}; written to {}", config.output_path.display());
    println!("{summary}");
    println!("Predictions written to {}", config.output_path.display());
    Ok(())
}
