//! HTTP server: `/params`, `/predict` and `/health`.
//!
//! Handlers decode and validate on the async side, then run the CPU-heavy
//! work on a blocking worker so the runtime keeps accepting connections.

use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use super::codec;
use crate::adapters::{CkksEngine, FileStore, GaussianMechanism};
use crate::application::InferenceService;
use crate::domain::CryptoError;
use crate::GlycosecureError;

/// The concrete service behind the HTTP API.
pub type ServerService = InferenceService<CkksEngine, FileStore, GaussianMechanism>;

/// Shared router state.
pub struct ServerState {
    pub service: ServerService,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub detail: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub model_ready: bool,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Build the router with a request body cap of `max_request_bytes`.
pub fn router(state: Arc<ServerState>, max_request_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/params", get(get_params))
        .route("/params/", get(get_params))
        .route("/predict", post(predict))
        .route("/predict/", post(predict))
        .layer(DefaultBodyLimit::max(max_request_bytes))
        .with_state(state)
}

fn status_for(error: &GlycosecureError) -> StatusCode {
    match error {
        GlycosecureError::DimensionMismatch { .. }
        | GlycosecureError::StaleOrIncompatibleContext(_)
        | GlycosecureError::StaleModel { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        GlycosecureError::PrivateKeyRejected
        | GlycosecureError::Wire(_)
        | GlycosecureError::Crypto(CryptoError::InvalidContext(_))
        | GlycosecureError::Crypto(CryptoError::Config(_)) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn api_error(error: GlycosecureError) -> ApiError {
    let status = status_for(&error);
    if status.is_server_error() {
        tracing::error!("Request failed: {error}");
    } else {
        tracing::warn!("Request rejected ({status}): {error}");
    }
    (
        status,
        Json(ErrorResponse {
            detail: error.to_string(),
        }),
    )
}

fn bad_request(detail: impl Into<String>) -> ApiError {
    let detail = detail.into();
    tracing::warn!("Bad request: {detail}");
    (StatusCode::BAD_REQUEST, Json(ErrorResponse { detail }))
}

fn worker_failed(error: tokio::task::JoinError) -> ApiError {
    tracing::error!("Blocking worker failed: {error}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            detail: "internal worker failure".to_string(),
        }),
    )
}

fn octet_stream(bytes: Vec<u8>) -> Response {
    ([(header::CONTENT_TYPE, "application/octet-stream")], bytes).into_response()
}

async fn health(State(state): State<Arc<ServerState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        model_ready: state.service.model_ready(),
    })
}

async fn get_params(State(state): State<Arc<ServerState>>) -> Result<Response, ApiError> {
    let params = tokio::task::spawn_blocking(move || state.service.params())
        .await
        .map_err(worker_failed)?
        .map_err(api_error)?;
    let bytes = codec::encode(&params).map_err(|e| api_error(e.into()))?;
    Ok(octet_stream(bytes))
}

async fn predict(
    State(state): State<Arc<ServerState>>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let mut encrypted = None;
    let mut context = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        let status = e.status();
        tracing::warn!("Multipart error ({status}): {e}");
        (
            status,
            Json(ErrorResponse {
                detail: e.body_text(),
            }),
        )
    })? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("encrypted") => {
                encrypted = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| bad_request(e.body_text()))?,
                );
            }
            Some("context") => {
                context = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| bad_request(e.body_text()))?,
                );
            }
            other => tracing::debug!("Ignoring multipart part {other:?}"),
        }
    }

    let encrypted = encrypted.ok_or_else(|| bad_request("missing multipart part 'encrypted'"))?;
    let context = context.ok_or_else(|| bad_request("missing multipart part 'context'"))?;
    let batch = codec::decode_batch(&encrypted).map_err(|e| api_error(e.into()))?;

    tracing::info!(
        "Predict request: {} entries, {} bytes of ciphertext",
        batch.len(),
        batch.size_bytes()
    );

    let response = tokio::task::spawn_blocking(move || state.service.predict(&batch, &context))
        .await
        .map_err(worker_failed)?
        .map_err(api_error)?;
    let bytes = codec::encode(&response).map_err(|e| api_error(e.into()))?;
    Ok(octet_stream(bytes))
}
