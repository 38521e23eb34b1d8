//! HTTP client for the inference server.

use std::time::Duration;

use reqwest::multipart::{Form, Part};

use super::codec;
use super::server::{ErrorResponse, HealthResponse};
use crate::domain::{EncryptedBatch, PublishedParams};
use crate::GlycosecureError;

/// Remote inference server.
#[derive(Debug, Clone)]
pub struct RemoteServer {
    base_url: String,
    client: reqwest::Client,
}

fn transport(e: reqwest::Error) -> GlycosecureError {
    if e.is_timeout() {
        GlycosecureError::Transport(format!("request timed out: {e}"))
    } else {
        GlycosecureError::Transport(e.to_string())
    }
}

impl RemoteServer {
    /// # Errors
    /// Returns `GlycosecureError::Transport` if the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, GlycosecureError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(transport)?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Body bytes of a successful response; the server's `detail` otherwise.
    async fn body(response: reqwest::Response) -> Result<Vec<u8>, GlycosecureError> {
        let status = response.status();
        let bytes = response.bytes().await.map_err(transport)?;
        if status.is_success() {
            return Ok(bytes.to_vec());
        }
        let detail = serde_json::from_slice::<ErrorResponse>(&bytes)
            .map(|e| e.detail)
            .unwrap_or_else(|_| String::from_utf8_lossy(&bytes).into_owned());
        Err(GlycosecureError::Transport(format!(
            "server returned {status}: {detail}"
        )))
    }

    /// # Errors
    /// Returns `GlycosecureError::Transport` if the server is unreachable.
    pub async fn health(&self) -> Result<HealthResponse, GlycosecureError> {
        let response = self
            .client
            .get(self.url("/health"))
            .send()
            .await
            .map_err(transport)?;
        let bytes = Self::body(response).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// `GET /params`.
    ///
    /// # Errors
    /// Returns error on a transport failure, an error status, or an
    /// undecodable body.
    pub async fn fetch_params(&self) -> Result<PublishedParams, GlycosecureError> {
        tracing::info!("Fetching model parameters from {}", self.base_url);
        let response = self
            .client
            .get(self.url("/params"))
            .send()
            .await
            .map_err(transport)?;
        let bytes = Self::body(response).await?;
        Ok(codec::decode_params(&bytes)?)
    }

    /// `POST /predict` with the encrypted batch and public context.
    ///
    /// # Errors
    /// Returns error on a transport failure, an error status, or an
    /// undecodable body.
    pub async fn predict(
        &self,
        batch: &EncryptedBatch,
        public_context: Vec<u8>,
    ) -> Result<EncryptedBatch, GlycosecureError> {
        let encrypted = codec::encode(batch)?;
        tracing::info!(
            "Submitting {} encrypted rows ({} bytes) to {}",
            batch.len(),
            encrypted.len(),
            self.base_url
        );

        let form = Form::new()
            .part(
                "encrypted",
                Part::bytes(encrypted)
                    .file_name("encrypted_input.bin")
                    .mime_str("application/octet-stream")
                    .map_err(transport)?,
            )
            .part(
                "context",
                Part::bytes(public_context)
                    .file_name("context.public")
                    .mime_str("application/octet-stream")
                    .map_err(transport)?,
            );

        let response = self
            .client
            .post(self.url("/predict"))
            .multipart(form)
            .send()
            .await
            .map_err(transport)?;
        let bytes = Self::body(response).await?;
        Ok(codec::decode_batch(&bytes)?)
    }
}
