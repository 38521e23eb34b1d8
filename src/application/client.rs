//! Client session: encrypt, submit, decrypt.
//!
//! A session walks a fixed sequence of states. Each call performs exactly one
//! transition and refuses to run out of order:
//!
//! ```text
//! NoParams -> ParamsFetched -> Encrypted -> Submitted -> ResultReceived -> Decrypted
//! ```
//!
//! The private context never leaves the session except through
//! [`ClientSession::private_context_bytes`], which is meant for local
//! persistence only.

use std::sync::Arc;

use rayon::prelude::*;

use crate::domain::{
    BatchEntry, CryptoError, DecisionThreshold, EncryptedBatch, EncryptionContext,
    PredictionRecord, PublishedParams, SchemeParameters,
};
use crate::ports::HomomorphicEngine;
use crate::GlycosecureError;

/// Where a session is in the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NoParams,
    ParamsFetched,
    Encrypted,
    Submitted,
    ResultReceived,
    Decrypted,
}

/// One client run against a server.
pub struct ClientSession<E>
where
    E: HomomorphicEngine,
{
    engine: Arc<E>,
    scheme: SchemeParameters,
    threshold: DecisionThreshold,
    state: SessionState,
    params: Option<PublishedParams>,
    context: Option<EncryptionContext>,
    request: Option<EncryptedBatch>,
    response: Option<EncryptedBatch>,
    predictions: Vec<Option<PredictionRecord>>,
}

impl<E> ClientSession<E>
where
    E: HomomorphicEngine,
{
    pub fn new(engine: Arc<E>, scheme: SchemeParameters) -> Self {
        Self {
            engine,
            scheme,
            threshold: DecisionThreshold::default(),
            state: SessionState::NoParams,
            params: None,
            context: None,
            request: None,
            response: None,
            predictions: Vec::new(),
        }
    }

    /// Reuse an existing private context instead of generating one.
    ///
    /// # Errors
    /// Returns `InvalidState` after encryption has started, and
    /// `CryptoError::MissingSecretKey` for a public context.
    pub fn with_context(mut self, context: EncryptionContext) -> Result<Self, GlycosecureError> {
        if !matches!(self.state, SessionState::NoParams | SessionState::ParamsFetched) {
            return Err(self.out_of_order("install a context"));
        }
        if !context.is_private() {
            return Err(CryptoError::MissingSecretKey.into());
        }
        self.scheme = context.parameters().clone();
        self.context = Some(context);
        Ok(self)
    }

    #[must_use]
    pub fn with_threshold(mut self, threshold: DecisionThreshold) -> Self {
        self.threshold = threshold;
        self
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn params(&self) -> Option<&PublishedParams> {
        self.params.as_ref()
    }

    #[must_use]
    pub fn context(&self) -> Option<&EncryptionContext> {
        self.context.as_ref()
    }

    /// The batch sent to the server, once encrypted.
    #[must_use]
    pub fn request(&self) -> Option<&EncryptedBatch> {
        self.request.as_ref()
    }

    /// The batch returned by the server, once received.
    #[must_use]
    pub fn response(&self) -> Option<&EncryptedBatch> {
        self.response.as_ref()
    }

    #[must_use]
    pub fn predictions(&self) -> &[Option<PredictionRecord>] {
        &self.predictions
    }

    fn out_of_order(&self, action: &str) -> GlycosecureError {
        GlycosecureError::InvalidState(format!("cannot {action} in state {:?}", self.state))
    }

    fn expect_state(&self, expected: SessionState, action: &str) -> Result<(), GlycosecureError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(self.out_of_order(action))
        }
    }

    /// `NoParams -> ParamsFetched`.
    ///
    /// # Errors
    /// Returns `InvalidState` out of order.
    pub fn accept_params(&mut self, params: PublishedParams) -> Result<(), GlycosecureError> {
        self.expect_state(SessionState::NoParams, "accept parameters")?;
        tracing::info!(
            "Received model parameters {} ({} inputs, {} model features)",
            params.model_fingerprint,
            params.input_width,
            params.model_width
        );
        self.params = Some(params);
        self.state = SessionState::ParamsFetched;
        Ok(())
    }

    /// `ParamsFetched -> Encrypted`: transform and encrypt raw rows.
    ///
    /// Generates a fresh private context if none was installed.
    ///
    /// # Errors
    /// Returns `DimensionMismatch` for a wrong-width row, `CryptoError::Config`
    /// when the model is wider than one ciphertext, and `InvalidState` out of
    /// order.
    pub fn encrypt_rows(&mut self, rows: &[Vec<f64>]) -> Result<&EncryptedBatch, GlycosecureError> {
        self.expect_state(SessionState::ParamsFetched, "encrypt")?;
        let params = self
            .params
            .as_ref()
            .ok_or_else(|| self.out_of_order("encrypt without parameters"))?;

        if params.model_width > self.scheme.capacity() {
            return Err(CryptoError::Config(format!(
                "model needs {} slots, ring dimension {} packs at most {}",
                params.model_width,
                self.scheme.ring_dimension,
                self.scheme.capacity()
            ))
            .into());
        }

        let transformed = rows
            .iter()
            .map(|row| params.transform(row))
            .collect::<Result<Vec<_>, _>>()?;

        if self.context.is_none() {
            self.context = Some(self.engine.create_context(&self.scheme)?);
        }
        let public = self
            .context
            .as_ref()
            .map(EncryptionContext::derive_public)
            .ok_or(CryptoError::MissingSecretKey)?;

        let entries = self
            .engine
            .encrypt_batch(&transformed, &public)?
            .into_iter()
            .map(BatchEntry::Ciphertext)
            .collect();
        let batch = EncryptedBatch::new(
            public.fingerprint().to_string(),
            Some(params.model_fingerprint.clone()),
            entries,
        );
        tracing::info!(
            "Encrypted {} rows under context {} ({} bytes)",
            batch.len(),
            batch.context_fingerprint,
            batch.size_bytes()
        );

        self.state = SessionState::Encrypted;
        Ok(self.request.insert(batch))
    }

    /// `Encrypted -> Submitted`: the request batch and public context bytes.
    ///
    /// # Errors
    /// Returns `InvalidState` out of order.
    pub fn submission(&mut self) -> Result<(EncryptedBatch, Vec<u8>), GlycosecureError> {
        self.expect_state(SessionState::Encrypted, "submit")?;
        let (Some(batch), Some(context)) = (&self.request, &self.context) else {
            return Err(self.out_of_order("submit without an encrypted batch"));
        };
        let context_bytes = self.engine.serialize_context(context, false)?;
        let batch = batch.clone();
        self.state = SessionState::Submitted;
        Ok((batch, context_bytes))
    }

    /// `Submitted -> ResultReceived`.
    ///
    /// # Errors
    /// Returns `StaleOrIncompatibleContext` or `StaleModel` when the response
    /// names another context or model, `Transport` when the entry count
    /// differs from the request, and `InvalidState` out of order.
    pub fn accept_results(&mut self, batch: EncryptedBatch) -> Result<(), GlycosecureError> {
        self.expect_state(SessionState::Submitted, "accept results")?;
        let (Some(request), Some(context)) = (&self.request, &self.context) else {
            return Err(self.out_of_order("accept results without a request"));
        };

        context.ensure_fingerprint(&batch.context_fingerprint)?;
        if let (Some(expected), Some(found)) = (
            self.params.as_ref().map(|p| &p.model_fingerprint),
            batch.model_fingerprint.as_ref(),
        ) {
            if expected != found {
                return Err(GlycosecureError::StaleModel {
                    expected: expected.clone(),
                    found: found.clone(),
                });
            }
        }
        if batch.len() != request.len() {
            return Err(GlycosecureError::Transport(format!(
                "response has {} entries for {} submitted",
                batch.len(),
                request.len()
            )));
        }

        tracing::info!(
            "Received {} encrypted scores ({} skipped by server)",
            batch.len(),
            batch.skipped()
        );
        self.response = Some(batch);
        self.state = SessionState::ResultReceived;
        Ok(())
    }

    /// `ResultReceived -> Decrypted`.
    ///
    /// Skipped or unreadable entries become `None` at their position.
    ///
    /// # Errors
    /// Returns error if the context cannot decrypt at all, and `InvalidState`
    /// out of order.
    pub fn decrypt(&mut self) -> Result<&[Option<PredictionRecord>], GlycosecureError> {
        self.expect_state(SessionState::ResultReceived, "decrypt")?;
        let (Some(response), Some(context)) = (&self.response, &self.context) else {
            return Err(self.out_of_order("decrypt without results"));
        };
        let engine = &self.engine;
        let threshold = self.threshold;

        let predictions = response
            .entries
            .par_iter()
            .enumerate()
            .map(|(index, entry)| match entry {
                BatchEntry::Skipped { reason } => {
                    tracing::warn!("Row {index} skipped by server: {reason}");
                    Ok(None)
                }
                BatchEntry::Ciphertext(vector) => match engine.decrypt(vector, context) {
                    Ok(values) => Ok(values.first().map(|&score| threshold.classify(score))),
                    Err(CryptoError::CorruptCiphertext(reason))
                    | Err(CryptoError::Decryption(reason)) => {
                        tracing::warn!("Row {index} could not be decrypted: {reason}");
                        Ok(None)
                    }
                    Err(CryptoError::ContextMismatch { found, .. }) => {
                        tracing::warn!("Row {index} was encrypted under context {found}");
                        Ok(None)
                    }
                    Err(e) => Err(e),
                },
            })
            .collect::<Result<Vec<_>, CryptoError>>()?;

        self.predictions = predictions;
        self.state = SessionState::Decrypted;
        Ok(&self.predictions)
    }

    /// Back to `NoParams`, keeping the context for the next run.
    pub fn reset(&mut self) {
        self.state = SessionState::NoParams;
        self.params = None;
        self.request = None;
        self.response = None;
        self.predictions.clear();
    }

    /// Public context bytes, safe to share.
    ///
    /// # Errors
    /// Returns `MissingArtifact` before a context exists.
    pub fn public_context_bytes(&self) -> Result<Vec<u8>, GlycosecureError> {
        let context = self.context.as_ref().ok_or_else(|| {
            GlycosecureError::MissingArtifact("no encryption context yet".to_string())
        })?;
        Ok(self.engine.serialize_context(context, false)?)
    }

    /// Private context bytes for local persistence only.
    ///
    /// # Errors
    /// Returns `MissingArtifact` before a context exists.
    pub fn private_context_bytes(&self) -> Result<Vec<u8>, GlycosecureError> {
        let context = self.context.as_ref().ok_or_else(|| {
            GlycosecureError::MissingArtifact("no encryption context yet".to_string())
        })?;
        Ok(self.engine.serialize_context(context, true)?)
    }
}
