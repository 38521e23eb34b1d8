//! Bincode wire format for batches and published parameters.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::domain::{EncryptedBatch, PublishedParams};

/// Errors raised while encoding or decoding wire payloads.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("Failed to encode payload: {0}")]
    Encode(String),

    #[error("Failed to decode payload: {0}")]
    Decode(String),

    #[error("Unsupported batch version {0}")]
    UnsupportedVersion(u32),

    #[error("Empty payload")]
    Empty,
}

/// # Errors
/// Returns `WireError::Encode` if serialization fails.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, WireError> {
    bincode::serialize(value).map_err(|e| WireError::Encode(e.to_string()))
}

/// # Errors
/// Returns `WireError::Decode` for bytes that do not describe a `T`.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, WireError> {
    if bytes.is_empty() {
        return Err(WireError::Empty);
    }
    bincode::deserialize(bytes).map_err(|e| WireError::Decode(e.to_string()))
}

/// Decode a batch and check its version.
///
/// # Errors
/// Returns `WireError::UnsupportedVersion` for a batch from another protocol
/// version.
pub fn decode_batch(bytes: &[u8]) -> Result<EncryptedBatch, WireError> {
    let batch: EncryptedBatch = decode(bytes)?;
    if batch.version != EncryptedBatch::VERSION {
        return Err(WireError::UnsupportedVersion(batch.version));
    }
    Ok(batch)
}

/// # Errors
/// Returns `WireError::Decode` for malformed bytes.
pub fn decode_params(bytes: &[u8]) -> Result<PublishedParams, WireError> {
    decode(bytes)
}
