//! Homomorphic engine port: Trait for approximate homomorphic encryption.
//!
//! This trait keeps the scheme implementation out of the application logic.
//! Everything crossing it is an opaque domain type.

use crate::domain::{CryptoError, EncryptedVector, EncryptionContext, SchemeParameters};

/// Trait for homomorphic operations.
///
/// Implementations provide:
/// - Context (key) generation with a CSPRNG
/// - Context serialization with or without the secret key
/// - Encryption of real-valued vectors under a public context
/// - Blind evaluation of a linear model
/// - Decryption under the private context
pub trait HomomorphicEngine: Send + Sync {
    /// Create a fresh private context for the given parameters.
    ///
    /// # Errors
    /// Returns `CryptoError::Config` if the parameters cannot support one
    /// multiplicative level at the requested scale.
    fn create_context(&self, parameters: &SchemeParameters) -> Result<EncryptionContext, CryptoError>;

    /// Serialize a context. The secret key is written only when
    /// `include_private` is set and the context has one.
    ///
    /// # Errors
    /// Returns `CryptoError::Serialization` if encoding fails.
    fn serialize_context(
        &self,
        context: &EncryptionContext,
        include_private: bool,
    ) -> Result<Vec<u8>, CryptoError>;

    /// Deserialize a context; the result is public if no secret key was written.
    ///
    /// # Errors
    /// Returns `CryptoError::InvalidContext` if the bytes do not describe a
    /// consistent context.
    fn deserialize_context(&self, bytes: &[u8]) -> Result<EncryptionContext, CryptoError>;

    /// Encrypt a vector of reals (one ciphertext, values packed).
    ///
    /// # Errors
    /// Returns `CryptoError::Encryption` for empty, oversized or non-finite input.
    fn encrypt(
        &self,
        values: &[f64],
        context: &EncryptionContext,
    ) -> Result<EncryptedVector, CryptoError>;

    /// Encrypt many rows; output order matches input order.
    ///
    /// # Errors
    /// Fails on the first row that cannot be encrypted.
    fn encrypt_batch(
        &self,
        rows: &[Vec<f64>],
        context: &EncryptionContext,
    ) -> Result<Vec<EncryptedVector>, CryptoError> {
        rows.iter().map(|row| self.encrypt(row, context)).collect()
    }

    /// Homomorphic slot-wise addition.
    ///
    /// # Errors
    /// Returns `CryptoError::ContextMismatch` or `CryptoError::ScaleMismatch`
    /// for incompatible operands.
    fn add(
        &self,
        left: &EncryptedVector,
        right: &EncryptedVector,
        context: &EncryptionContext,
    ) -> Result<EncryptedVector, CryptoError>;

    /// Evaluate `dot(x, weights) + intercept` on an encrypted row.
    ///
    /// Weights stay in plaintext; the intercept is encrypted under `context`.
    /// The result is an encrypted scalar.
    ///
    /// # Errors
    /// Returns `CryptoError::DimensionMismatch` if the row width differs from
    /// the weights, `CryptoError::CorruptCiphertext` if the row cannot be
    /// parsed, and `CryptoError::LevelExhausted` if no level is left.
    fn linear_score(
        &self,
        input: &EncryptedVector,
        weights: &[f64],
        intercept: f64,
        context: &EncryptionContext,
    ) -> Result<EncryptedVector, CryptoError>;

    /// Decrypt to `input.len` reals.
    ///
    /// # Errors
    /// Returns `CryptoError::MissingSecretKey` for a public context and
    /// `CryptoError::CorruptCiphertext` for unreadable input.
    fn decrypt(
        &self,
        input: &EncryptedVector,
        context: &EncryptionContext,
    ) -> Result<Vec<f64>, CryptoError>;
}
