//! Cryptographic types for approximate homomorphic encryption.
//!
//! These are opaque, serializable wrappers; the arithmetic lives behind the
//! [`HomomorphicEngine`](crate::ports::HomomorphicEngine) port.
//!
//! # Memory Security
//!
//! Secret key material implements `Zeroize` and `ZeroizeOnDrop` so it is
//! erased when dropped, and no `Debug` implementation prints key bytes.

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Error type for cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Invalid scheme parameters: {0}")]
    Config(String),

    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Homomorphic computation failed: {0}")]
    Computation(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Invalid context: {0}")]
    InvalidContext(String),

    #[error("Corrupt ciphertext: {0}")]
    CorruptCiphertext(String),

    #[error("Context mismatch: expected fingerprint {expected}, found {found}")]
    ContextMismatch { expected: String, found: String },

    #[error("Dimension mismatch: expected {expected} values, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("Scale mismatch: {left} vs {right}")]
    ScaleMismatch { left: f64, right: f64 },

    #[error("Modulus chain exhausted: no level left to rescale")]
    LevelExhausted,

    #[error("Context has no secret key; decryption requires the private context")]
    MissingSecretKey,
}

/// Parameters of the approximate-arithmetic scheme.
///
/// The last entry of `modulus_chain` is the special (key-level) modulus. The
/// remaining entries are data moduli; the first one is the base modulus that
/// decoding happens under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemeParameters {
    /// Polynomial ring dimension N (power of two).
    pub ring_dimension: usize,

    /// Bit sizes of the RNS primes, base modulus first.
    pub modulus_chain: Vec<u32>,

    /// Fixed-point scale applied to plaintext values before encoding.
    pub global_scale: f64,
}

impl Default for SchemeParameters {
    fn default() -> Self {
        Self {
            ring_dimension: 8192,
            modulus_chain: vec![60, 40, 40, 60],
            global_scale: 2f64.powi(40),
        }
    }
}

impl SchemeParameters {
    /// `log2(global_scale)`.
    #[must_use]
    pub fn scale_bits(&self) -> f64 {
        self.global_scale.log2()
    }

    /// Number of data moduli (chain length minus the special modulus).
    #[must_use]
    pub fn data_levels(&self) -> usize {
        self.modulus_chain.len().saturating_sub(1)
    }

    /// Maximum number of values a single ciphertext can pack.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.ring_dimension
    }
}

/// Secret key bytes (engine-specific encoding).
///
/// This MUST remain on the client and is never transmitted.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretKeyMaterial {
    inner: Vec<u8>,
}

impl SecretKeyMaterial {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { inner: bytes }
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.inner
    }
}

impl std::fmt::Debug for SecretKeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretKeyMaterial")
            .field("size_bytes", &self.inner.len())
            .finish()
    }
}

/// A session's encryption context.
///
/// Holds the scheme parameters, the concrete RNS primes, public key material
/// and, on the client only, the secret key. A context without a secret key
/// can encrypt and evaluate but never decrypt.
///
/// The fingerprint identifies the parameter set together with the public key,
/// so ciphertexts made under a regenerated context are detectably stale.
#[derive(Clone)]
pub struct EncryptionContext {
    parameters: SchemeParameters,
    moduli: Vec<u64>,
    public_key: Vec<u8>,
    secret_key: Option<SecretKeyMaterial>,
    fingerprint: String,
}

impl EncryptionContext {
    pub fn new(
        parameters: SchemeParameters,
        moduli: Vec<u64>,
        public_key: Vec<u8>,
        secret_key: Option<SecretKeyMaterial>,
    ) -> Self {
        let fingerprint = context_fingerprint(&parameters, &moduli, &public_key);
        Self {
            parameters,
            moduli,
            public_key,
            secret_key,
            fingerprint,
        }
    }

    /// Strip the secret key, keeping everything needed to encrypt and evaluate.
    #[must_use]
    pub fn derive_public(&self) -> Self {
        Self {
            parameters: self.parameters.clone(),
            moduli: self.moduli.clone(),
            public_key: self.public_key.clone(),
            secret_key: None,
            fingerprint: self.fingerprint.clone(),
        }
    }

    #[must_use]
    pub fn is_private(&self) -> bool {
        self.secret_key.is_some()
    }

    #[must_use]
    pub fn parameters(&self) -> &SchemeParameters {
        &self.parameters
    }

    #[must_use]
    pub fn moduli(&self) -> &[u64] {
        &self.moduli
    }

    #[must_use]
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    #[must_use]
    pub fn secret_key(&self) -> Option<&SecretKeyMaterial> {
        self.secret_key.as_ref()
    }

    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Fail unless `found` names this context.
    ///
    /// # Errors
    /// Returns `CryptoError::ContextMismatch` on a different fingerprint.
    pub fn ensure_fingerprint(&self, found: &str) -> Result<(), CryptoError> {
        if self.fingerprint == found {
            Ok(())
        } else {
            Err(CryptoError::ContextMismatch {
                expected: self.fingerprint.clone(),
                found: found.to_string(),
            })
        }
    }
}

impl std::fmt::Debug for EncryptionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionContext")
            .field("fingerprint", &self.fingerprint)
            .field("ring_dimension", &self.parameters.ring_dimension)
            .field("modulus_chain", &self.parameters.modulus_chain)
            .field("public_key_bytes", &self.public_key.len())
            .field("private", &self.is_private())
            .finish()
    }
}

/// One encrypted vector: a feature row on the way in, a score on the way out.
#[derive(Clone, Serialize, Deserialize)]
pub struct EncryptedVector {
    /// Serialized ciphertext (engine-specific encoding)
    pub ciphertext: Vec<u8>,

    /// Number of packed values
    pub len: usize,

    /// Fingerprint of the context used for encryption
    pub context_fingerprint: String,
}

impl EncryptedVector {
    pub fn new(ciphertext: Vec<u8>, len: usize, context_fingerprint: String) -> Self {
        Self {
            ciphertext,
            len,
            context_fingerprint,
        }
    }

    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.ciphertext.len()
    }
}

impl std::fmt::Debug for EncryptedVector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedVector")
            .field("len", &self.len)
            .field("size_bytes", &self.ciphertext.len())
            .field("context_fingerprint", &self.context_fingerprint)
            .finish()
    }
}

/// Position in a batch: either a ciphertext or a marker for an entry that
/// could not be processed.
#[derive(Clone, Serialize, Deserialize)]
pub enum BatchEntry {
    Ciphertext(EncryptedVector),
    Skipped { reason: String },
}

impl BatchEntry {
    #[must_use]
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }
}

impl std::fmt::Debug for BatchEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ciphertext(vector) => f.debug_tuple("Ciphertext").field(vector).finish(),
            Self::Skipped { reason } => f.debug_struct("Skipped").field("reason", reason).finish(),
        }
    }
}

/// Ordered batch of encrypted vectors exchanged between client and server.
///
/// Entry `i` of a response always corresponds to entry `i` of the request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedBatch {
    pub version: u32,

    /// Fingerprint of the context every entry was encrypted under
    pub context_fingerprint: String,

    /// Fingerprint of the model bundle the client preprocessed with
    pub model_fingerprint: Option<String>,

    pub entries: Vec<BatchEntry>,
}

impl EncryptedBatch {
    pub const VERSION: u32 = 1;

    pub fn new(
        context_fingerprint: String,
        model_fingerprint: Option<String>,
        entries: Vec<BatchEntry>,
    ) -> Self {
        Self {
            version: Self::VERSION,
            context_fingerprint,
            model_fingerprint,
            entries,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn skipped(&self) -> usize {
        self.entries.iter().filter(|e| e.is_skipped()).count()
    }

    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.entries
            .iter()
            .map(|e| match e {
                BatchEntry::Ciphertext(vector) => vector.size_bytes(),
                BatchEntry::Skipped { .. } => 0,
            })
            .sum()
    }
}

fn context_fingerprint(parameters: &SchemeParameters, moduli: &[u64], public_key: &[u8]) -> String {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update((parameters.ring_dimension as u64).to_le_bytes());
    for bits in &parameters.modulus_chain {
        hasher.update(bits.to_le_bytes());
    }
    hasher.update(parameters.global_scale.to_le_bytes());
    for q in moduli {
        hasher.update(q.to_le_bytes());
    }
    hasher.update(public_key);
    short_hex(&hasher.finalize())
}

/// Compute a fingerprint for identification using SHA-256.
///
/// Only the first 8 bytes (64 bits) of the digest are kept.
pub fn compute_fingerprint(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(bytes);
    short_hex(&hasher.finalize())
}

fn short_hex(digest: &[u8]) -> String {
    digest[..8]
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join("")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_context(secret: Option<Vec<u8>>) -> EncryptionContext {
        EncryptionContext::new(
            SchemeParameters::default(),
            vec![97, 193, 257, 769],
            vec![9u8; 64],
            secret.map(SecretKeyMaterial::from_bytes),
        )
    }

    #[test]
    fn test_secret_key_debug_no_leak() {
        let key = SecretKeyMaterial::from_bytes(vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
        let debug_output = format!("{key:?}");

        assert!(!debug_output.contains("1, 2, 3"));
        assert!(debug_output.contains("size_bytes"));
    }

    #[test]
    fn test_derive_public_strips_secret() {
        let private = sample_context(Some(vec![1, 0, 1]));
        assert!(private.is_private());

        let public = private.derive_public();
        assert!(!public.is_private());
        assert_eq!(public.fingerprint(), private.fingerprint());
        assert_eq!(public.public_key(), private.public_key());
    }

    #[test]
    fn test_fingerprint_covers_public_key() {
        let a = sample_context(None);
        let b = EncryptionContext::new(
            SchemeParameters::default(),
            vec![97, 193, 257, 769],
            vec![8u8; 64],
            None,
        );
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 16);
    }

    #[test]
    fn test_ensure_fingerprint() {
        let ctx = sample_context(None);
        assert!(ctx.ensure_fingerprint(ctx.fingerprint()).is_ok());
        assert!(matches!(
            ctx.ensure_fingerprint("0000000000000000"),
            Err(CryptoError::ContextMismatch { .. })
        ));
    }

    #[test]
    fn test_fingerprint_uses_hash() {
        let fp = compute_fingerprint(&[0xde, 0xad, 0xbe, 0xef]);
        assert_ne!(fp, "deadbeef");
        assert_eq!(fp.len(), 16);
        assert_eq!(fp, compute_fingerprint(&[0xde, 0xad, 0xbe, 0xef]));
    }

    #[test]
    fn test_batch_counts() {
        let batch = EncryptedBatch::new(
            "abc".to_string(),
            None,
            vec![
                BatchEntry::Ciphertext(EncryptedVector::new(vec![0u8; 32], 8, "abc".to_string())),
                BatchEntry::Skipped {
                    reason: "corrupt".to_string(),
                },
            ],
        );
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.skipped(), 1);
        assert_eq!(batch.size_bytes(), 32);
        assert!(!format!("{batch:?}").contains("[0, 0"));
    }
}
