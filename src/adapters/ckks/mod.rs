//! CKKS adapter: Implementation of HomomorphicEngine.
//!
//! A compact RNS variant of the approximate-number scheme on top of
//! `fhe_math` rings:
//! - NTT-friendly primes generated per modulus chain (`q ≡ 1 mod 2N`)
//! - Ternary secret, centered binomial errors (σ ≈ 3.2), RLWE public key
//! - Coefficient packing, so an inner product is one plaintext product
//! - One rescale per multiplicative level
//!
//! # Security
//!
//! Secret keys are zeroized on drop and only ever serialized on request.
//! Every ciphertext read from bytes is shape-checked against the ring before
//! use, so malformed input surfaces as `CorruptCiphertext` instead of a panic.
//!
//! A linear score returns only its constant coefficient in usable form: every
//! other coefficient of the product is hidden under a fresh encryption of a
//! uniform polynomial, and the constant term is flooded with noise well below
//! the decoding precision. Without this the client could read `-w_i` off
//! coefficient `N - i` by encrypting a unit vector.
//!
//! # Lock Behavior
//!
//! Parsed public contexts are cached by fingerprint behind an `RwLock`. A
//! poisoned lock fails closed with `CryptoError::Computation`.

mod cipher;
mod keys;
mod params;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::domain::{
    CryptoError, EncryptedVector, EncryptionContext, SchemeParameters, SecretKeyMaterial,
};
use crate::ports::HomomorphicEngine;

use cipher::{Ciphertext, ModulusChain};
use keys::{PublicKey, SecretKey};

const ENVELOPE_VERSION: u32 = 1;

/// Parsed contexts kept in memory at once.
const CACHE_CAPACITY: usize = 8;

/// Serialized form of an [`EncryptionContext`].
#[derive(Serialize, Deserialize)]
struct ContextEnvelope {
    version: u32,
    parameters: SchemeParameters,
    moduli: Vec<u64>,
    public_key: Vec<u8>,
    secret_key: Option<Vec<u8>>,
}

/// Public half of a context, parsed and ready for arithmetic.
struct LoadedContext {
    fingerprint: String,
    chain: ModulusChain,
    public_key: PublicKey,
    scale: f64,
}

/// CKKS engine.
pub struct CkksEngine {
    cache: RwLock<HashMap<String, Arc<LoadedContext>>>,
}

impl CkksEngine {
    #[must_use]
    pub fn new() -> Self {
        tracing::info!("Initializing CkksEngine");
        Self {
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn load(&self, context: &EncryptionContext) -> Result<Arc<LoadedContext>, CryptoError> {
        {
            let cached = self
                .cache
                .read()
                .map_err(|_| CryptoError::Computation("context cache poisoned".to_string()))?;
            if let Some(loaded) = cached.get(context.fingerprint()) {
                return Ok(Arc::clone(loaded));
            }
        }

        let parameters = context.parameters();
        let chain = ModulusChain::new(parameters.ring_dimension, context.moduli())?;
        let key_ctx = chain.at(chain.key_level())?;
        let public_key = PublicKey::from_bytes(context.public_key(), key_ctx, chain.n())?;

        let loaded = Arc::new(LoadedContext {
            fingerprint: context.fingerprint().to_string(),
            chain,
            public_key,
            scale: parameters.global_scale,
        });

        let mut cache = self
            .cache
            .write()
            .map_err(|_| CryptoError::Computation("context cache poisoned".to_string()))?;
        if cache.len() >= CACHE_CAPACITY && !cache.contains_key(&loaded.fingerprint) {
            let evicted = cache.keys().next().cloned();
            if let Some(evicted) = evicted {
                cache.remove(&evicted);
                tracing::debug!("Evicted context {evicted} from engine cache");
            }
        }
        cache.insert(loaded.fingerprint.clone(), Arc::clone(&loaded));
        tracing::debug!(
            "Loaded context {} into engine cache ({} cached)",
            loaded.fingerprint,
            cache.len()
        );
        Ok(loaded)
    }

    fn secret_key(context: &EncryptionContext, n: usize) -> Result<SecretKey, CryptoError> {
        let material = context.secret_key().ok_or(CryptoError::MissingSecretKey)?;
        let sk: SecretKey = bincode::deserialize(material.as_bytes())
            .map_err(|e| CryptoError::InvalidContext(format!("secret key: {e}")))?;
        sk.validate(n)?;
        Ok(sk)
    }

    fn parse(loaded: &LoadedContext, input: &EncryptedVector) -> Result<Ciphertext, CryptoError> {
        if input.context_fingerprint != loaded.fingerprint {
            return Err(CryptoError::ContextMismatch {
                expected: loaded.fingerprint.clone(),
                found: input.context_fingerprint.clone(),
            });
        }
        let ct = Ciphertext::from_bytes(&input.ciphertext, &loaded.chain)?;
        if ct.len != input.len {
            return Err(CryptoError::CorruptCiphertext(format!(
                "header says {} values, ciphertext packs {}",
                input.len, ct.len
            )));
        }
        Ok(ct)
    }

    fn wrap(loaded: &LoadedContext, ct: &Ciphertext) -> Result<EncryptedVector, CryptoError> {
        Ok(EncryptedVector::new(
            ct.to_bytes()?,
            ct.len,
            loaded.fingerprint.clone(),
        ))
    }

    fn encrypt_loaded(
        loaded: &LoadedContext,
        values: &[f64],
    ) -> Result<EncryptedVector, CryptoError> {
        let mut rng = ChaCha20Rng::from_entropy();
        let ct = cipher::encrypt(
            &loaded.chain,
            &loaded.public_key,
            values,
            loaded.scale,
            &mut rng,
        )?;
        Self::wrap(loaded, &ct)
    }

    /// The moduli must be exactly the primes this engine derives for the
    /// declared chain.
    fn check_moduli(parameters: &SchemeParameters, moduli: &[u64]) -> Result<(), CryptoError> {
        let expected = cipher::generate_moduli(&parameters.modulus_chain, parameters.ring_dimension)?;
        if moduli.len() != expected.len() {
            return Err(CryptoError::InvalidContext(format!(
                "{} moduli for a chain of {}",
                moduli.len(),
                expected.len()
            )));
        }
        if let Some(i) = moduli.iter().zip(&expected).position(|(a, b)| a != b) {
            return Err(CryptoError::InvalidContext(format!(
                "modulus {i} does not match the {}-bit NTT prime for this chain",
                parameters.modulus_chain[i]
            )));
        }
        Ok(())
    }
}

impl Default for CkksEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl HomomorphicEngine for CkksEngine {
    fn create_context(&self, parameters: &SchemeParameters) -> Result<EncryptionContext, CryptoError> {
        tracing::info!(
            "Generating encryption context: N={}, chain={:?}, scale=2^{:.1}",
            parameters.ring_dimension,
            parameters.modulus_chain,
            parameters.scale_bits()
        );
        params::validate(parameters)?;

        let moduli = cipher::generate_moduli(&parameters.modulus_chain, parameters.ring_dimension)?;
        let chain = ModulusChain::new(parameters.ring_dimension, &moduli)?;
        let key_ctx = chain.at(chain.key_level())?;

        let mut rng = ChaCha20Rng::from_entropy();
        let (sk, pk) = keys::generate(key_ctx, chain.n(), &mut rng)?;

        let public_key = pk
            .to_bytes()
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        let secret_key =
            bincode::serialize(&sk).map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;

        let context = EncryptionContext::new(
            parameters.clone(),
            moduli,
            public_key,
            Some(SecretKeyMaterial::from_bytes(secret_key)),
        );
        tracing::info!(
            "Generated context {} (public key {} bytes)",
            context.fingerprint(),
            context.public_key().len()
        );
        Ok(context)
    }

    fn serialize_context(
        &self,
        context: &EncryptionContext,
        include_private: bool,
    ) -> Result<Vec<u8>, CryptoError> {
        let mut envelope = ContextEnvelope {
            version: ENVELOPE_VERSION,
            parameters: context.parameters().clone(),
            moduli: context.moduli().to_vec(),
            public_key: context.public_key().to_vec(),
            secret_key: if include_private {
                context.secret_key().map(|sk| sk.as_bytes().to_vec())
            } else {
                None
            },
        };
        let bytes = bincode::serialize(&envelope)
            .map_err(|e| CryptoError::Serialization(e.to_string()));
        if let Some(secret) = envelope.secret_key.as_mut() {
            zeroize::Zeroize::zeroize(secret);
        }
        bytes
    }

    fn deserialize_context(&self, bytes: &[u8]) -> Result<EncryptionContext, CryptoError> {
        let envelope: ContextEnvelope = bincode::deserialize(bytes)
            .map_err(|e| CryptoError::InvalidContext(e.to_string()))?;
        let secret = envelope.secret_key.map(Zeroizing::new);

        if envelope.version != ENVELOPE_VERSION {
            return Err(CryptoError::InvalidContext(format!(
                "unsupported context version {}",
                envelope.version
            )));
        }
        params::validate(&envelope.parameters)?;
        Self::check_moduli(&envelope.parameters, &envelope.moduli)?;

        let chain = ModulusChain::new(envelope.parameters.ring_dimension, &envelope.moduli)?;
        PublicKey::from_bytes(&envelope.public_key, chain.at(chain.key_level())?, chain.n())?;

        let secret_key = match secret {
            Some(bytes) => {
                let sk: SecretKey = bincode::deserialize(&bytes)
                    .map_err(|e| CryptoError::InvalidContext(format!("secret key: {e}")))?;
                sk.validate(chain.n())?;
                Some(SecretKeyMaterial::from_bytes(bytes.to_vec()))
            }
            None => None,
        };

        let context = EncryptionContext::new(
            envelope.parameters,
            envelope.moduli,
            envelope.public_key,
            secret_key,
        );
        tracing::debug!(
            "Deserialized {} context {}",
            if context.is_private() { "private" } else { "public" },
            context.fingerprint()
        );
        Ok(context)
    }

    fn encrypt(
        &self,
        values: &[f64],
        context: &EncryptionContext,
    ) -> Result<EncryptedVector, CryptoError> {
        let loaded = self.load(context)?;
        Self::encrypt_loaded(&loaded, values)
    }

    fn encrypt_batch(
        &self,
        rows: &[Vec<f64>],
        context: &EncryptionContext,
    ) -> Result<Vec<EncryptedVector>, CryptoError> {
        let loaded = self.load(context)?;
        tracing::debug!("Encrypting {} rows in parallel", rows.len());
        rows.par_iter()
            .map(|row| Self::encrypt_loaded(&loaded, row))
            .collect()
    }

    fn add(
        &self,
        left: &EncryptedVector,
        right: &EncryptedVector,
        context: &EncryptionContext,
    ) -> Result<EncryptedVector, CryptoError> {
        let loaded = self.load(context)?;
        let a = Self::parse(&loaded, left)?;
        let b = Self::parse(&loaded, right)?;
        let sum = cipher::add(&loaded.chain, &a, &b)?;
        Self::wrap(&loaded, &sum)
    }

    fn linear_score(
        &self,
        input: &EncryptedVector,
        weights: &[f64],
        intercept: f64,
        context: &EncryptionContext,
    ) -> Result<EncryptedVector, CryptoError> {
        let loaded = self.load(context)?;
        let chain = &loaded.chain;
        let pk = &loaded.public_key;
        let ct = Self::parse(&loaded, input)?;

        if ct.len != weights.len() {
            return Err(CryptoError::DimensionMismatch {
                expected: weights.len(),
                found: ct.len,
            });
        }
        let level = ct.level();
        if level < 2 {
            return Err(CryptoError::LevelExhausted);
        }

        let plain = cipher::encode_reversed(chain, weights, loaded.scale, level)?;
        let mut product = cipher::multiply_plain(&ct, &plain, loaded.scale)?;
        product.len = 1;

        // The intercept is encrypted near the input scale and lifted by an
        // integer constant, so it lands on the product's scale.
        let mut rng = ChaCha20Rng::from_entropy();
        let lift = loaded.scale.round();
        let bias_scale = product.scale / lift;
        let bias_plain = cipher::encode(chain, &[intercept], bias_scale, level)?;
        let bias = cipher::encrypt_encoded(chain, pk, &bias_plain, bias_scale, 1, &mut rng)?;
        let lift_plain = cipher::encode(chain, &[1.0], lift, level)?;
        let bias = cipher::multiply_plain(&bias, &lift_plain, lift)?;

        let mask_plain = cipher::uniform_mask(chain, level, &mut rng)?;
        let mask = cipher::encrypt_encoded(chain, pk, &mask_plain, product.scale, 1, &mut rng)?;

        let mut score = cipher::add(chain, &cipher::add(chain, &product, &bias)?, &mask)?;
        cipher::rescale(&mut score)?;
        cipher::flood(chain, &mut score, &mut rng)?;
        tracing::trace!("Evaluated linear score at level {}", score.level());
        Self::wrap(&loaded, &score)
    }

    fn decrypt(
        &self,
        input: &EncryptedVector,
        context: &EncryptionContext,
    ) -> Result<Vec<f64>, CryptoError> {
        if !context.is_private() {
            return Err(CryptoError::MissingSecretKey);
        }
        let loaded = self.load(context)?;
        let sk = Self::secret_key(context, loaded.chain.n())?;
        let ct = Self::parse(&loaded, input)?;
        cipher::decrypt(&loaded.chain, &sk, &ct)
    }
}
