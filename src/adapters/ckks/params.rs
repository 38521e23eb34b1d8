//! Scheme parameter validation.

use crate::domain::{CryptoError, SchemeParameters};

pub(crate) const MIN_RING_DIMENSION: usize = 256;
pub(crate) const MAX_RING_DIMENSION: usize = 32768;
pub(crate) const MIN_PRIME_BITS: u32 = 20;
pub(crate) const MAX_PRIME_BITS: u32 = 60;

/// Multiplicative depth of a linear score (one plaintext product).
pub(crate) const INFERENCE_DEPTH: usize = 1;

/// Bits reserved above the scale for the integer part of encoded values.
pub(crate) const INTEGER_PRECISION_BITS: f64 = 10.0;

/// Largest total modulus (in bits) for 128-bit security with a ternary secret,
/// per the homomorphic encryption standard.
fn max_secure_modulus_bits(ring_dimension: usize) -> u32 {
    match ring_dimension {
        1024 => 27,
        2048 => 54,
        4096 => 109,
        8192 => 218,
        16384 => 438,
        32768 => 881,
        _ => 0,
    }
}

/// Check that a parameter set can evaluate one linear score and decode it.
///
/// # Errors
/// Returns `CryptoError::Config` describing the first violated requirement.
pub(crate) fn validate(params: &SchemeParameters) -> Result<(), CryptoError> {
    let n = params.ring_dimension;
    if !n.is_power_of_two() || !(MIN_RING_DIMENSION..=MAX_RING_DIMENSION).contains(&n) {
        return Err(CryptoError::Config(format!(
            "ring dimension must be a power of two in [{MIN_RING_DIMENSION}, {MAX_RING_DIMENSION}], got {n}"
        )));
    }

    let chain = &params.modulus_chain;
    if chain.len() < INFERENCE_DEPTH + 2 {
        return Err(CryptoError::Config(format!(
            "modulus chain needs at least {} primes (base, {} rescale, special), got {}",
            INFERENCE_DEPTH + 2,
            INFERENCE_DEPTH,
            chain.len()
        )));
    }
    if let Some(bits) = chain
        .iter()
        .find(|b| !(MIN_PRIME_BITS..=MAX_PRIME_BITS).contains(*b))
    {
        return Err(CryptoError::Config(format!(
            "prime bit size {bits} outside [{MIN_PRIME_BITS}, {MAX_PRIME_BITS}]"
        )));
    }
    let min_bits = chain.iter().copied().min().unwrap_or(MIN_PRIME_BITS);
    if (2 * n as u64) >= (1u64 << (min_bits - 1)) {
        return Err(CryptoError::Config(format!(
            "{min_bits}-bit primes are too small for ring dimension {n}"
        )));
    }

    let scale = params.global_scale;
    if !scale.is_finite() || scale <= 1.0 {
        return Err(CryptoError::Config(format!(
            "global scale must be finite and > 1, got {scale}"
        )));
    }
    let scale_bits = scale.log2();

    let data_primes = &chain[..params.data_levels()];
    let base_bits = f64::from(data_primes[0]);
    let data_bits: f64 = data_primes.iter().map(|&b| f64::from(b)).sum();

    if scale_bits + INTEGER_PRECISION_BITS > base_bits {
        return Err(CryptoError::Config(format!(
            "base prime ({base_bits} bits) cannot decode values at scale 2^{scale_bits:.1}"
        )));
    }
    if 2.0 * scale_bits + INTEGER_PRECISION_BITS > data_bits {
        return Err(CryptoError::Config(format!(
            "data modulus ({data_bits} bits) too small for a product at scale 2^{:.1}",
            2.0 * scale_bits
        )));
    }
    // After one rescale the scale is scale^2 / q_top.
    let top_bits = f64::from(data_primes[data_primes.len() - 1]);
    let rescaled_bits = 2.0 * scale_bits - top_bits;
    if rescaled_bits + INTEGER_PRECISION_BITS > base_bits {
        return Err(CryptoError::Config(format!(
            "rescaling by a {top_bits}-bit prime leaves scale 2^{rescaled_bits:.1}, too large for the base prime"
        )));
    }
    if rescaled_bits < 1.0 {
        return Err(CryptoError::Config(format!(
            "rescale prime ({top_bits} bits) is larger than the squared scale"
        )));
    }

    let total_bits: u32 = chain.iter().sum();
    let secure = max_secure_modulus_bits(n);
    if total_bits > secure {
        tracing::warn!(
            "Scheme parameters exceed the 128-bit security bound: N={n}, log Q={total_bits} (max {secure})"
        );
    }

    Ok(())
}
