//! RLWE key generation.

use std::sync::Arc;

use fhe_math::rq::traits::TryConvertFrom;
use fhe_math::rq::{Context, Poly, Representation};
use rand::{CryptoRng, Rng, RngCore};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use super::cipher::{limbs_from_wire, limbs_to_wire, math_error};
use crate::domain::CryptoError;

/// Variance of the centered binomial error distribution (σ ≈ 3.2).
pub(crate) const ERROR_VARIANCE: usize = 10;

/// `n` coefficients drawn uniformly from `{-1, 0, 1}`.
pub(crate) fn sample_ternary<R: Rng>(n: usize, rng: &mut R) -> Zeroizing<Vec<i64>> {
    Zeroizing::new((0..n).map(|_| rng.gen_range(-1i64..=1)).collect())
}

/// Signed coefficients lifted into `ctx`, in NTT form.
pub(crate) fn signed_poly(coeffs: &[i64], ctx: &Arc<Context>) -> Result<Poly, CryptoError> {
    let mut poly = Poly::try_convert_from(coeffs, ctx, false, Representation::PowerBasis)
        .map_err(math_error)?;
    poly.change_representation(Representation::Ntt);
    Ok(poly)
}

/// Ternary secret `s`, kept in coefficient form.
#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub(crate) struct SecretKey {
    coeffs: Vec<i64>,
}

impl SecretKey {
    /// # Errors
    /// Returns `CryptoError::InvalidContext` unless the key is ternary of
    /// length `n`.
    pub(crate) fn validate(&self, n: usize) -> Result<(), CryptoError> {
        if self.coeffs.len() != n {
            return Err(CryptoError::InvalidContext(format!(
                "secret key has {} coefficients, expected {n}",
                self.coeffs.len()
            )));
        }
        if self.coeffs.iter().any(|c| !(-1..=1).contains(c)) {
            return Err(CryptoError::InvalidContext(
                "secret key is not ternary".to_string(),
            ));
        }
        Ok(())
    }

    /// `s` in NTT form over the moduli of `ctx`.
    pub(crate) fn to_poly(&self, ctx: &Arc<Context>) -> Result<Poly, CryptoError> {
        signed_poly(&self.coeffs, ctx)
    }
}

/// Public key `(b, a)` with `b = -a·s + e`, over the full chain.
#[derive(Clone)]
pub(crate) struct PublicKey {
    pub(crate) b: Poly,
    pub(crate) a: Poly,
}

#[derive(Serialize, Deserialize)]
struct WirePublicKey {
    b: Vec<u64>,
    a: Vec<u64>,
}

impl PublicKey {
    pub(crate) fn to_bytes(&self) -> Result<Vec<u8>, CryptoError> {
        let wire = WirePublicKey {
            b: limbs_to_wire(&self.b),
            a: limbs_to_wire(&self.a),
        };
        bincode::serialize(&wire).map_err(|e| CryptoError::Serialization(e.to_string()))
    }

    /// Parse a public key over the key-level context `ctx` of degree `n`.
    ///
    /// # Errors
    /// Returns `CryptoError::InvalidContext` if either polynomial is malformed.
    pub(crate) fn from_bytes(
        bytes: &[u8],
        ctx: &Arc<Context>,
        n: usize,
    ) -> Result<Self, CryptoError> {
        let wire: WirePublicKey = bincode::deserialize(bytes)
            .map_err(|e| CryptoError::InvalidContext(format!("public key: {e}")))?;
        let parse = |limbs: Vec<u64>| {
            limbs_from_wire(limbs, ctx, n)
                .map_err(|e| CryptoError::InvalidContext(format!("public key: {e}")))
        };
        Ok(Self {
            b: parse(wire.b)?,
            a: parse(wire.a)?,
        })
    }
}

/// Sample a fresh key pair over the key-level context `ctx` of degree `n`.
///
/// # Errors
/// Returns `CryptoError::KeyGeneration` if error sampling fails.
pub(crate) fn generate<R: RngCore + CryptoRng>(
    ctx: &Arc<Context>,
    n: usize,
    rng: &mut R,
) -> Result<(SecretKey, PublicKey), CryptoError> {
    let secret = SecretKey {
        coeffs: sample_ternary(n, rng).to_vec(),
    };
    let s = Zeroizing::new(secret.to_poly(ctx)?);
    let a = Poly::random(ctx, Representation::Ntt, rng);
    let e = Zeroizing::new(
        Poly::small(ctx, Representation::Ntt, ERROR_VARIANCE, rng)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?,
    );

    let mut b = Poly::zero(ctx, Representation::Ntt);
    b -= &(&a * &*s);
    b += &*e;
    Ok((secret, PublicKey { b, a }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::ckks::cipher::{center, generate_moduli};
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    #[test]
    fn test_public_key_hides_small_error() {
        let moduli = generate_moduli(&[40, 30, 40], 256).expect("primes");
        let ctx = Arc::new(Context::new(&moduli, 256).expect("context"));
        let mut rng = ChaCha20Rng::seed_from_u64(3);
        let (sk, pk) = generate(&ctx, 256, &mut rng).expect("keys");
        assert!(sk.validate(256).is_ok());

        // b + a·s = e must be small in every limb
        let s = sk.to_poly(&ctx).expect("secret poly");
        let mut e = &pk.b + &(&pk.a * &s);
        e.change_representation(Representation::PowerBasis);
        for (row, &q) in e.coefficients().outer_iter().zip(ctx.moduli()) {
            assert!(row.iter().all(|&c| center(c, q).abs() < 40));
        }
    }

    #[test]
    fn test_public_key_bytes_roundtrip() {
        let moduli = generate_moduli(&[40, 30, 40], 256).expect("primes");
        let ctx = Arc::new(Context::new(&moduli, 256).expect("context"));
        let mut rng = ChaCha20Rng::seed_from_u64(5);
        let (_, pk) = generate(&ctx, 256, &mut rng).expect("keys");

        let bytes = pk.to_bytes().expect("serialize");
        let parsed = PublicKey::from_bytes(&bytes, &ctx, 256).expect("parse");
        assert_eq!(parsed.to_bytes().expect("serialize"), bytes);

        let narrow = Arc::new(Context::new(&moduli[..2], 256).expect("context"));
        assert!(PublicKey::from_bytes(&bytes, &narrow, 256).is_err());
    }

    #[test]
    fn test_secret_validation() {
        let bad = SecretKey {
            coeffs: vec![0, 2, -1],
        };
        assert!(bad.validate(3).is_err());
        let short = SecretKey { coeffs: vec![0; 4] };
        assert!(short.validate(8).is_err());
    }
}
