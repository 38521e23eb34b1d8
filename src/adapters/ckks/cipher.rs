//! Ciphertext operations: coefficient encoding, public-key encryption,
//! plaintext products, rescaling and decryption.
//!
//! Values are packed into polynomial coefficients (`v_i` at `X^i`), which
//! makes an inner product with a plaintext vector a single polynomial product
//! and needs no rotation keys. Ring arithmetic (RNS polynomials, NTT,
//! rescaling by the last prime) is `fhe_math`'s; this module only tracks
//! levels, scales and the packing layout.

use std::collections::HashMap;
use std::sync::Arc;

use fhe_math::rq::traits::TryConvertFrom;
use fhe_math::rq::{Context, Poly, Representation};
use fhe_math::zq::primes::generate_prime;
use rand::{CryptoRng, Rng, RngCore};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use super::keys::{sample_ternary, signed_poly, PublicKey, SecretKey, ERROR_VARIANCE};
use crate::domain::CryptoError;

/// Largest encoded coefficient magnitude accepted (fits an `i64`).
const MAX_ENCODED_BITS: f64 = 62.0;

/// Relative tolerance when comparing scales of two operands.
const SCALE_TOLERANCE: f64 = 1e-9;

/// Flooding noise standard deviation is the output scale divided by 2^this.
const FLOODING_HEADROOM_BITS: i32 = 16;

pub(crate) fn math_error(e: fhe_math::Error) -> CryptoError {
    CryptoError::Computation(e.to_string())
}

/// Representative of `c mod q` in `(-q/2, q/2]`.
pub(crate) fn center(c: u64, q: u64) -> i64 {
    if c > q / 2 {
        -((q - c) as i64)
    } else {
        c as i64
    }
}

/// One NTT-friendly prime (`q ≡ 1 mod 2N`) per entry of `chain`, distinct
/// even when bit sizes repeat. Deterministic for a given chain and `n`.
pub(crate) fn generate_moduli(chain: &[u32], n: usize) -> Result<Vec<u64>, CryptoError> {
    let mut ceilings: HashMap<u32, u64> = HashMap::new();
    chain
        .iter()
        .map(|&bits| {
            let ceiling = ceilings.get(&bits).copied().unwrap_or(1u64 << bits);
            let q = generate_prime(bits as usize, 2 * n as u64, ceiling).ok_or_else(|| {
                CryptoError::Config(format!("no {bits}-bit NTT prime left for N={n}"))
            })?;
            ceilings.insert(bits, q);
            Ok(q)
        })
        .collect()
}

/// The RNS contexts of a modulus chain, one per level.
///
/// Level `l` keeps the first `l` primes. The top level (all primes, special
/// one included) is where keys live; ciphertexts start one below it.
pub(crate) struct ModulusChain {
    n: usize,
    contexts: Vec<Arc<Context>>,
}

impl ModulusChain {
    pub(crate) fn new(n: usize, moduli: &[u64]) -> Result<Self, CryptoError> {
        let contexts = (1..=moduli.len())
            .map(|level| Context::new(&moduli[..level], n).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| CryptoError::InvalidContext(format!("modulus chain: {e}")))?;
        if contexts.is_empty() {
            return Err(CryptoError::InvalidContext("empty modulus chain".to_string()));
        }
        Ok(Self { n, contexts })
    }

    pub(crate) fn n(&self) -> usize {
        self.n
    }

    /// Level of the keys (every prime).
    pub(crate) fn key_level(&self) -> usize {
        self.contexts.len()
    }

    /// Level of a fresh ciphertext (special prime divided out).
    pub(crate) fn data_level(&self) -> usize {
        self.contexts.len() - 1
    }

    pub(crate) fn at(&self, level: usize) -> Result<&Arc<Context>, CryptoError> {
        level
            .checked_sub(1)
            .and_then(|i| self.contexts.get(i))
            .ok_or_else(|| CryptoError::Computation(format!("no context at level {level}")))
    }
}

/// Residues of `poly` as stored, limb after limb.
pub(crate) fn limbs_to_wire(poly: &Poly) -> Vec<u64> {
    poly.coefficients().iter().copied().collect()
}

/// Rebuild an NTT-form polynomial from untrusted limbs.
pub(crate) fn limbs_from_wire(
    limbs: Vec<u64>,
    ctx: &Arc<Context>,
    n: usize,
) -> Result<Poly, CryptoError> {
    let moduli = ctx.moduli();
    if limbs.len() != moduli.len() * n {
        return Err(CryptoError::CorruptCiphertext(format!(
            "{} residues for {} primes of degree {n}",
            limbs.len(),
            moduli.len()
        )));
    }
    for (i, (limb, &q)) in limbs.chunks(n).zip(moduli).enumerate() {
        if limb.iter().any(|&c| c >= q) {
            return Err(CryptoError::CorruptCiphertext(format!(
                "limb {i} has a residue outside [0, q)"
            )));
        }
    }
    Poly::try_convert_from(limbs, ctx, false, Representation::Ntt)
        .map_err(|e| CryptoError::CorruptCiphertext(e.to_string()))
}

/// Drop the primes above `ctx` without scaling the value.
fn drop_to(poly: &Poly, ctx: &Arc<Context>, n: usize) -> Result<Poly, CryptoError> {
    let keep = ctx.moduli().len();
    if poly.ctx().moduli().len() == keep {
        return Ok(poly.clone());
    }
    let mut limbs = limbs_to_wire(poly);
    limbs.truncate(keep * n);
    Poly::try_convert_from(limbs, ctx, false, Representation::Ntt).map_err(math_error)
}

/// An RLWE ciphertext `(c0, c1)` with `c0 + c1·s ≈ scale · m`, in NTT form.
#[derive(Clone)]
pub(crate) struct Ciphertext {
    pub(crate) c0: Poly,
    pub(crate) c1: Poly,
    pub(crate) scale: f64,
    pub(crate) len: usize,
}

#[derive(Serialize, Deserialize)]
struct WireCiphertext {
    level: usize,
    c0: Vec<u64>,
    c1: Vec<u64>,
    scale: f64,
    len: usize,
}

impl Ciphertext {
    pub(crate) fn level(&self) -> usize {
        self.c0.ctx().moduli().len()
    }

    pub(crate) fn to_bytes(&self) -> Result<Vec<u8>, CryptoError> {
        let wire = WireCiphertext {
            level: self.level(),
            c0: limbs_to_wire(&self.c0),
            c1: limbs_to_wire(&self.c1),
            scale: self.scale,
            len: self.len,
        };
        bincode::serialize(&wire).map_err(|e| CryptoError::Serialization(e.to_string()))
    }

    /// Parse and shape-check a ciphertext read from untrusted bytes.
    pub(crate) fn from_bytes(bytes: &[u8], chain: &ModulusChain) -> Result<Self, CryptoError> {
        let wire: WireCiphertext = bincode::deserialize(bytes)
            .map_err(|e| CryptoError::CorruptCiphertext(e.to_string()))?;
        if wire.level == 0 || wire.level > chain.data_level() {
            return Err(CryptoError::CorruptCiphertext(format!(
                "level {} outside [1, {}]",
                wire.level,
                chain.data_level()
            )));
        }
        if wire.len == 0 || wire.len > chain.n() {
            return Err(CryptoError::CorruptCiphertext(format!(
                "packs {} values in a ring of dimension {}",
                wire.len,
                chain.n()
            )));
        }
        if !wire.scale.is_finite() || wire.scale <= 0.0 {
            return Err(CryptoError::CorruptCiphertext(format!(
                "invalid scale {}",
                wire.scale
            )));
        }
        let ctx = chain.at(wire.level)?;
        Ok(Self {
            c0: limbs_from_wire(wire.c0, ctx, chain.n())?,
            c1: limbs_from_wire(wire.c1, ctx, chain.n())?,
            scale: wire.scale,
            len: wire.len,
        })
    }
}

fn scaled_coefficient(value: f64, scale: f64) -> Result<i64, CryptoError> {
    let scaled = (value * scale).round();
    if !scaled.is_finite() || scaled.abs().log2() >= MAX_ENCODED_BITS {
        return Err(CryptoError::Encryption(format!(
            "value {value:e} cannot be encoded at scale {scale:e}"
        )));
    }
    Ok(scaled as i64)
}

/// Coefficient encoding: `Σ round(scale·v_i) X^i`.
pub(crate) fn encode(
    chain: &ModulusChain,
    values: &[f64],
    scale: f64,
    level: usize,
) -> Result<Poly, CryptoError> {
    if values.is_empty() {
        return Err(CryptoError::Encryption("nothing to encode".to_string()));
    }
    if values.len() > chain.n() {
        return Err(CryptoError::Encryption(format!(
            "{} values exceed ring dimension {}",
            values.len(),
            chain.n()
        )));
    }
    let coeffs = values
        .iter()
        .map(|&v| scaled_coefficient(v, scale))
        .collect::<Result<Vec<_>, _>>()?;
    signed_poly(&coeffs, chain.at(level)?)
}

/// Encode weights so that the constant coefficient of `x(X)·w(X)` is
/// `scale · Σ x_i w_i`: `w_0` at `X^0` and `-w_i` at `X^(N-i)`.
pub(crate) fn encode_reversed(
    chain: &ModulusChain,
    weights: &[f64],
    scale: f64,
    level: usize,
) -> Result<Poly, CryptoError> {
    let n = chain.n();
    if weights.is_empty() || weights.len() > n {
        return Err(CryptoError::Computation(format!(
            "cannot encode {} weights in ring dimension {n}",
            weights.len()
        )));
    }
    let mut coeffs = vec![0i64; n];
    coeffs[0] = scaled_coefficient(weights[0], scale)?;
    for (i, &w) in weights.iter().enumerate().skip(1) {
        coeffs[n - i] = -scaled_coefficient(w, scale)?;
    }
    signed_poly(&coeffs, chain.at(level)?)
}

/// Uniform polynomial at `level` whose constant coefficient is zero.
pub(crate) fn uniform_mask<R: Rng>(
    chain: &ModulusChain,
    level: usize,
    rng: &mut R,
) -> Result<Poly, CryptoError> {
    let ctx = chain.at(level)?;
    let n = chain.n();
    let mut limbs = Vec::with_capacity(ctx.moduli().len() * n);
    for &q in ctx.moduli() {
        limbs.push(0);
        limbs.extend((1..n).map(|_| rng.gen_range(0..q)));
    }
    let mut mask =
        Poly::try_convert_from(limbs, ctx, false, Representation::PowerBasis).map_err(math_error)?;
    mask.change_representation(Representation::Ntt);
    Ok(mask)
}

/// Public-key encryption of an already encoded plaintext.
///
/// Zero is encrypted at key level (all primes), the special prime is divided
/// out to shrink the noise, then the plaintext is added.
pub(crate) fn encrypt_encoded<R: RngCore + CryptoRng>(
    chain: &ModulusChain,
    pk: &PublicKey,
    plain: &Poly,
    scale: f64,
    len: usize,
    rng: &mut R,
) -> Result<Ciphertext, CryptoError> {
    let key_ctx = chain.at(chain.key_level())?;
    let plain_level = plain.ctx().moduli().len();
    if plain_level > chain.data_level() {
        return Err(CryptoError::Encryption(format!(
            "plaintext at level {plain_level} above data level {}",
            chain.data_level()
        )));
    }

    let u = signed_poly(&sample_ternary(chain.n(), rng), key_ctx)?;
    let e0 = Poly::small(key_ctx, Representation::Ntt, ERROR_VARIANCE, rng)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;
    let e1 = Poly::small(key_ctx, Representation::Ntt, ERROR_VARIANCE, rng)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    let mut c0 = &pk.b * &u;
    c0 += &e0;
    let mut c1 = &pk.a * &u;
    c1 += &e1;
    for c in [&mut c0, &mut c1] {
        c.change_representation(Representation::PowerBasis);
        c.mod_switch_down_next().map_err(math_error)?;
        c.change_representation(Representation::Ntt);
    }

    let mut c0 = drop_to(&c0, plain.ctx(), chain.n())?;
    let c1 = drop_to(&c1, plain.ctx(), chain.n())?;
    c0 += plain;

    Ok(Ciphertext {
        c0,
        c1,
        scale,
        len,
    })
}

/// Encode and encrypt a vector at `scale`.
pub(crate) fn encrypt<R: RngCore + CryptoRng>(
    chain: &ModulusChain,
    pk: &PublicKey,
    values: &[f64],
    scale: f64,
    rng: &mut R,
) -> Result<Ciphertext, CryptoError> {
    let plain = encode(chain, values, scale, chain.data_level())?;
    encrypt_encoded(chain, pk, &plain, scale, values.len(), rng)
}

/// Slot-wise sum; the higher operand is dropped to the lower level.
pub(crate) fn add(
    chain: &ModulusChain,
    left: &Ciphertext,
    right: &Ciphertext,
) -> Result<Ciphertext, CryptoError> {
    let relative = (left.scale - right.scale).abs() / left.scale.max(right.scale);
    if relative > SCALE_TOLERANCE {
        return Err(CryptoError::ScaleMismatch {
            left: left.scale,
            right: right.scale,
        });
    }
    let ctx = chain.at(left.level().min(right.level()))?;
    let n = chain.n();
    let mut c0 = drop_to(&left.c0, ctx, n)?;
    let mut c1 = drop_to(&left.c1, ctx, n)?;
    c0 += &drop_to(&right.c0, ctx, n)?;
    c1 += &drop_to(&right.c1, ctx, n)?;
    Ok(Ciphertext {
        c0,
        c1,
        scale: left.scale,
        len: left.len.max(right.len),
    })
}

/// Ciphertext times plaintext; scales multiply, level is unchanged.
pub(crate) fn multiply_plain(
    ct: &Ciphertext,
    plain: &Poly,
    plain_scale: f64,
) -> Result<Ciphertext, CryptoError> {
    let plain_level = plain.ctx().moduli().len();
    if plain_level != ct.level() {
        return Err(CryptoError::Computation(format!(
            "plaintext at level {plain_level}, ciphertext at level {}",
            ct.level()
        )));
    }
    Ok(Ciphertext {
        c0: &ct.c0 * plain,
        c1: &ct.c1 * plain,
        scale: ct.scale * plain_scale,
        len: ct.len,
    })
}

/// Divide by the top data prime, consuming one level.
pub(crate) fn rescale(ct: &mut Ciphertext) -> Result<(), CryptoError> {
    let level = ct.level();
    if level < 2 {
        return Err(CryptoError::LevelExhausted);
    }
    let q_top = ct.c0.ctx().moduli()[level - 1];
    for c in [&mut ct.c0, &mut ct.c1] {
        c.change_representation(Representation::PowerBasis);
        c.mod_switch_down_next().map_err(math_error)?;
        c.change_representation(Representation::Ntt);
    }
    ct.scale /= q_top as f64;
    Ok(())
}

/// Add Gaussian noise well below the decoding precision to every coefficient.
pub(crate) fn flood<R: Rng>(
    chain: &ModulusChain,
    ct: &mut Ciphertext,
    rng: &mut R,
) -> Result<(), CryptoError> {
    let sigma = ct.scale / 2f64.powi(FLOODING_HEADROOM_BITS);
    let normal = Normal::new(0.0, sigma.max(1.0))
        .map_err(|e| CryptoError::Computation(format!("flooding distribution: {e}")))?;
    let noise: Vec<i64> = (0..chain.n())
        .map(|_| normal.sample(rng).round() as i64)
        .collect();
    ct.c0 += &signed_poly(&noise, ct.c0.ctx())?;
    Ok(())
}

/// Decrypt and decode modulo the base prime.
pub(crate) fn decrypt(
    chain: &ModulusChain,
    sk: &SecretKey,
    ct: &Ciphertext,
) -> Result<Vec<f64>, CryptoError> {
    let base = chain.at(1)?;
    let q0 = base.moduli()[0];
    let base_bits = f64::from(64 - q0.leading_zeros());
    if ct.scale.log2() + 1.0 >= base_bits {
        return Err(CryptoError::Decryption(format!(
            "scale 2^{:.1} does not fit the {base_bits}-bit base prime; rescale first",
            ct.scale.log2()
        )));
    }

    let s = sk.to_poly(base)?;
    let mut m = drop_to(&ct.c1, base, chain.n())?;
    m *= &s;
    m += &drop_to(&ct.c0, base, chain.n())?;
    m.change_representation(Representation::PowerBasis);

    Ok(m.coefficients()
        .row(0)
        .iter()
        .take(ct.len)
        .map(|&c| center(c, q0) as f64 / ct.scale)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::ckks::keys;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    struct Fixture {
        chain: ModulusChain,
        sk: SecretKey,
        pk: PublicKey,
        rng: ChaCha20Rng,
        scale: f64,
    }

    fn fixture() -> Fixture {
        let primes = generate_moduli(&[50, 30, 50], 1024).expect("primes");
        let chain = ModulusChain::new(1024, &primes).expect("chain");
        let mut rng = ChaCha20Rng::seed_from_u64(11);
        let key_ctx = chain.at(chain.key_level()).expect("key context");
        let (sk, pk) = keys::generate(key_ctx, 1024, &mut rng).expect("keys");
        Fixture {
            chain,
            sk,
            pk,
            rng,
            scale: 2f64.powi(30),
        }
    }

    #[test]
    fn test_generated_moduli_are_distinct_ntt_primes() {
        let moduli = generate_moduli(&[60, 40, 40, 60], 8192).expect("primes");
        assert_eq!(moduli.len(), 4);
        for (i, (&q, bits)) in moduli.iter().zip([60, 40, 40, 60]).enumerate() {
            assert_eq!(64 - q.leading_zeros(), bits);
            assert_eq!(q % (2 * 8192), 1);
            assert!(!moduli[..i].contains(&q));
        }
        assert_eq!(
            generate_moduli(&[60, 40, 40, 60], 8192).expect("primes"),
            moduli
        );
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let mut f = fixture();
        let values = vec![1.5, -2.25, 0.0, 3.125, 140.0];
        let ct = encrypt(&f.chain, &f.pk, &values, f.scale, &mut f.rng).expect("encrypt");
        assert_eq!(ct.level(), 2);
        let out = decrypt(&f.chain, &f.sk, &ct).expect("decrypt");
        assert_eq!(out.len(), values.len());
        for (a, b) in values.iter().zip(&out) {
            assert!((a - b).abs() < 1e-4, "{a} vs {b}");
        }
    }

    #[test]
    fn test_bytes_roundtrip_and_shape_checks() {
        let mut f = fixture();
        let ct = encrypt(&f.chain, &f.pk, &[2.0, -1.0], f.scale, &mut f.rng).expect("encrypt");
        let bytes = ct.to_bytes().expect("serialize");
        let parsed = Ciphertext::from_bytes(&bytes, &f.chain).expect("parse");
        let out = decrypt(&f.chain, &f.sk, &parsed).expect("decrypt");
        assert!((out[0] - 2.0).abs() < 1e-4);
        assert!((out[1] + 1.0).abs() < 1e-4);

        let mut wire: WireCiphertext = bincode::deserialize(&bytes).expect("wire");
        wire.c0[0] = u64::MAX;
        let out_of_range = bincode::serialize(&wire).expect("serialize");
        assert!(matches!(
            Ciphertext::from_bytes(&out_of_range, &f.chain),
            Err(CryptoError::CorruptCiphertext(_))
        ));

        let mut wire: WireCiphertext = bincode::deserialize(&bytes).expect("wire");
        wire.level = f.chain.key_level();
        let key_level = bincode::serialize(&wire).expect("serialize");
        assert!(Ciphertext::from_bytes(&key_level, &f.chain).is_err());
    }

    #[test]
    fn test_add() {
        let mut f = fixture();
        let a = encrypt(&f.chain, &f.pk, &[1.0, 2.0], f.scale, &mut f.rng).expect("encrypt");
        let b = encrypt(&f.chain, &f.pk, &[0.5, -4.0, 7.0], f.scale, &mut f.rng)
            .expect("encrypt");
        let sum = add(&f.chain, &a, &b).expect("add");
        let out = decrypt(&f.chain, &f.sk, &sum).expect("decrypt");
        for (a, b) in [1.5, -2.0, 7.0].iter().zip(&out) {
            assert!((a - b).abs() < 1e-4);
        }
    }

    #[test]
    fn test_add_rejects_scale_mismatch() {
        let mut f = fixture();
        let a = encrypt(&f.chain, &f.pk, &[1.0], f.scale, &mut f.rng).expect("encrypt");
        let b = encrypt(&f.chain, &f.pk, &[1.0], f.scale * 2.0, &mut f.rng).expect("encrypt");
        assert!(matches!(
            add(&f.chain, &a, &b),
            Err(CryptoError::ScaleMismatch { .. })
        ));
    }

    #[test]
    fn test_inner_product_via_reversed_encoding() {
        let mut f = fixture();
        let x = vec![0.5, -1.0, 2.0, 0.25];
        let w = vec![0.8, 0.1, -0.3, 1.0];
        let expected: f64 = x.iter().zip(&w).map(|(a, b)| a * b).sum();

        let ct = encrypt(&f.chain, &f.pk, &x, f.scale, &mut f.rng).expect("encrypt");
        let plain = encode_reversed(&f.chain, &w, f.scale, ct.level()).expect("encode");
        let mut prod = multiply_plain(&ct, &plain, f.scale).expect("product");
        prod.len = 1;
        rescale(&mut prod).expect("rescale");
        assert_eq!(prod.level(), 1);

        let out = decrypt(&f.chain, &f.sk, &prod).expect("decrypt");
        assert!((out[0] - expected).abs() < 1e-3, "{} vs {expected}", out[0]);
    }

    #[test]
    fn test_uniform_mask_keeps_constant_term() {
        let mut f = fixture();
        let ct = encrypt(&f.chain, &f.pk, &[0.75, 3.0], f.scale, &mut f.rng).expect("encrypt");
        let mask = uniform_mask(&f.chain, ct.level(), &mut f.rng).expect("mask");
        let mask = encrypt_encoded(&f.chain, &f.pk, &mask, f.scale, 1, &mut f.rng)
            .expect("encrypt mask");
        let mut masked = add(&f.chain, &ct, &mask).expect("add");
        masked.len = 2;

        let out = decrypt(&f.chain, &f.sk, &masked).expect("decrypt");
        assert!((out[0] - 0.75).abs() < 1e-4);
        assert!((out[1] - 3.0).abs() > 1e-2, "mask left X^1 readable");
    }

    #[test]
    fn test_flooding_stays_below_precision() {
        let mut f = fixture();
        let mut ct = encrypt(&f.chain, &f.pk, &[12.5], f.scale, &mut f.rng).expect("encrypt");
        flood(&f.chain, &mut ct, &mut f.rng).expect("flood");
        let out = decrypt(&f.chain, &f.sk, &ct).expect("decrypt");
        assert!((out[0] - 12.5).abs() < 1e-3, "{}", out[0]);
    }

    #[test]
    fn test_decrypt_refuses_unrescaled_product() {
        let mut f = fixture();
        let ct = encrypt(&f.chain, &f.pk, &[1.0], f.scale, &mut f.rng).expect("encrypt");
        let plain = encode_reversed(&f.chain, &[1.0], f.scale, ct.level()).expect("encode");
        let prod = multiply_plain(&ct, &plain, f.scale).expect("product");
        assert!(matches!(
            decrypt(&f.chain, &f.sk, &prod),
            Err(CryptoError::Decryption(_))
        ));
    }

    #[test]
    fn test_rescale_at_base_level_fails() {
        let mut f = fixture();
        let mut ct = encrypt(&f.chain, &f.pk, &[1.0], f.scale, &mut f.rng).expect("encrypt");
        rescale(&mut ct).expect("first rescale");
        assert!(matches!(rescale(&mut ct), Err(CryptoError::LevelExhausted)));
    }

    #[test]
    fn test_encode_rejects_oversized_input() {
        let f = fixture();
        assert!(encode(&f.chain, &[], f.scale, 2).is_err());
        assert!(encode(&f.chain, &vec![1.0; 1025], f.scale, 2).is_err());
        assert!(encode(&f.chain, &[f64::INFINITY], f.scale, 2).is_err());
        assert!(encode(&f.chain, &[1e12], 2f64.powi(60), 2).is_err());
    }
}
