//! Gaussian mechanism adapter: Implementation of DifferentialPrivacy.
//!
//! Clips each client update to a fixed norm bound and adds independent
//! Gaussian noise to every coordinate before aggregation.
//!
//! # Mutex Behavior
//!
//! This adapter uses `Mutex` for thread-safe RNG access. A poisoned mutex
//! (from a panic in another thread) fails closed by returning an error, and
//! the caller must drop the update instead of aggregating it unnoised.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use rand_distr::{Distribution, Normal};

use crate::ports::{ClientUpdate, DifferentialPrivacy, DpError};

/// Norm used to bound each update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipNorm {
    /// Clamp every coordinate to `[-c, c]`.
    LInf,
    /// Scale the whole update down to Euclidean norm `c`.
    L2,
}

/// Configuration for the Gaussian mechanism.
#[derive(Debug, Clone)]
pub struct PrivacyConfig {
    /// Apply clipping and noise at all
    pub enabled: bool,

    /// Norm bound `c`
    pub clip_threshold: f64,

    /// Which norm `clip_threshold` bounds
    pub clip_norm: ClipNorm,

    /// Standard deviation of the per-coordinate noise
    pub noise_scale: f64,
}

impl Default for PrivacyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            clip_threshold: 1.0,
            clip_norm: ClipNorm::LInf,
            noise_scale: 0.1,
        }
    }
}

impl PrivacyConfig {
    /// Load config overrides from environment (best-effort).
    ///
    /// Supported:
    /// - GLYCOSECURE_DP_ENABLED
    /// - GLYCOSECURE_DP_CLIP
    /// - GLYCOSECURE_DP_CLIP_NORM=linf|l2
    /// - GLYCOSECURE_DP_NOISE_SCALE
    pub fn from_env_or_default() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("GLYCOSECURE_DP_ENABLED") {
            cfg.enabled = !matches!(v.trim(), "0" | "false" | "FALSE" | "no" | "NO");
        }

        if let Ok(v) = std::env::var("GLYCOSECURE_DP_CLIP") {
            if let Ok(x) = v.trim().parse::<f64>() {
                if x.is_finite() && x > 0.0 {
                    cfg.clip_threshold = x;
                }
            }
        }

        if let Ok(v) = std::env::var("GLYCOSECURE_DP_CLIP_NORM") {
            match v.trim().to_ascii_lowercase().as_str() {
                "linf" | "inf" => cfg.clip_norm = ClipNorm::LInf,
                "l2" => cfg.clip_norm = ClipNorm::L2,
                other => tracing::warn!("Ignoring unknown GLYCOSECURE_DP_CLIP_NORM={other}"),
            }
        }

        if let Ok(v) = std::env::var("GLYCOSECURE_DP_NOISE_SCALE") {
            if let Ok(x) = v.trim().parse::<f64>() {
                if x.is_finite() && x >= 0.0 {
                    cfg.noise_scale = x;
                }
            }
        }

        cfg
    }
}

/// Gaussian noise mechanism for federated updates.
pub struct GaussianMechanism {
    config: PrivacyConfig,

    /// Updates privatized so far
    privatized: Arc<AtomicU64>,

    /// CSPRNG for noise generation
    rng: Arc<Mutex<ChaCha20Rng>>,
}

impl GaussianMechanism {
    /// Create a mechanism with configuration from the environment.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(PrivacyConfig::from_env_or_default())
    }

    #[must_use]
    pub fn with_config(config: PrivacyConfig) -> Self {
        Self::with_rng(config, ChaCha20Rng::from_entropy())
    }

    /// Deterministic noise for reproducible runs and tests.
    #[must_use]
    pub fn with_seed(config: PrivacyConfig, seed: u64) -> Self {
        Self::with_rng(config, ChaCha20Rng::seed_from_u64(seed))
    }

    fn with_rng(config: PrivacyConfig, rng: ChaCha20Rng) -> Self {
        Self {
            config,
            privatized: Arc::new(AtomicU64::new(0)),
            rng: Arc::new(Mutex::new(rng)),
        }
    }

    #[must_use]
    pub fn config(&self) -> &PrivacyConfig {
        &self.config
    }

    fn clip(&self, update: &mut ClientUpdate) {
        let c = self.config.clip_threshold;
        match self.config.clip_norm {
            ClipNorm::LInf => {
                for w in update
                    .weights
                    .iter_mut()
                    .chain(std::iter::once(&mut update.intercept))
                {
                    *w = w.clamp(-c, c);
                }
            }
            ClipNorm::L2 => {
                let norm = update.l2_norm();
                if norm > c {
                    let factor = c / norm;
                    for w in update
                        .weights
                        .iter_mut()
                        .chain(std::iter::once(&mut update.intercept))
                    {
                        *w *= factor;
                    }
                }
            }
        }
    }

    fn add_noise(&self, update: &mut ClientUpdate) -> Result<(), DpError> {
        let sigma = self.config.noise_scale;
        if sigma == 0.0 {
            return Ok(());
        }
        let normal = Normal::new(0.0, sigma).map_err(|_| DpError::InvalidNoiseScale(sigma))?;
        let mut rng = self.rng.lock().map_err(|_| DpError::RngUnavailable)?;
        for w in update
            .weights
            .iter_mut()
            .chain(std::iter::once(&mut update.intercept))
        {
            *w += normal.sample(&mut *rng);
        }
        Ok(())
    }
}

impl Default for GaussianMechanism {
    fn default() -> Self {
        Self::new()
    }
}

impl DifferentialPrivacy for GaussianMechanism {
    fn privatize(&self, update: &mut ClientUpdate) -> Result<(), DpError> {
        if !self.config.enabled {
            return Ok(());
        }

        let c = self.config.clip_threshold;
        if !c.is_finite() || c <= 0.0 {
            tracing::error!("Invalid clip threshold: {c}. Refusing to release update.");
            return Err(DpError::InvalidClipThreshold(c));
        }
        let sigma = self.config.noise_scale;
        if !sigma.is_finite() || sigma < 0.0 {
            tracing::error!("Invalid noise scale: {sigma}. Refusing to release update.");
            return Err(DpError::InvalidNoiseScale(sigma));
        }
        if update.weights.iter().any(|w| !w.is_finite()) || !update.intercept.is_finite() {
            return Err(DpError::NonFiniteUpdate);
        }

        self.clip(update);
        self.add_noise(update)?;
        self.privatized.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn clip_threshold(&self) -> f64 {
        self.config.clip_threshold
    }

    fn noise_scale(&self) -> f64 {
        if self.config.enabled {
            self.config.noise_scale
        } else {
            0.0
        }
    }

    fn updates_privatized(&self) -> u64 {
        self.privatized.load(Ordering::SeqCst)
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn large_update() -> ClientUpdate {
        ClientUpdate {
            weights: vec![5.0, -3.0, 0.2],
            intercept: -7.5,
        }
    }

    #[test]
    fn test_linf_clip_without_noise() {
        let config = PrivacyConfig {
            noise_scale: 0.0,
            ..PrivacyConfig::default()
        };
        let mechanism = GaussianMechanism::with_seed(config, 1);
        let mut update = large_update();
        mechanism.privatize(&mut update).expect("privatize");
        assert_eq!(update.weights, vec![1.0, -1.0, 0.2]);
        assert_eq!(update.intercept, -1.0);
        assert_eq!(mechanism.updates_privatized(), 1);
    }

    #[test]
    fn test_l2_clip_without_noise() {
        let config = PrivacyConfig {
            noise_scale: 0.0,
            clip_norm: ClipNorm::L2,
            clip_threshold: 2.0,
            ..PrivacyConfig::default()
        };
        let mechanism = GaussianMechanism::with_seed(config, 1);
        let mut update = large_update();
        mechanism.privatize(&mut update).expect("privatize");
        assert!((update.l2_norm() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_noise_is_seeded_and_bounded() {
        let a = GaussianMechanism::with_seed(PrivacyConfig::default(), 42);
        let b = GaussianMechanism::with_seed(PrivacyConfig::default(), 42);
        let mut ua = large_update();
        let mut ub = large_update();
        a.privatize(&mut ua).expect("privatize");
        b.privatize(&mut ub).expect("privatize");
        assert_eq!(ua, ub);
        assert_ne!(ua.weights, vec![1.0, -1.0, 0.2]);
        // clip 1.0 plus six standard deviations of noise
        assert!(ua.linf_norm() <= 1.0 + 6.0 * 0.1);
    }

    #[test]
    fn test_disabled_is_identity() {
        let config = PrivacyConfig {
            enabled: false,
            ..PrivacyConfig::default()
        };
        let mechanism = GaussianMechanism::with_config(config);
        let mut update = large_update();
        mechanism.privatize(&mut update).expect("privatize");
        assert_eq!(update, large_update());
        assert_eq!(mechanism.noise_scale(), 0.0);
    }

    #[test]
    fn test_rejects_invalid_config_and_input() {
        let config = PrivacyConfig {
            clip_threshold: -1.0,
            ..PrivacyConfig::default()
        };
        let mechanism = GaussianMechanism::with_config(config);
        assert!(matches!(
            mechanism.privatize(&mut large_update()),
            Err(DpError::InvalidClipThreshold(_))
        ));

        let mechanism = GaussianMechanism::with_config(PrivacyConfig::default());
        let mut update = large_update();
        update.intercept = f64::NAN;
        assert!(matches!(
            mechanism.privatize(&mut update),
            Err(DpError::NonFiniteUpdate)
        ));
    }
}
