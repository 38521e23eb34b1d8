//! Federated trainer: simulated clients, DP-protected averaging.
//!
//! Each round every client fits a local L2-regularized logistic regression on
//! its own shard, warm-started from the current global model. Updates go
//! through the privacy port one at a time, then are averaged unweighted.

use std::sync::Arc;

use chrono::Utc;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use rayon::prelude::*;

use crate::domain::dataset::split_ranges;
use crate::domain::{
    DecisionThreshold, LabeledDataset, ModelBundle, NormalizationStats, PolynomialExpansion,
    TrainingSummary,
};
use crate::ports::{ClientUpdate, DifferentialPrivacy};
use crate::GlycosecureError;

/// How rows are dealt out to simulated clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partition {
    /// Consecutive chunks in file order.
    Contiguous,
    /// Seeded shuffle, then consecutive chunks.
    Shuffled { seed: u64 },
}

/// Configuration for federated training.
#[derive(Debug, Clone)]
pub struct TrainingConfig {
    pub num_clients: usize,
    pub num_rounds: usize,

    /// Gradient steps per client per round
    pub local_iterations: usize,

    pub learning_rate: f64,

    /// Inverse regularization strength (larger = weaker penalty)
    pub inverse_regularization: f64,

    pub partition: Partition,

    /// `None` trains on normalized features only
    pub expansion: Option<PolynomialExpansion>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            num_clients: 5,
            num_rounds: 70,
            local_iterations: 50,
            learning_rate: 0.1,
            inverse_regularization: 3.0,
            partition: Partition::Contiguous,
            expansion: Some(PolynomialExpansion::default()),
        }
    }
}

impl TrainingConfig {
    /// Load config overrides from environment (best-effort).
    ///
    /// Supported:
    /// - GLYCOSECURE_TRAIN_CLIENTS
    /// - GLYCOSECURE_TRAIN_ROUNDS
    /// - GLYCOSECURE_TRAIN_LOCAL_ITERS
    /// - GLYCOSECURE_TRAIN_LEARNING_RATE
    /// - GLYCOSECURE_TRAIN_C
    /// - GLYCOSECURE_TRAIN_SHUFFLE_SEED (unset = contiguous)
    /// - GLYCOSECURE_POLY_DEGREE (0 = no expansion)
    pub fn from_env_or_default() -> Self {
        let mut cfg = Self::default();

        let positive_usize = |key: &str| {
            std::env::var(key)
                .ok()
                .and_then(|v| v.trim().parse::<usize>().ok())
                .filter(|&v| v > 0)
        };
        let positive_f64 = |key: &str| {
            std::env::var(key)
                .ok()
                .and_then(|v| v.trim().parse::<f64>().ok())
                .filter(|v| v.is_finite() && *v > 0.0)
        };

        if let Some(v) = positive_usize("GLYCOSECURE_TRAIN_CLIENTS") {
            cfg.num_clients = v;
        }
        if let Some(v) = positive_usize("GLYCOSECURE_TRAIN_ROUNDS") {
            cfg.num_rounds = v;
        }
        if let Some(v) = positive_usize("GLYCOSECURE_TRAIN_LOCAL_ITERS") {
            cfg.local_iterations = v;
        }
        if let Some(v) = positive_f64("GLYCOSECURE_TRAIN_LEARNING_RATE") {
            cfg.learning_rate = v;
        }
        if let Some(v) = positive_f64("GLYCOSECURE_TRAIN_C") {
            cfg.inverse_regularization = v;
        }
        if let Ok(v) = std::env::var("GLYCOSECURE_TRAIN_SHUFFLE_SEED") {
            if let Ok(seed) = v.trim().parse::<u64>() {
                cfg.partition = Partition::Shuffled { seed };
            }
        }
        if let Ok(v) = std::env::var("GLYCOSECURE_POLY_DEGREE") {
            match v.trim().parse::<usize>() {
                Ok(0) => cfg.expansion = None,
                Ok(degree) => match PolynomialExpansion::new(degree) {
                    Ok(poly) => cfg.expansion = Some(poly),
                    Err(e) => tracing::warn!("Ignoring GLYCOSECURE_POLY_DEGREE: {e}"),
                },
                Err(_) => tracing::warn!("Ignoring non-numeric GLYCOSECURE_POLY_DEGREE"),
            }
        }

        cfg
    }
}

/// One client's view of the data.
struct Shard {
    rows: Vec<Vec<f64>>,
    labels: Vec<u8>,
}

impl Shard {
    fn is_single_class(&self) -> bool {
        self.labels.windows(2).all(|w| w[0] == w[1])
    }

    /// Zero weights and a smoothed log-odds intercept.
    fn intercept_only(&self, width: usize) -> ClientUpdate {
        let positives = self.labels.iter().filter(|&&l| l == 1).count() as f64;
        let negatives = self.labels.len() as f64 - positives;
        ClientUpdate {
            weights: vec![0.0; width],
            intercept: ((positives + 0.5) / (negatives + 0.5)).ln(),
        }
    }
}

/// Federated logistic-regression trainer.
pub struct FederatedTrainer<D>
where
    D: DifferentialPrivacy,
{
    config: TrainingConfig,
    privacy: Arc<D>,
}

impl<D> FederatedTrainer<D>
where
    D: DifferentialPrivacy,
{
    pub fn new(config: TrainingConfig, privacy: Arc<D>) -> Self {
        Self { config, privacy }
    }

    #[must_use]
    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Train a model bundle on `dataset`.
    ///
    /// # Errors
    /// Returns error if the dataset is invalid, no client receives data, or
    /// the privacy mechanism refuses an update. Nothing is persisted here.
    pub fn train(&self, dataset: &LabeledDataset) -> Result<ModelBundle, GlycosecureError> {
        dataset.validate()?;
        let cfg = &self.config;
        if cfg.num_clients == 0 || cfg.num_rounds == 0 {
            return Err(GlycosecureError::Training(
                "num_clients and num_rounds must be positive".to_string(),
            ));
        }

        let normalization = NormalizationStats::fit(&dataset.rows)?;
        let transformed = dataset
            .rows
            .iter()
            .map(|row| {
                crate::domain::features::transform(row, &normalization, cfg.expansion.as_ref())
            })
            .collect::<Result<Vec<_>, _>>()?;
        let width = transformed.first().map_or(0, Vec::len);

        let shards = self.partition(&transformed, &dataset.labels);
        let active: Vec<&Shard> = shards.iter().filter(|s| !s.labels.is_empty()).collect();
        if active.is_empty() {
            return Err(GlycosecureError::Training("no client received data".to_string()));
        }
        if active.len() < shards.len() {
            tracing::warn!(
                "{} of {} clients received no rows and will sit out",
                shards.len() - active.len(),
                shards.len()
            );
        }

        tracing::info!(
            "Federated training: {} rows, {} features ({} after transform), {} clients, {} rounds, DP {}",
            dataset.len(),
            dataset.width(),
            width,
            active.len(),
            cfg.num_rounds,
            if self.privacy.is_enabled() { "on" } else { "off" }
        );

        let mut global = ClientUpdate::zeros(width);
        for round in 0..cfg.num_rounds {
            let mut updates: Vec<ClientUpdate> = active
                .par_iter()
                .map(|shard| self.fit_local(shard, &global))
                .collect();

            for update in &mut updates {
                self.privacy.privatize(update)?;
            }
            global = average(&updates, width);

            if round % 10 == 9 || round + 1 == cfg.num_rounds {
                tracing::debug!("Round {}/{} complete", round + 1, cfg.num_rounds);
            }
        }

        if global.weights.iter().any(|w| !w.is_finite()) || !global.intercept.is_finite() {
            return Err(GlycosecureError::Training(
                "training diverged to a non-finite model".to_string(),
            ));
        }

        let (train_accuracy, train_mcc) = evaluate(&transformed, &dataset.labels, &global);
        tracing::info!(
            "Training complete: accuracy {:.3}, MCC {:.3}, {} updates privatized",
            train_accuracy,
            train_mcc,
            self.privacy.updates_privatized()
        );

        let feature_names: Vec<String> = if dataset.feature_names.is_empty() {
            (0..dataset.width()).map(|i| format!("x{i}")).collect()
        } else {
            dataset.feature_names.clone()
        };
        if let Some((term, weight)) = strongest_term(cfg.expansion.as_ref(), &feature_names, &global)
        {
            tracing::debug!("Strongest term: {term} ({weight:+.3})");
        }

        let bundle = ModelBundle {
            version: ModelBundle::VERSION,
            feature_names,
            normalization,
            expansion: cfg.expansion,
            weights: global.weights,
            intercept: global.intercept,
            trained_at: Utc::now(),
            summary: TrainingSummary {
                rows: dataset.len(),
                clients: active.len(),
                rounds: cfg.num_rounds,
                train_accuracy,
                train_mcc,
                dp_enabled: self.privacy.is_enabled(),
            },
        };
        bundle.validate().map_err(GlycosecureError::Training)?;
        Ok(bundle)
    }

    fn partition(&self, rows: &[Vec<f64>], labels: &[u8]) -> Vec<Shard> {
        let mut order: Vec<usize> = (0..rows.len()).collect();
        if let Partition::Shuffled { seed } = self.config.partition {
            order.shuffle(&mut ChaCha20Rng::seed_from_u64(seed));
        }
        split_ranges(order.len(), self.config.num_clients)
            .into_iter()
            .map(|range| Shard {
                rows: order[range.clone()].iter().map(|&i| rows[i].clone()).collect(),
                labels: order[range].iter().map(|&i| labels[i]).collect(),
            })
            .collect()
    }

    /// Full-batch gradient descent on the mean log-loss plus
    /// `‖w‖² / (2·C·n)`; the intercept is not penalized.
    fn fit_local(&self, shard: &Shard, start: &ClientUpdate) -> ClientUpdate {
        let width = start.weights.len();
        if shard.is_single_class() {
            return shard.intercept_only(width);
        }

        let n = shard.rows.len() as f64;
        let lambda = 1.0 / (self.config.inverse_regularization * n);
        let lr = self.config.learning_rate;
        let mut model = start.clone();

        let mut grad = vec![0.0; width];
        for _ in 0..self.config.local_iterations {
            grad.iter_mut().for_each(|g| *g = 0.0);
            let mut grad_b = 0.0;
            for (row, &label) in shard.rows.iter().zip(&shard.labels) {
                let err = sigmoid(linear(&model, row)) - f64::from(label);
                for (g, x) in grad.iter_mut().zip(row) {
                    *g += err * x;
                }
                grad_b += err;
            }
            for (w, g) in model.weights.iter_mut().zip(&grad) {
                *w -= lr * (g / n + lambda * *w);
            }
            model.intercept -= lr * grad_b / n;
        }
        model
    }
}

fn linear(model: &ClientUpdate, row: &[f64]) -> f64 {
    model
        .weights
        .iter()
        .zip(row)
        .map(|(w, x)| w * x)
        .sum::<f64>()
        + model.intercept
}

fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

fn average(updates: &[ClientUpdate], width: usize) -> ClientUpdate {
    let mut mean = ClientUpdate::zeros(width);
    if updates.is_empty() {
        return mean;
    }
    let k = updates.len() as f64;
    for update in updates {
        for (m, w) in mean.weights.iter_mut().zip(&update.weights) {
            *m += w / k;
        }
        mean.intercept += update.intercept / k;
    }
    mean
}

/// Name and weight of the largest-magnitude coefficient.
fn strongest_term(
    expansion: Option<&PolynomialExpansion>,
    feature_names: &[String],
    model: &ClientUpdate,
) -> Option<(String, f64)> {
    let names = match expansion {
        Some(poly) => poly.feature_names(feature_names),
        None => feature_names.to_vec(),
    };
    names
        .into_iter()
        .zip(model.weights.iter().copied())
        .max_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))
}

/// Accuracy and Matthews correlation of the thresholded raw score.
fn evaluate(rows: &[Vec<f64>], labels: &[u8], model: &ClientUpdate) -> (f64, f64) {
    let rule = DecisionThreshold::default();
    let (mut tp, mut tn, mut fp, mut fn_) = (0.0_f64, 0.0_f64, 0.0_f64, 0.0_f64);
    for (row, &label) in rows.iter().zip(labels) {
        match (rule.classify(linear(model, row)).label, label) {
            (1, 1) => tp += 1.0,
            (0, 0) => tn += 1.0,
            (1, _) => fp += 1.0,
            _ => fn_ += 1.0,
        }
    }
    let total = tp + tn + fp + fn_;
    let accuracy = if total > 0.0 { (tp + tn) / total } else { 0.0 };
    let denom = ((tp + fp) * (tp + fn_) * (tn + fp) * (tn + fn_)).sqrt();
    let mcc = if denom > 0.0 {
        (tp * tn - fp * fn_) / denom
    } else {
        0.0
    };
    (accuracy, mcc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::gaussian::{GaussianMechanism, PrivacyConfig};
    use rand::Rng;

    fn synthetic(rows: usize, seed: u64) -> LabeledDataset {
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        let mut data = Vec::with_capacity(rows);
        let mut labels = Vec::with_capacity(rows);
        for _ in 0..rows {
            let glucose: f64 = rng.gen_range(70.0..200.0);
            let bmi: f64 = rng.gen_range(18.0..45.0);
            labels.push(u8::from(glucose > 140.0 || bmi > 35.0));
            data.push(vec![glucose, bmi]);
        }
        LabeledDataset::new(
            vec!["Glucose".to_string(), "BMI".to_string()],
            data,
            labels,
        )
        .expect("dataset")
    }

    fn no_dp() -> Arc<GaussianMechanism> {
        Arc::new(GaussianMechanism::with_config(PrivacyConfig {
            enabled: false,
            ..PrivacyConfig::default()
        }))
    }

    #[test]
    fn test_trains_separable_data_without_dp() {
        let config = TrainingConfig {
            num_rounds: 30,
            ..TrainingConfig::default()
        };
        let trainer = FederatedTrainer::new(config, no_dp());
        let bundle = trainer.train(&synthetic(200, 1)).expect("train");

        assert!(bundle.validate().is_ok());
        assert_eq!(bundle.model_width(), 5);
        assert_eq!(bundle.summary.clients, 5);
        assert!(!bundle.summary.dp_enabled);
        assert!(bundle.summary.train_accuracy > 0.75);
        assert!(bundle.summary.train_mcc > 0.4);
    }

    #[test]
    fn test_aggregate_respects_clip_plus_noise_bound() {
        let dataset = synthetic(100, 2);
        let clip = 1.0;
        let noise = 0.1;
        for seed in 0..5 {
            let privacy = Arc::new(GaussianMechanism::with_seed(
                PrivacyConfig {
                    clip_threshold: clip,
                    noise_scale: noise,
                    ..PrivacyConfig::default()
                },
                seed,
            ));
            let config = TrainingConfig {
                num_rounds: 10,
                ..TrainingConfig::default()
            };
            let trainer = FederatedTrainer::new(config, Arc::clone(&privacy));
            let bundle = trainer.train(&dataset).expect("train");

            let global = ClientUpdate {
                weights: bundle.weights.clone(),
                intercept: bundle.intercept,
            };
            assert!(global.linf_norm() <= clip + noise * 4.0);
            assert_eq!(privacy.updates_privatized(), 5 * 10);
            assert!(bundle.summary.dp_enabled);
        }
    }

    #[test]
    fn test_single_class_shard_contributes_log_odds() {
        let shard = Shard {
            rows: vec![vec![0.0, 0.0]; 3],
            labels: vec![0, 0, 0],
        };
        assert!(shard.is_single_class());
        let update = shard.intercept_only(2);
        assert_eq!(update.weights, vec![0.0, 0.0]);
        assert!((update.intercept - (0.5f64 / 3.5).ln()).abs() < 1e-12);
    }

    #[test]
    fn test_single_class_dataset_still_trains() {
        let dataset = LabeledDataset::new(
            vec!["a".to_string()],
            (0..10).map(|i| vec![f64::from(i)]).collect(),
            vec![1; 10],
        )
        .expect("dataset");
        let config = TrainingConfig {
            num_rounds: 2,
            expansion: None,
            ..TrainingConfig::default()
        };
        let bundle = FederatedTrainer::new(config, no_dp())
            .train(&dataset)
            .expect("train");
        assert_eq!(bundle.weights, vec![0.0]);
        assert!((bundle.intercept - (2.5f64 / 0.5).ln()).abs() < 1e-12);
    }

    #[test]
    fn test_partition_shapes() {
        let rows: Vec<Vec<f64>> = (0..11).map(|i| vec![f64::from(i)]).collect();
        let labels = vec![0u8; 11];

        let trainer = FederatedTrainer::new(TrainingConfig::default(), no_dp());
        let shards = trainer.partition(&rows, &labels);
        let sizes: Vec<usize> = shards.iter().map(|s| s.rows.len()).collect();
        assert_eq!(sizes, vec![3, 2, 2, 2, 2]);
        assert_eq!(shards[1].rows[0], vec![3.0]);

        let config = TrainingConfig {
            partition: Partition::Shuffled { seed: 9 },
            ..TrainingConfig::default()
        };
        let a = FederatedTrainer::new(config.clone(), no_dp()).partition(&rows, &labels);
        let b = FederatedTrainer::new(config, no_dp()).partition(&rows, &labels);
        let flat = |s: &[Shard]| s.iter().flat_map(|s| s.rows.clone()).collect::<Vec<_>>();
        assert_eq!(flat(&a), flat(&b));
        assert_eq!(a.iter().map(|s| s.rows.len()).sum::<usize>(), 11);
    }

    #[test]
    fn test_mcc_perfect_and_inverted() {
        let rows = vec![vec![1.0], vec![-1.0]];
        let labels = vec![1, 0];
        let good = ClientUpdate {
            weights: vec![2.0],
            intercept: 0.0,
        };
        assert_eq!(evaluate(&rows, &labels, &good), (1.0, 1.0));
        let bad = ClientUpdate {
            weights: vec![-2.0],
            intercept: 0.0,
        };
        assert_eq!(evaluate(&rows, &labels, &bad), (0.0, -1.0));
    }

    #[test]
    fn test_mcc_of_mixed_predictions() {
        // tp=1, fn=1, tn=2, fp=0
        let rows = vec![vec![1.0], vec![-1.0], vec![-1.0], vec![-2.0]];
        let labels = vec![1, 1, 0, 0];
        let model = ClientUpdate {
            weights: vec![2.0],
            intercept: 0.0,
        };
        let (accuracy, mcc) = evaluate(&rows, &labels, &model);
        assert!((accuracy - 0.75).abs() < 1e-12);
        assert!((mcc - 2.0 / 6f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_strongest_term_uses_monomial_names() {
        let names = vec!["Glucose".to_string(), "BMI".to_string()];
        let model = ClientUpdate {
            weights: vec![0.1, -0.2, 0.05, 0.9, -1.5],
            intercept: 0.0,
        };
        let (term, weight) =
            strongest_term(Some(&PolynomialExpansion::default()), &names, &model).expect("term");
        assert_eq!(term, "BMI^2");
        assert_eq!(weight, -1.5);

        let linear = ClientUpdate {
            weights: vec![0.3, -0.4],
            intercept: 0.0,
        };
        let (term, _) = strongest_term(None, &names, &linear).expect("term");
        assert_eq!(term, "BMI");
    }
}
