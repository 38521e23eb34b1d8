//! Feature preprocessing: standardization and polynomial expansion.
//!
//! The exact same transform must run before training and before encryption,
//! so both the statistics and the expansion rules travel with the model bundle.

use serde::{Deserialize, Serialize};

/// Errors raised while fitting or applying the feature transform.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FeatureError {
    #[error("Cannot fit normalization on an empty matrix")]
    Empty,

    #[error("Row {row} has {found} columns, expected {expected}")]
    Ragged {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("Non-finite value in column {column}")]
    NonFinite { column: usize },

    #[error("Dimension mismatch: expected {expected} features, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("Invalid polynomial degree: {0}")]
    InvalidDegree(usize),
}

/// Column-wise mean and population standard deviation of the training set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationStats {
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
}

impl NormalizationStats {
    /// Fit statistics over a training matrix.
    ///
    /// Columns with zero variance get `std = 1` so they pass through as
    /// `x - mean` instead of dividing by zero.
    ///
    /// # Errors
    /// Fails on an empty, ragged or non-finite matrix.
    pub fn fit(matrix: &[Vec<f64>]) -> Result<Self, FeatureError> {
        let first = matrix.first().ok_or(FeatureError::Empty)?;
        let width = first.len();
        if width == 0 {
            return Err(FeatureError::Empty);
        }

        for (row, values) in matrix.iter().enumerate() {
            if values.len() != width {
                return Err(FeatureError::Ragged {
                    row,
                    expected: width,
                    found: values.len(),
                });
            }
            if let Some(column) = values.iter().position(|v| !v.is_finite()) {
                return Err(FeatureError::NonFinite { column });
            }
        }

        let n = matrix.len() as f64;
        let mut mean = vec![0.0; width];
        for values in matrix {
            for (m, v) in mean.iter_mut().zip(values) {
                *m += v;
            }
        }
        for m in &mut mean {
            *m /= n;
        }

        let mut std = vec![0.0; width];
        for values in matrix {
            for ((s, v), m) in std.iter_mut().zip(values).zip(&mean) {
                *s += (v - m).powi(2);
            }
        }
        for s in &mut std {
            *s = (*s / n).sqrt();
            if *s == 0.0 {
                *s = 1.0;
            }
        }

        Ok(Self { mean, std })
    }

    #[must_use]
    pub fn width(&self) -> usize {
        self.mean.len()
    }

    /// `(row - mean) / std`.
    ///
    /// # Errors
    /// Returns `FeatureError::DimensionMismatch` when the row width differs.
    pub fn apply(&self, row: &[f64]) -> Result<Vec<f64>, FeatureError> {
        self.check_width(row)?;
        if let Some(column) = row.iter().position(|v| !v.is_finite()) {
            return Err(FeatureError::NonFinite { column });
        }
        Ok(row
            .iter()
            .zip(self.mean.iter().zip(&self.std))
            .map(|(v, (m, s))| (v - m) / s)
            .collect())
    }

    /// `row * std + mean`, the inverse of [`apply`](Self::apply).
    ///
    /// # Errors
    /// Returns `FeatureError::DimensionMismatch` when the row width differs.
    pub fn invert(&self, row: &[f64]) -> Result<Vec<f64>, FeatureError> {
        self.check_width(row)?;
        Ok(row
            .iter()
            .zip(self.mean.iter().zip(&self.std))
            .map(|(v, (m, s))| v * s + m)
            .collect())
    }

    fn check_width(&self, row: &[f64]) -> Result<(), FeatureError> {
        if row.len() == self.width() {
            Ok(())
        } else {
            Err(FeatureError::DimensionMismatch {
                expected: self.width(),
                found: row.len(),
            })
        }
    }
}

/// Polynomial feature expansion.
///
/// Monomials are ordered by total degree, then lexicographically by
/// non-decreasing feature index: `x0, x1, x0², x0·x1, x1²` for two inputs at
/// degree 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolynomialExpansion {
    pub degree: usize,

    /// Keep only products of distinct features (no powers).
    pub interaction_only: bool,

    /// Prepend a constant 1 column.
    pub include_bias: bool,
}

impl Default for PolynomialExpansion {
    fn default() -> Self {
        Self {
            degree: 2,
            interaction_only: false,
            include_bias: false,
        }
    }
}

impl PolynomialExpansion {
    /// # Errors
    /// Returns `FeatureError::InvalidDegree` for degree 0.
    pub fn new(degree: usize) -> Result<Self, FeatureError> {
        if degree == 0 {
            return Err(FeatureError::InvalidDegree(degree));
        }
        Ok(Self {
            degree,
            ..Self::default()
        })
    }

    /// Number of output columns for `width` input columns.
    #[must_use]
    pub fn output_width(&self, width: usize) -> usize {
        let bias = usize::from(self.include_bias);
        bias + self.terms(width).len()
    }

    /// Expand one row.
    #[must_use]
    pub fn expand(&self, row: &[f64]) -> Vec<f64> {
        let terms = self.terms(row.len());
        let mut out = Vec::with_capacity(terms.len() + usize::from(self.include_bias));
        if self.include_bias {
            out.push(1.0);
        }
        out.extend(
            terms
                .iter()
                .map(|term| term.iter().map(|&i| row[i]).product::<f64>()),
        );
        out
    }

    /// Feature indices of every monomial, in output order.
    fn terms(&self, width: usize) -> Vec<Vec<usize>> {
        let mut terms = Vec::new();
        for degree in 1..=self.degree {
            let mut current = Vec::with_capacity(degree);
            self.push_combinations(width, degree, 0, &mut current, &mut terms);
        }
        terms
    }

    fn push_combinations(
        &self,
        width: usize,
        degree: usize,
        start: usize,
        current: &mut Vec<usize>,
        out: &mut Vec<Vec<usize>>,
    ) {
        if current.len() == degree {
            out.push(current.clone());
            return;
        }
        for i in start..width {
            current.push(i);
            let next = if self.interaction_only { i + 1 } else { i };
            self.push_combinations(width, degree, next, current, out);
            current.pop();
        }
    }

    /// Human-readable monomial names, e.g. `Glucose BMI` or `Age^2`.
    #[must_use]
    pub fn feature_names(&self, names: &[String]) -> Vec<String> {
        let mut out = Vec::new();
        if self.include_bias {
            out.push("1".to_string());
        }
        for term in self.terms(names.len()) {
            let mut parts: Vec<String> = Vec::new();
            let mut i = 0;
            while i < term.len() {
                let idx = term[i];
                let power = term[i..].iter().take_while(|&&j| j == idx).count();
                if power == 1 {
                    parts.push(names[idx].clone());
                } else {
                    parts.push(format!("{}^{power}", names[idx]));
                }
                i += power;
            }
            out.push(parts.join(" "));
        }
        out
    }
}

/// Normalize, then expand if an expansion is configured.
///
/// # Errors
/// Returns `FeatureError::DimensionMismatch` when the row does not match the
/// fitted statistics.
pub fn transform(
    row: &[f64],
    stats: &NormalizationStats,
    expansion: Option<&PolynomialExpansion>,
) -> Result<Vec<f64>, FeatureError> {
    let normalized = stats.apply(row)?;
    Ok(match expansion {
        Some(poly) => poly.expand(&normalized),
        None => normalized,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix() -> Vec<Vec<f64>> {
        vec![
            vec![1.0, 120.0, 5.0],
            vec![3.0, 140.0, 5.0],
            vec![5.0, 160.0, 5.0],
        ]
    }

    #[test]
    fn test_fit_population_std_and_zero_guard() {
        let stats = NormalizationStats::fit(&matrix()).expect("fit");
        assert_eq!(stats.mean, vec![3.0, 140.0, 5.0]);
        // population std of {1,3,5} is sqrt(8/3)
        assert!((stats.std[0] - (8.0f64 / 3.0).sqrt()).abs() < 1e-12);
        assert_eq!(stats.std[2], 1.0);
    }

    #[test]
    fn test_transform_then_invert_is_identity() {
        let stats = NormalizationStats::fit(&matrix()).expect("fit");
        let row = vec![2.5, 133.0, 7.0];
        let normalized = stats.apply(&row).expect("apply");
        let restored = stats.invert(&normalized).expect("invert");
        for (a, b) in row.iter().zip(&restored) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn test_constant_column_passes_through_centered() {
        let stats = NormalizationStats::fit(&matrix()).expect("fit");
        let out = stats.apply(&[3.0, 140.0, 6.5]).expect("apply");
        assert_eq!(out[2], 1.5);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert_eq!(NormalizationStats::fit(&[]), Err(FeatureError::Empty));
        assert!(matches!(
            NormalizationStats::fit(&[vec![1.0, 2.0], vec![1.0]]),
            Err(FeatureError::Ragged { row: 1, .. })
        ));
        assert!(matches!(
            NormalizationStats::fit(&[vec![f64::NAN]]),
            Err(FeatureError::NonFinite { column: 0 })
        ));

        let stats = NormalizationStats::fit(&matrix()).expect("fit");
        assert_eq!(
            stats.apply(&[1.0, 2.0]),
            Err(FeatureError::DimensionMismatch {
                expected: 3,
                found: 2
            })
        );
    }

    #[test]
    fn test_degree_two_order() {
        let poly = PolynomialExpansion::default();
        let out = poly.expand(&[2.0, 3.0, 5.0]);
        assert_eq!(out, vec![2.0, 3.0, 5.0, 4.0, 6.0, 10.0, 9.0, 15.0, 25.0]);
        assert_eq!(poly.output_width(3), 9);
        assert_eq!(poly.output_width(8), 44);
    }

    #[test]
    fn test_interaction_only_and_bias() {
        let poly = PolynomialExpansion {
            degree: 2,
            interaction_only: true,
            include_bias: true,
        };
        assert_eq!(poly.expand(&[2.0, 3.0, 5.0]), vec![1.0, 2.0, 3.0, 5.0, 6.0, 10.0, 15.0]);
        assert_eq!(poly.output_width(3), 7);
    }

    #[test]
    fn test_feature_names() {
        let poly = PolynomialExpansion::default();
        let names = poly.feature_names(&["Glucose".to_string(), "BMI".to_string()]);
        assert_eq!(names, vec!["Glucose", "BMI", "Glucose^2", "Glucose BMI", "BMI^2"]);
    }

    #[test]
    fn test_degree_zero_rejected() {
        assert_eq!(PolynomialExpansion::new(0), Err(FeatureError::InvalidDegree(0)));
    }

    #[test]
    fn test_transform_applies_expansion() {
        let stats = NormalizationStats::fit(&matrix()).expect("fit");
        let poly = PolynomialExpansion::default();
        let out = transform(&[3.0, 140.0, 5.0], &stats, Some(&poly)).expect("transform");
        assert_eq!(out.len(), 9);
        assert!(out.iter().all(|v| *v == 0.0));
    }
}
