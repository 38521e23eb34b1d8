//! Labeled training data.

use serde::{Deserialize, Serialize};

/// Errors raised while loading or validating a dataset.
#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("Dataset is empty")]
    Empty,

    #[error("Label column '{0}' not found")]
    MissingLabelColumn(String),

    #[error("Row {row}: {reason}")]
    InvalidRow { row: usize, reason: String },

    #[error("Row {row} has {found} features, expected {expected}")]
    Ragged {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Feature matrix with binary labels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledDataset {
    pub feature_names: Vec<String>,
    pub rows: Vec<Vec<f64>>,
    pub labels: Vec<u8>,
}

impl LabeledDataset {
    /// # Errors
    /// Fails if the data is empty, ragged, non-finite or not labeled 0/1.
    pub fn new(
        feature_names: Vec<String>,
        rows: Vec<Vec<f64>>,
        labels: Vec<u8>,
    ) -> Result<Self, DatasetError> {
        let dataset = Self {
            feature_names,
            rows,
            labels,
        };
        dataset.validate()?;
        Ok(dataset)
    }

    /// # Errors
    /// See [`new`](Self::new).
    pub fn validate(&self) -> Result<(), DatasetError> {
        if self.rows.is_empty() {
            return Err(DatasetError::Empty);
        }
        if self.rows.len() != self.labels.len() {
            return Err(DatasetError::InvalidRow {
                row: self.rows.len().min(self.labels.len()),
                reason: format!("{} rows but {} labels", self.rows.len(), self.labels.len()),
            });
        }
        let width = self.width();
        for (row, values) in self.rows.iter().enumerate() {
            if values.len() != width {
                return Err(DatasetError::Ragged {
                    row,
                    expected: width,
                    found: values.len(),
                });
            }
            if values.iter().any(|v| !v.is_finite()) {
                return Err(DatasetError::InvalidRow {
                    row,
                    reason: "non-finite feature value".to_string(),
                });
            }
        }
        if let Some(row) = self.labels.iter().position(|&l| l > 1) {
            return Err(DatasetError::InvalidRow {
                row,
                reason: format!("label {} is not 0 or 1", self.labels[row]),
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[must_use]
    pub fn width(&self) -> usize {
        if self.feature_names.is_empty() {
            self.rows.first().map_or(0, Vec::len)
        } else {
            self.feature_names.len()
        }
    }

    #[must_use]
    pub fn positives(&self) -> usize {
        self.labels.iter().filter(|&&l| l == 1).count()
    }
}

/// Index ranges splitting `len` items into `parts` contiguous chunks.
///
/// The first `len % parts` chunks get one extra item; chunks may be empty
/// when `parts > len`.
#[must_use]
pub fn split_ranges(len: usize, parts: usize) -> Vec<std::ops::Range<usize>> {
    if parts == 0 {
        return Vec::new();
    }
    let base = len / parts;
    let extra = len % parts;
    let mut start = 0;
    (0..parts)
        .map(|i| {
            let size = base + usize::from(i < extra);
            let range = start..start + size;
            start += size;
            range
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_ranges_like_array_split() {
        let ranges = split_ranges(10, 3);
        assert_eq!(ranges, vec![0..4, 4..7, 7..10]);

        let ranges = split_ranges(2, 4);
        assert_eq!(ranges, vec![0..1, 1..2, 2..2, 2..2]);
        assert!(split_ranges(5, 0).is_empty());
    }

    #[test]
    fn test_validation() {
        let ok = LabeledDataset::new(
            vec!["a".to_string(), "b".to_string()],
            vec![vec![1.0, 2.0], vec![3.0, 4.0]],
            vec![0, 1],
        )
        .expect("valid dataset");
        assert_eq!(ok.width(), 2);
        assert_eq!(ok.positives(), 1);

        assert!(matches!(
            LabeledDataset::new(vec![], vec![], vec![]),
            Err(DatasetError::Empty)
        ));
        assert!(matches!(
            LabeledDataset::new(vec![], vec![vec![1.0], vec![1.0, 2.0]], vec![0, 1]),
            Err(DatasetError::Ragged { row: 1, .. })
        ));
        assert!(matches!(
            LabeledDataset::new(vec![], vec![vec![1.0]], vec![2]),
            Err(DatasetError::InvalidRow { row: 0, .. })
        ));
    }
}
