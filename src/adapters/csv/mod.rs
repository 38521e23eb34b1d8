//! CSV adapter: training data source, client input rows, prediction output.

use std::path::{Path, PathBuf};

use crate::adapters::fs::{write_atomic, StorageError};
use crate::domain::{DatasetError, LabeledDataset, PredictionRecord};
use crate::ports::DatasetSource;

/// Default name of the label column.
pub const DEFAULT_LABEL_COLUMN: &str = "Outcome";

/// Labeled CSV file with a header row.
#[derive(Debug, Clone)]
pub struct CsvDataset {
    path: PathBuf,
    label_column: String,
}

impl CsvDataset {
    #[must_use]
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self::with_label_column(path, DEFAULT_LABEL_COLUMN)
    }

    #[must_use]
    pub fn with_label_column<P: AsRef<Path>>(path: P, label_column: &str) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            label_column: label_column.to_string(),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DatasetSource for CsvDataset {
    fn load_training_set(&self) -> Result<LabeledDataset, DatasetError> {
        let table = read_table(&self.path)?;
        let label_idx = table
            .headers
            .iter()
            .position(|h| h == &self.label_column)
            .ok_or_else(|| DatasetError::MissingLabelColumn(self.label_column.clone()))?;

        let feature_names: Vec<String> = table
            .headers
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != label_idx)
            .map(|(_, h)| h.clone())
            .collect();

        let mut rows = Vec::with_capacity(table.rows.len());
        let mut labels = Vec::with_capacity(table.rows.len());
        for (row_idx, mut values) in table.rows.into_iter().enumerate() {
            let label = values.remove(label_idx);
            let label = if label == 0.0 {
                0
            } else if label == 1.0 {
                1
            } else {
                return Err(DatasetError::InvalidRow {
                    row: row_idx,
                    reason: format!("label {label} is not 0 or 1"),
                });
            };
            rows.push(values);
            labels.push(label);
        }

        let dataset = LabeledDataset::new(feature_names, rows, labels)?;
        tracing::info!(
            "Loaded {} training rows ({} positive) from {}",
            dataset.len(),
            dataset.positives(),
            self.path.display()
        );
        Ok(dataset)
    }

    fn describe(&self) -> String {
        format!("csv:{}", self.path.display())
    }
}

struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<f64>>,
}

fn read_table(path: &Path) -> Result<Table, DatasetError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)?;
    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();

    let mut rows = Vec::new();
    for (row_idx, record) in reader.records().enumerate() {
        let record = record?;
        if record.len() != headers.len() {
            return Err(DatasetError::Ragged {
                row: row_idx,
                expected: headers.len(),
                found: record.len(),
            });
        }
        let values = record
            .iter()
            .enumerate()
            .map(|(col, field)| {
                field
                    .parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite())
                    .ok_or_else(|| DatasetError::InvalidRow {
                        row: row_idx,
                        reason: format!("column '{}' is not a number: {field:?}", headers[col]),
                    })
            })
            .collect::<Result<Vec<f64>, _>>()?;
        rows.push(values);
    }

    if rows.is_empty() {
        return Err(DatasetError::Empty);
    }
    Ok(Table { headers, rows })
}

/// Read unlabeled feature rows for inference.
///
/// The label column is dropped if present. When `expected` names are given
/// and every one appears in the header, columns are reordered to match;
/// otherwise columns are taken positionally.
///
/// # Errors
/// Returns error if the file cannot be read or holds a non-numeric cell.
pub fn read_feature_rows<P: AsRef<Path>>(
    path: P,
    label_column: &str,
    expected: Option<&[String]>,
) -> Result<Vec<Vec<f64>>, DatasetError> {
    let table = read_table(path.as_ref())?;
    let label_idx = table.headers.iter().position(|h| h == label_column);

    let columns: Vec<usize> = match expected {
        Some(names) if names.iter().all(|n| table.headers.contains(n)) => names
            .iter()
            .filter_map(|n| table.headers.iter().position(|h| h == n))
            .collect(),
        _ => {
            if expected.is_some() {
                tracing::warn!("Input header does not match model features; using column order");
            }
            (0..table.headers.len())
                .filter(|&i| Some(i) != label_idx)
                .collect()
        }
    };

    Ok(table
        .rows
        .into_iter()
        .map(|row| columns.iter().map(|&i| row[i]).collect())
        .collect())
}

/// Write `Prediction,Score` rows; skipped rows get empty cells.
///
/// # Errors
/// Returns error if the file cannot be written.
pub fn write_predictions<P: AsRef<Path>>(
    path: P,
    predictions: &[Option<PredictionRecord>],
) -> Result<(), StorageError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    let to_storage = |e: csv::Error| StorageError::Serialization(e.to_string());

    writer
        .write_record(["Prediction", "Score"])
        .map_err(to_storage)?;
    for prediction in predictions {
        match prediction {
            Some(record) => writer
                .write_record([
                    record.label.to_string(),
                    format!("{:.4}", record.score),
                ])
                .map_err(to_storage)?,
            None => writer.write_record(["", ""]).map_err(to_storage)?,
        }
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    write_atomic(path.as_ref(), &bytes, false)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
Pregnancies,Glucose,BMI,Outcome
1, 85, 26.6, 0
8, 183, 23.3, 1
1, 89, 28.1, 0
";

    fn write_sample(dir: &Path, contents: &str) -> PathBuf {
        let path = dir.join("data.csv");
        std::fs::write(&path, contents).expect("write csv");
        path
    }

    #[test]
    fn test_load_training_set() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = CsvDataset::new(write_sample(dir.path(), SAMPLE));
        let dataset = source.load_training_set().expect("load");
        assert_eq!(dataset.feature_names, vec!["Pregnancies", "Glucose", "BMI"]);
        assert_eq!(dataset.len(), 3);
        assert_eq!(dataset.labels, vec![0, 1, 0]);
        assert_eq!(dataset.rows[1], vec![8.0, 183.0, 23.3]);
        assert!(source.describe().starts_with("csv:"));
    }

    #[test]
    fn test_missing_label_column() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = CsvDataset::with_label_column(write_sample(dir.path(), SAMPLE), "Label");
        assert!(matches!(
            source.load_training_set(),
            Err(DatasetError::MissingLabelColumn(_))
        ));
    }

    #[test]
    fn test_non_numeric_cell_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_sample(dir.path(), "Glucose,Outcome\nhigh,1\n");
        assert!(matches!(
            CsvDataset::new(path).load_training_set(),
            Err(DatasetError::InvalidRow { row: 0, .. })
        ));
    }

    #[test]
    fn test_read_feature_rows_drops_label_and_reorders() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_sample(dir.path(), SAMPLE);

        let rows = read_feature_rows(&path, "Outcome", None).expect("rows");
        assert_eq!(rows[0], vec![1.0, 85.0, 26.6]);

        let expected = vec!["BMI".to_string(), "Glucose".to_string()];
        let rows = read_feature_rows(&path, "Outcome", Some(&expected)).expect("rows");
        assert_eq!(rows[1], vec![23.3, 183.0]);
    }

    #[test]
    fn test_write_predictions_with_skipped_rows() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("predictions.csv");
        let predictions = vec![
            Some(PredictionRecord {
                label: 1,
                score: 0.912_345,
            }),
            None,
            Some(PredictionRecord {
                label: 0,
                score: 0.1,
            }),
        ];
        write_predictions(&path, &predictions).expect("write");
        let text = std::fs::read_to_string(&path).expect("read");
        assert_eq!(text, "Prediction,Score\n1,0.9123\n,\n0,0.1000\n");
    }
}
