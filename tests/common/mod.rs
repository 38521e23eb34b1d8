//! Synthetic Pima-style data shared by the integration tests.

#![allow(dead_code)]

use std::path::Path;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

pub const HEADER: [&str; 9] = [
    "Pregnancies",
    "Glucose",
    "BloodPressure",
    "SkinThickness",
    "Insulin",
    "BMI",
    "DiabetesPedigreeFunction",
    "Age",
    "Outcome",
];

/// Ground truth for the synthetic rows.
pub fn label(row: &[f64]) -> u8 {
    u8::from(row[1] > 140.0 || row[5] > 35.0)
}

/// `n` seeded rows of eight features.
pub fn synthetic_rows(n: usize, seed: u64) -> Vec<Vec<f64>> {
    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            vec![
                f64::from(rng.gen_range(0u8..10)),
                rng.gen_range(70.0..200.0),
                rng.gen_range(50.0..100.0),
                rng.gen_range(10.0..45.0),
                rng.gen_range(0.0..300.0),
                rng.gen_range(18.0..50.0),
                rng.gen_range(0.1..2.0),
                f64::from(rng.gen_range(21u8..70)),
            ]
        })
        .collect()
}

/// One row per branch of [`label`]: glucose only, BMI only, both, neither,
/// and both again well inside. Non-rule features sit mid-range.
pub fn held_out_rows() -> Vec<Vec<f64>> {
    vec![
        vec![4.0, 185.0, 75.0, 27.0, 150.0, 26.0, 1.0, 45.0],
        vec![4.0, 100.0, 75.0, 27.0, 150.0, 46.0, 1.0, 45.0],
        vec![4.0, 190.0, 75.0, 27.0, 150.0, 45.0, 1.0, 45.0],
        vec![4.0, 95.0, 75.0, 27.0, 150.0, 24.0, 1.0, 45.0],
        vec![2.0, 195.0, 80.0, 30.0, 120.0, 48.0, 0.8, 50.0],
    ]
}

/// Write labeled rows as a training CSV.
pub fn write_training_csv(path: &Path, rows: &[Vec<f64>]) {
    let mut writer = csv::Writer::from_path(path).expect("create csv");
    writer.write_record(HEADER).expect("header");
    for row in rows {
        let mut record: Vec<String> = row.iter().map(f64::to_string).collect();
        record.push(label(row).to_string());
        writer.write_record(&record).expect("row");
    }
    writer.flush().expect("flush");
}
