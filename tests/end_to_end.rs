//! Full pipeline in-process: federated training, client encryption, blind
//! scoring, client decryption.

mod common;

use std::sync::Arc;

use glycosecure::adapters::csv::{read_feature_rows, CsvDataset};
use glycosecure::adapters::gaussian::{GaussianMechanism, PrivacyConfig};
use glycosecure::adapters::{CkksEngine, FileStore};
use glycosecure::application::{
    ClientSession, FederatedTrainer, InferenceService, ModelRegistry, SessionState, TrainingConfig,
};
use glycosecure::domain::SchemeParameters;
use glycosecure::ports::ArtifactStore;

fn run_pipeline(seed: u64) {
    let dir = tempfile::tempdir().expect("tempdir");
    let csv_path = dir.path().join("train.csv");
    common::write_training_csv(&csv_path, &common::synthetic_rows(50, seed));

    let store = Arc::new(FileStore::new(dir.path()).expect("store"));
    let trainer = FederatedTrainer::new(
        TrainingConfig::default(),
        Arc::new(GaussianMechanism::with_config(PrivacyConfig::default())),
    );
    let registry = Arc::new(ModelRegistry::new(
        Arc::clone(&store),
        trainer,
        Arc::new(CsvDataset::new(&csv_path)),
    ));
    let engine = Arc::new(CkksEngine::new());
    let service = InferenceService::new(Arc::clone(&engine), registry, false);

    // First request trains and persists the bundle.
    let params = service.params().expect("params");
    assert!(store.has_bundle().expect("has bundle"));
    let bundle = store.load_bundle().expect("load").expect("bundle present");
    assert_eq!(params.model_fingerprint, bundle.fingerprint());
    assert_eq!(params.input_width, 8);
    assert!(params.weights.is_none());

    let held_out = common::held_out_rows();
    let mut session = ClientSession::new(Arc::clone(&engine), SchemeParameters::default());
    session.accept_params(params).expect("accept params");
    session.encrypt_rows(&held_out).expect("encrypt");
    let (batch, context) = session.submission().expect("submission");
    let response = service.predict(&batch, &context).expect("predict");
    session.accept_results(response).expect("accept results");
    let predictions = session.decrypt().expect("decrypt").to_vec();
    assert_eq!(session.state(), SessionState::Decrypted);
    assert_eq!(predictions.len(), held_out.len());

    let mut disagreements = 0;
    for (row, prediction) in held_out.iter().zip(&predictions) {
        let prediction = prediction.as_ref().expect("no skipped rows");
        let plain = bundle
            .score_transformed(&bundle.transform(row).expect("transform"))
            .expect("score");
        assert!(
            (prediction.score - plain).abs() < 1e-3,
            "encrypted {} vs plaintext {plain}",
            prediction.score
        );
        if prediction.label != common::label(row) {
            disagreements += 1;
        }
    }
    assert!(
        disagreements <= 1,
        "seed {seed}: {disagreements} disagreements with the glucose/BMI rule"
    );
}

#[test]
fn test_encrypted_labels_follow_glucose_bmi_rule() {
    for seed in [7, 8, 9] {
        run_pipeline(seed);
    }
}

#[test]
fn test_client_reads_training_csv_without_label() {
    let dir = tempfile::tempdir().expect("tempdir");
    let csv_path = dir.path().join("input.csv");
    let rows = common::synthetic_rows(6, 11);
    common::write_training_csv(&csv_path, &rows);

    let names: Vec<String> = common::HEADER[..8].iter().map(|s| s.to_string()).collect();
    let read = read_feature_rows(&csv_path, "Outcome", Some(names.as_slice())).expect("read");
    assert_eq!(read.len(), rows.len());
    for (got, want) in read.iter().zip(&rows) {
        assert_eq!(got.len(), 8);
        for (a, b) in got.iter().zip(want) {
            assert!((a - b).abs() < 1e-9);
        }
    }
}
