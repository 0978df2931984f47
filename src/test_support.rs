//! Shared fixtures for unit tests

use crate::config::TrainingConfig;
use crate::dataset::{write_table, Table};
use crate::models::{BoostingParams, ModelBundle, NetworkParams};
use crate::synthetic::CorpusGenerator;
use crate::training::fit_models;
use std::path::Path;

/// Small budgets so a full fit takes well under a second.
pub fn training_config() -> TrainingConfig {
    TrainingConfig {
        test_size: 0.2,
        seed: 31,
        boosting: BoostingParams {
            n_estimators: 40,
            max_depth: 6,
            max_leaves: 32,
            ..BoostingParams::default()
        },
        network: NetworkParams {
            dropout: 0.1,
            learning_rate: 0.003,
            epochs: 40,
            batch_size: 32,
            early_stopping_patience: 10,
            ..NetworkParams::default()
        },
    }
}

pub fn corpus(rows: usize, seed: u64) -> Table {
    Table::from_examples(&CorpusGenerator::new(seed).examples(rows))
}

pub fn write_corpus(path: &Path, rows: usize, seed: u64) {
    write_table(path, &corpus(rows, seed)).unwrap();
}

/// Bundle fit on `rows` generated examples.
pub fn fit_bundle(rows: usize, seed: u64) -> ModelBundle {
    fit_models(&corpus(rows, seed), &training_config(), true)
        .unwrap()
        .bundle
}
