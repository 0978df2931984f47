//! Training corpus files

pub mod accumulator;
pub mod table;

pub use accumulator::DatasetAccumulator;
pub use table::{load_table, read_table, stage_table, write_table, Table};

pub const ORIGINAL_DATASET_FILE: &str = "cars_price_prediction_latest.csv";
pub const ACCUMULATED_DATASET_FILE: &str = "additional_dataset.csv";
pub const COMBINED_DATASET_FILE: &str = "combined_cars_price_prediction_latest.csv";
