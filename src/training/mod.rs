//! Model retraining

pub mod evaluation;
pub mod pipeline;
pub mod split;

pub use evaluation::ModelMetrics;
pub use pipeline::{
    fit_models, CorpusSource, RetrainMetrics, RetrainOptions, RetrainReport, RetrainingPipeline,
    TrainedModels,
};
pub use split::{train_test_split, Split};
