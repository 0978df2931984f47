//! Regression models and the machinery that serves them

pub mod boosting;
pub mod bundle;
pub mod inference;
pub mod linear;
pub mod network;
pub mod store;

pub use boosting::{BoostingParams, GradientBoostedTrees};
pub use bundle::ModelBundle;
pub use inference::InferenceEngine;
pub use linear::LinearRegression;
pub use network::{FeedForwardNetwork, NetworkParams, TrainingHistory};
pub use store::ArtifactStore;
