//! Car Price Estimation Service Library
//!
//! Validates vehicle descriptions, scores them with a linear regressor, a
//! gradient-boosted tree ensemble and a feed-forward network, accumulates
//! labeled rows and retrains all three models behind one atomic swap.

pub mod api;
pub mod config;
pub mod dataset;
pub mod error;
pub mod feature_schema;
pub mod label_codec;
pub mod metrics;
pub mod models;
pub mod scaler;
pub mod service;
pub mod staging;
pub mod synthetic;
pub mod training;
pub mod types;

#[cfg(test)]
mod test_support;

pub use config::AppConfig;
pub use error::{Result, SchemaError, ServiceError};
pub use feature_schema::FeatureSchema;
pub use label_codec::LabelCodec;
pub use models::{InferenceEngine, ModelBundle};
pub use service::PriceService;
pub use types::{FeatureVector, LabeledExample, PricePrediction};
