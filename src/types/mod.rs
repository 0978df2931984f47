//! Type definitions for the price estimation service

pub mod features;
pub mod prediction;

pub use features::{FeatureVector, LabeledExample};
pub use prediction::PricePrediction;
