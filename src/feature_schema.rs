//! Feature schema and input validation.
//!
//! Defines the fixed column order every model expects and turns raw JSON
//! objects into [`FeatureVector`]s. The prediction path and the training-row
//! path share the same checks; the training path additionally requires `price`.

use crate::error::SchemaError;
use crate::label_codec::LabelCodec;
use crate::types::features::{FeatureVector, LabeledExample};
use chrono::Datelike;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Number of model input features.
pub const FEATURE_COUNT: usize = 15;

/// Canonical column order shared by the scaler and all three models.
pub const FEATURE_COLUMNS: [&str; FEATURE_COUNT] = [
    "engine_type",
    "fuel_type",
    "transmission",
    "body_type",
    "has_incidents",
    "wheel_system",
    "horsepower",
    "maximum_seating",
    "mileage",
    "torque",
    "year",
    "combined_fuel_economy",
    "legroom",
    "major_options_count",
    "size_of_vehicle",
];

/// Training target column.
pub const TARGET_COLUMN: &str = "price";

/// Earliest accepted manufacturing year.
pub const MIN_YEAR: i64 = 1900;

/// Feature columns followed by the target, the layout of every dataset file.
pub fn required_columns() -> Vec<&'static str> {
    FEATURE_COLUMNS
        .iter()
        .copied()
        .chain(std::iter::once(TARGET_COLUMN))
        .collect()
}

/// How a column's value is typed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureKind {
    /// Integer code resolved through the label codec
    Categorical,
    /// Plain integer
    Integer,
    /// Any finite number
    Float,
}

impl FeatureKind {
    pub fn of(column: &str) -> Option<Self> {
        match column {
            "engine_type" | "fuel_type" | "transmission" | "body_type" | "has_incidents"
            | "wheel_system" => Some(FeatureKind::Categorical),
            "maximum_seating" | "year" => Some(FeatureKind::Integer),
            "horsepower" | "mileage" | "torque" | "combined_fuel_economy" | "legroom"
            | "major_options_count" | "size_of_vehicle" => Some(FeatureKind::Float),
            _ => None,
        }
    }

    fn is_integral(self) -> bool {
        !matches!(self, FeatureKind::Float)
    }
}

/// Validates raw inputs against the column contract and the label codec.
#[derive(Debug, Clone)]
pub struct FeatureSchema {
    codec: Arc<LabelCodec>,
    current_year: Option<i64>,
}

impl FeatureSchema {
    /// Schema validating coded fields against `codec`, with the year bound taken from the clock.
    pub fn new(codec: Arc<LabelCodec>) -> Self {
        Self {
            codec,
            current_year: None,
        }
    }

    /// Pin the reference year instead of reading the clock.
    pub fn with_current_year(mut self, year: i64) -> Self {
        self.current_year = Some(year);
        self
    }

    pub fn codec(&self) -> &LabelCodec {
        &self.codec
    }

    /// Number of model inputs.
    pub fn feature_count(&self) -> usize {
        FEATURE_COUNT
    }

    /// Model inputs in canonical order.
    pub fn feature_names(&self) -> Vec<&'static str> {
        FEATURE_COLUMNS.to_vec()
    }

    /// Latest accepted manufacturing year (current year + 1).
    pub fn max_year(&self) -> i64 {
        let current = self
            .current_year
            .unwrap_or_else(|| chrono::Utc::now().year() as i64);
        current + 1
    }

    /// Validate a prediction request body.
    pub fn validate(&self, raw: &Map<String, Value>) -> Result<FeatureVector, SchemaError> {
        let mut errors = SchemaError::new();
        let row = self.check(raw, false, &mut errors);
        errors.into_result(FeatureVector::from_row(&row))
    }

    /// Validate a training-row body; `price` is required in addition to the features.
    pub fn validate_labeled(
        &self,
        raw: &Map<String, Value>,
    ) -> Result<LabeledExample, SchemaError> {
        let mut errors = SchemaError::new();
        let row = self.check(raw, true, &mut errors);

        let price = match raw.get(TARGET_COLUMN) {
            None | Some(Value::Null) => {
                errors.push(TARGET_COLUMN, "field required");
                0.0
            }
            Some(value) => match parse_number(value, FeatureKind::Float) {
                Ok(price) => price,
                Err(message) => {
                    errors.push(TARGET_COLUMN, message);
                    0.0
                }
            },
        };

        errors.into_result(LabeledExample::new(FeatureVector::from_row(&row), price))
    }

    /// Collect every violation into `errors`, returning the canonical-order values.
    fn check(
        &self,
        raw: &Map<String, Value>,
        allow_target: bool,
        errors: &mut SchemaError,
    ) -> [f64; FEATURE_COUNT] {
        for key in raw.keys() {
            let known = FEATURE_COLUMNS.contains(&key.as_str())
                || (allow_target && key == TARGET_COLUMN);
            if !known {
                errors.push(key.clone(), "unexpected field");
            }
        }

        let mut row = [0.0; FEATURE_COUNT];
        for (idx, &column) in FEATURE_COLUMNS.iter().enumerate() {
            let kind = FeatureKind::of(column).unwrap_or(FeatureKind::Float);

            let value = match raw.get(column) {
                None | Some(Value::Null) => {
                    errors.push(column, "field required");
                    continue;
                }
                Some(value) => match parse_number(value, kind) {
                    Ok(v) => v,
                    Err(message) => {
                        errors.push(column, message);
                        continue;
                    }
                },
            };

            if let Some(message) = self.check_range(column, kind, value) {
                errors.push(column, message);
            }
            row[idx] = value;
        }

        row
    }

    fn check_range(&self, column: &str, kind: FeatureKind, value: f64) -> Option<String> {
        match column {
            "mileage" if value < 0.0 => Some("mileage must be a non-negative number".to_string()),
            "year" => {
                let max_year = self.max_year();
                let year = value as i64;
                if (MIN_YEAR..=max_year).contains(&year) {
                    None
                } else {
                    Some(format!(
                        "year must be between {} and {}",
                        MIN_YEAR, max_year
                    ))
                }
            }
            _ if kind == FeatureKind::Categorical => {
                let code = value as i64;
                // Fields without a mapping are not checked
                match self.codec.contains_code(column, code) {
                    Some(false) => Some(format!(
                        "invalid code '{}' for field '{}', valid codes are {:?}",
                        code,
                        column,
                        self.codec.valid_codes(column).unwrap_or_default()
                    )),
                    _ => None,
                }
            }
            _ => None,
        }
    }
}

/// Coerce a JSON value to a number of the given kind.
fn parse_number(value: &Value, kind: FeatureKind) -> Result<f64, String> {
    let number = match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| "value is not a representable number".to_string())?,
        Value::Bool(b) if kind.is_integral() => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        other => return Err(format!("expected a number, got {}", json_type(other))),
    };

    if !number.is_finite() {
        return Err("value must be finite".to_string());
    }
    if kind.is_integral() && number.fract() != 0.0 {
        return Err(format!("expected an integer, got {}", number));
    }

    Ok(number)
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
