//! Vehicle feature vectors and labeled training examples

use crate::feature_schema::{FEATURE_COLUMNS, FEATURE_COUNT};
use serde::{Deserialize, Serialize};

/// Validated vehicle attributes in canonical column order.
///
/// Categorical fields hold label-codec codes; only
/// [`FeatureSchema::validate`](crate::feature_schema::FeatureSchema::validate)
/// should construct one from untrusted input.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    /// Encoded engine type
    pub engine_type: i64,
    /// Encoded fuel type
    pub fuel_type: i64,
    /// Encoded transmission type
    pub transmission: i64,
    /// Encoded body type
    pub body_type: i64,
    /// Whether the car has incident records (0/1)
    pub has_incidents: i64,
    /// Encoded wheel system
    pub wheel_system: i64,
    /// Engine horsepower
    pub horsepower: f64,
    /// Maximum seating capacity
    pub maximum_seating: i64,
    /// Mileage, non-negative
    pub mileage: f64,
    /// Engine torque
    pub torque: f64,
    /// Manufacturing year
    pub year: i64,
    /// Combined fuel economy (mpg)
    pub combined_fuel_economy: f64,
    /// Legroom in inches
    pub legroom: f64,
    /// Count of major options
    pub major_options_count: f64,
    /// Size of the vehicle in cubic feet
    pub size_of_vehicle: f64,
}

impl FeatureVector {
    /// Values in canonical column order, as every model consumes them.
    pub fn to_row(&self) -> [f64; FEATURE_COUNT] {
        [
            self.engine_type as f64,
            self.fuel_type as f64,
            self.transmission as f64,
            self.body_type as f64,
            self.has_incidents as f64,
            self.wheel_system as f64,
            self.horsepower,
            self.maximum_seating as f64,
            self.mileage,
            self.torque,
            self.year as f64,
            self.combined_fuel_economy,
            self.legroom,
            self.major_options_count,
            self.size_of_vehicle,
        ]
    }

    /// Rebuild from canonical-order values. Integer columns are truncated.
    pub fn from_row(row: &[f64; FEATURE_COUNT]) -> Self {
        Self {
            engine_type: row[0] as i64,
            fuel_type: row[1] as i64,
            transmission: row[2] as i64,
            body_type: row[3] as i64,
            has_incidents: row[4] as i64,
            wheel_system: row[5] as i64,
            horsepower: row[6],
            maximum_seating: row[7] as i64,
            mileage: row[8],
            torque: row[9],
            year: row[10] as i64,
            combined_fuel_economy: row[11],
            legroom: row[12],
            major_options_count: row[13],
            size_of_vehicle: row[14],
        }
    }

    /// Pairs of (column name, value) in canonical order.
    pub fn columns(&self) -> impl Iterator<Item = (&'static str, f64)> {
        FEATURE_COLUMNS.iter().copied().zip(self.to_row())
    }

    /// The example vehicle published with the prediction endpoint.
    pub fn example() -> Self {
        Self {
            engine_type: 6,
            fuel_type: 5,
            transmission: 0,
            body_type: 5,
            has_incidents: 0,
            wheel_system: 2,
            horsepower: 177.0,
            maximum_seating: 5,
            mileage: 7.0,
            torque: 200.0,
            year: 2019,
            combined_fuel_economy: 25.0,
            legroom: 76.3,
            major_options_count: 1.0,
            size_of_vehicle: 426.6,
        }
    }
}

/// A feature vector with its observed price, used only for training.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LabeledExample {
    #[serde(flatten)]
    pub features: FeatureVector,
    /// Price of the car (target variable)
    pub price: f64,
}

impl LabeledExample {
    pub fn new(features: FeatureVector, price: f64) -> Self {
        Self { features, price }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_follows_canonical_order() {
        let features = FeatureVector::example();
        let row = features.to_row();

        assert_eq!(row.len(), FEATURE_COLUMNS.len());
        let by_name: Vec<(&str, f64)> = features.columns().collect();
        assert_eq!(by_name[0], ("engine_type", 6.0));
        assert_eq!(by_name[8], ("mileage", 7.0));
        assert_eq!(by_name[10], ("year", 2019.0));
        assert_eq!(by_name[14], ("size_of_vehicle", 426.6));
        assert_eq!(FeatureVector::from_row(&row), features);
    }

    #[test]
    fn test_labeled_example_serializes_flat() {
        let example = LabeledExample::new(FeatureVector::example(), 10.532);

        let json = serde_json::to_value(example).unwrap();
        let object = json.as_object().unwrap();

        assert_eq!(object.len(), FEATURE_COUNT + 1);
        assert_eq!(object["price"], 10.532);
        assert_eq!(object["year"], 2019);
    }
}
