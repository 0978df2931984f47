//! Bidirectional mapping between categorical labels and the integer codes models consume

use crate::error::{Result, ServiceError};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

/// Field name -> (label -> code), the on-disk shape of `label_mappings.json`.
pub type LabelMappings = BTreeMap<String, BTreeMap<String, i64>>;

/// Label codec loaded once at startup. Immutable afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelCodec {
    forward: LabelMappings,
    reverse: BTreeMap<String, BTreeMap<i64, String>>,
}

impl LabelCodec {
    /// Build a codec, rejecting tables where two labels of one field share a code.
    pub fn from_mappings(forward: LabelMappings) -> Result<Self> {
        let mut reverse = BTreeMap::new();

        for (field, mapping) in &forward {
            let mut codes = BTreeMap::new();
            for (label, &code) in mapping {
                if let Some(previous) = codes.insert(code, label.clone()) {
                    return Err(ServiceError::StartupConfig(format!(
                        "labels '{}' and '{}' of field '{}' share code {}",
                        previous, label, field, code
                    )));
                }
            }
            reverse.insert(field.clone(), codes);
        }

        Ok(Self { forward, reverse })
    }

    /// Load the static table from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| ServiceError::io(path, e))?;
        let mappings: LabelMappings =
            serde_json::from_str(&raw).map_err(|e| ServiceError::json(path, e))?;
        let codec = Self::from_mappings(mappings)?;

        info!(
            path = %path.display(),
            fields = codec.forward.len(),
            "Label mappings loaded"
        );

        Ok(codec)
    }

    /// The vocabulary the service ships with, used when bootstrapping a fresh deployment.
    pub fn standard() -> Self {
        fn table(labels: &[&str]) -> BTreeMap<String, i64> {
            labels
                .iter()
                .enumerate()
                .map(|(code, label)| (label.to_string(), code as i64))
                .collect()
        }

        let mut forward = LabelMappings::new();
        forward.insert(
            "engine_type".to_string(),
            table(&[
                "H4", "H4 Hybrid", "H6", "I2", "I3", "I3 Hybrid", "I4", "I4 Diesel",
                "I4 Flex Fuel Vehicle", "I4 Hybrid", "I5", "I6", "I6 Diesel", "R2", "V10",
                "V12", "V6", "V6 Diesel", "V6 Flex Fuel Vehicle", "V6 Hybrid", "V8",
                "V8 Diesel", "V8 Flex Fuel Vehicle", "W12",
            ]),
        );
        forward.insert(
            "fuel_type".to_string(),
            table(&[
                "Biodiesel",
                "Compressed Natural Gas",
                "Diesel",
                "Electric",
                "Flex Fuel Vehicle",
                "Gasoline",
                "Hybrid",
                "Propane",
            ]),
        );
        forward.insert(
            "transmission".to_string(),
            table(&["A", "CVT", "Dual Clutch", "M"]),
        );
        forward.insert(
            "body_type".to_string(),
            table(&[
                "Convertible",
                "Coupe",
                "Hatchback",
                "Minivan",
                "Pickup Truck",
                "SUV / Crossover",
                "Sedan",
                "Van",
                "Wagon",
            ]),
        );
        forward.insert("has_incidents".to_string(), table(&["False", "True"]));
        forward.insert(
            "wheel_system".to_string(),
            table(&["4WD", "4X2", "AWD", "FWD", "RWD"]),
        );

        // Codes come from positions, so they are unique per field.
        let reverse = forward
            .iter()
            .map(|(field, mapping)| {
                let codes = mapping
                    .iter()
                    .map(|(label, &code)| (code, label.clone()))
                    .collect();
                (field.clone(), codes)
            })
            .collect();

        Self { forward, reverse }
    }

    /// Encode a human-readable label for `field`.
    pub fn encode(&self, field: &str, label: &str) -> Result<i64> {
        let mapping = self
            .forward
            .get(field)
            .ok_or_else(|| ServiceError::UnknownField {
                field: field.to_string(),
            })?;

        mapping
            .get(label)
            .copied()
            .ok_or_else(|| ServiceError::UnknownLabel {
                field: field.to_string(),
                label: label.to_string(),
                valid: mapping.keys().cloned().collect(),
            })
    }

    /// Decode an integer code for `field` back to its label.
    pub fn decode(&self, field: &str, code: i64) -> Result<&str> {
        let mapping = self
            .reverse
            .get(field)
            .ok_or_else(|| ServiceError::UnknownField {
                field: field.to_string(),
            })?;

        mapping
            .get(&code)
            .map(String::as_str)
            .ok_or_else(|| ServiceError::UnknownCode {
                field: field.to_string(),
                code,
                valid: mapping.keys().copied().collect(),
            })
    }

    /// Valid codes for a field, or `None` when the field has no mapping.
    pub fn valid_codes(&self, field: &str) -> Option<Vec<i64>> {
        self.reverse
            .get(field)
            .map(|codes| codes.keys().copied().collect())
    }

    /// Whether `code` is known for `field`; `None` when the field has no mapping.
    pub fn contains_code(&self, field: &str, code: i64) -> Option<bool> {
        self.reverse.get(field).map(|codes| codes.contains_key(&code))
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.forward.keys().map(String::as_str)
    }

    /// The full label-to-code table.
    pub fn mappings(&self) -> &LabelMappings {
        &self.forward
    }

    /// Persist the table as JSON.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let json =
            serde_json::to_string_pretty(&self.forward).map_err(|e| ServiceError::json(path, e))?;
        std::fs::write(path, json).map_err(|e| ServiceError::io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_over_full_codec() {
        let codec = LabelCodec::standard();

        for field in codec.fields() {
            for (label, &code) in &codec.mappings()[field] {
                assert_eq!(codec.decode(field, codec.encode(field, label).unwrap()).unwrap(), label);
                assert_eq!(codec.encode(field, codec.decode(field, code).unwrap()).unwrap(), code);
            }
        }
    }

    #[test]
    fn test_example_codes_are_known() {
        let codec = LabelCodec::standard();
        assert_eq!(codec.encode("fuel_type", "Gasoline").unwrap(), 5);
        assert_eq!(codec.encode("body_type", "SUV / Crossover").unwrap(), 5);
        assert_eq!(codec.encode("engine_type", "I4").unwrap(), 6);
        assert_eq!(codec.decode("wheel_system", 2).unwrap(), "AWD");
        assert_eq!(codec.decode("transmission", 0).unwrap(), "A");
    }

    #[test]
    fn test_lookup_misses() {
        let codec = LabelCodec::standard();

        assert!(matches!(
            codec.encode("color", "red"),
            Err(ServiceError::UnknownField { .. })
        ));
        assert!(matches!(
            codec.encode("fuel_type", "Steam"),
            Err(ServiceError::UnknownLabel { .. })
        ));
        assert!(matches!(
            codec.decode("fuel_type", 99),
            Err(ServiceError::UnknownCode { code: 99, .. })
        ));
        assert!(matches!(
            codec.decode("color", 0),
            Err(ServiceError::UnknownField { .. })
        ));
    }

    #[test]
    fn test_duplicate_codes_rejected() {
        let mut mappings = LabelMappings::new();
        let mut fuel = BTreeMap::new();
        fuel.insert("Diesel".to_string(), 1);
        fuel.insert("Gasoline".to_string(), 1);
        mappings.insert("fuel_type".to_string(), fuel);

        assert!(matches!(
            LabelCodec::from_mappings(mappings),
            Err(ServiceError::StartupConfig(_))
        ));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("label_mappings.json");

        let codec = LabelCodec::standard();
        codec.save(&path).unwrap();
        let loaded = LabelCodec::load(&path).unwrap();

        assert_eq!(loaded, codec);
        assert_eq!(loaded.contains_code("has_incidents", 1), Some(true));
        assert_eq!(loaded.contains_code("has_incidents", 2), Some(false));
        assert_eq!(loaded.contains_code("horsepower", 2), None);
    }
}
