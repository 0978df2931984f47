//! On-disk artifact set: schema, label mappings, scaler and the three models

use crate::error::{Result, ServiceError};
use crate::feature_schema::FEATURE_COLUMNS;
use crate::label_codec::LabelCodec;
use crate::models::boosting::GradientBoostedTrees;
use crate::models::bundle::ModelBundle;
use crate::models::linear::LinearRegression;
use crate::models::network::FeedForwardNetwork;
use crate::scaler::StandardScaler;
use crate::staging::StagedFile;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

pub const FEATURE_COLUMNS_FILE: &str = "feature_columns.json";
pub const LABEL_MAPPINGS_FILE: &str = "label_mappings.json";
pub const LINEAR_MODEL_FILE: &str = "lr_price_prediction.json";
pub const BOOSTING_MODEL_FILE: &str = "gbt_price_prediction.json";
pub const NETWORK_MODEL_FILE: &str = "mlp_price_prediction.json";
pub const SCALER_FILE: &str = "scaler_price_prediction.json";

/// Files that must exist before the service may start.
pub const REQUIRED_FILES: [&str; 6] = [
    LINEAR_MODEL_FILE,
    BOOSTING_MODEL_FILE,
    NETWORK_MODEL_FILE,
    SCALER_FILE,
    FEATURE_COLUMNS_FILE,
    LABEL_MAPPINGS_FILE,
];

/// Reads and writes the artifact directory.
///
/// There is exactly one artifact set on disk. Saving overwrites it file by
/// file; each file is written to a temporary sibling and renamed into place.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    /// Store rooted at `dir`. Nothing is read until asked.
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of `file` inside the store.
    pub fn path(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }

    /// Fail with the first required file that is missing.
    pub fn check_required(&self) -> Result<()> {
        for file in REQUIRED_FILES {
            let path = self.path(file);
            if !path.is_file() {
                return Err(ServiceError::StartupConfig(format!(
                    "required file not found: {}",
                    path.display()
                )));
            }
        }
        Ok(())
    }

    pub fn load_codec(&self) -> Result<LabelCodec> {
        LabelCodec::load(self.path(LABEL_MAPPINGS_FILE))
    }

    /// Replace `label_mappings.json`.
    pub fn save_codec(&self, codec: &LabelCodec) -> Result<()> {
        self.create_dir()?;
        stage_json(&self.path(LABEL_MAPPINGS_FILE), codec.mappings())?.commit()
    }

    /// Verify the persisted column list matches the canonical order.
    pub fn check_feature_columns(&self) -> Result<()> {
        let path = self.path(FEATURE_COLUMNS_FILE);
        let columns: Vec<String> = read_json(&path)?;

        if columns.len() != FEATURE_COLUMNS.len()
            || columns.iter().zip(FEATURE_COLUMNS).any(|(a, b)| a != b)
        {
            return Err(ServiceError::StartupConfig(format!(
                "{} lists {:?}, expected {:?}",
                path.display(),
                columns,
                FEATURE_COLUMNS
            )));
        }
        Ok(())
    }

    /// Load the scaler and all three models as one bundle.
    pub fn load_bundle(&self) -> Result<ModelBundle> {
        self.check_required()?;

        let scaler: StandardScaler = read_json(&self.path(SCALER_FILE))?;
        let linear: LinearRegression = read_json(&self.path(LINEAR_MODEL_FILE))?;
        let boosting: GradientBoostedTrees = read_json(&self.path(BOOSTING_MODEL_FILE))?;
        let network: FeedForwardNetwork = read_json(&self.path(NETWORK_MODEL_FILE))?;

        let bundle = ModelBundle::new(scaler, linear, boosting, Some(network))
            .map_err(|e| ServiceError::StartupConfig(e.to_string()))?;

        info!(
            dir = %self.dir.display(),
            version = %bundle.version(),
            trees = bundle.boosting().n_trees(),
            "Model artifacts loaded"
        );

        Ok(bundle)
    }

    /// Persist every artifact of `bundle` plus the feature-column list.
    pub fn save(&self, bundle: &ModelBundle) -> Result<()> {
        self.stage(bundle)?.commit()
    }

    /// Write every artifact of `bundle` to temporaries without replacing anything.
    ///
    /// All serialization and writes happen here, so a failure leaves the
    /// current artifact set untouched.
    pub fn stage(&self, bundle: &ModelBundle) -> Result<StagedArtifacts> {
        self.create_dir()?;

        let mut files = vec![
            stage_json(&self.path(FEATURE_COLUMNS_FILE), &FEATURE_COLUMNS)?,
            stage_json(&self.path(SCALER_FILE), bundle.scaler())?,
            stage_json(&self.path(LINEAR_MODEL_FILE), bundle.linear())?,
            stage_json(&self.path(BOOSTING_MODEL_FILE), bundle.boosting())?,
        ];

        let network_path = self.path(NETWORK_MODEL_FILE);
        let stale_network = match bundle.network() {
            Some(network) => {
                files.push(stage_json(&network_path, network)?);
                None
            }
            None if network_path.exists() => Some(network_path),
            None => None,
        };

        Ok(StagedArtifacts {
            dir: self.dir.clone(),
            version: bundle.version(),
            files,
            stale_network,
        })
    }

    fn create_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir).map_err(|e| ServiceError::io(&self.dir, e))
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path).map_err(|e| ServiceError::io(path, e))?;
    serde_json::from_str(&raw).map_err(|e| ServiceError::json(path, e))
}

/// Serialize `value` into a staged file for `path`.
fn stage_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<StagedFile> {
    let json = serde_json::to_vec(value).map_err(|e| ServiceError::json(path, e))?;
    StagedFile::write(path, &json)
}

/// A complete artifact set written beside the live one.
///
/// Dropping it without [`commit`](StagedArtifacts::commit) discards the
/// temporaries and leaves the live set as it was.
#[derive(Debug)]
pub struct StagedArtifacts {
    dir: PathBuf,
    version: Uuid,
    files: Vec<StagedFile>,
    /// Older network file to remove when the new bundle has none
    stale_network: Option<PathBuf>,
}

impl StagedArtifacts {
    /// Version of the bundle being persisted.
    pub fn version(&self) -> Uuid {
        self.version
    }

    /// Rename every staged file into place.
    ///
    /// A bundle without a network removes any older network file so the
    /// directory never pairs the new scaler with a stale network.
    pub fn commit(self) -> Result<()> {
        for file in self.files {
            file.commit()?;
        }

        if let Some(path) = &self.stale_network {
            std::fs::remove_file(path).map_err(|e| ServiceError::io(path, e))?;
            warn!(
                path = %path.display(),
                "Removed stale network artifact; service restart requires a retrain with the network"
            );
        }

        info!(
            dir = %self.dir.display(),
            version = %self.version,
            "Model artifacts saved"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use crate::types::FeatureVector;

    #[test]
    fn test_missing_file_named() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());

        let err = store.check_required().unwrap_err();
        assert!(matches!(err, ServiceError::StartupConfig(_)));
        assert!(err.to_string().contains(LINEAR_MODEL_FILE));
    }

    #[test]
    fn test_save_then_load_predicts_identically() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("trained_models"));
        let bundle = test_support::fit_bundle(300, 5);

        store.save(&bundle).unwrap();
        store.save_codec(&LabelCodec::standard()).unwrap();
        store.check_feature_columns().unwrap();

        let loaded = store.load_bundle().unwrap();
        let example = FeatureVector::example();
        assert_eq!(
            loaded.predict(&example).unwrap(),
            bundle.predict(&example).unwrap()
        );
        assert_ne!(loaded.version(), bundle.version());
        assert_eq!(store.load_codec().unwrap(), LabelCodec::standard());
    }

    #[test]
    fn test_bundle_without_network_removes_stale_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let bundle = test_support::fit_bundle(300, 5);
        store.save(&bundle).unwrap();
        assert!(store.path(NETWORK_MODEL_FILE).exists());

        let without = ModelBundle::new(
            bundle.scaler().clone(),
            bundle.linear().clone(),
            bundle.boosting().clone(),
            None,
        )
        .unwrap();
        store.save(&without).unwrap();

        assert!(!store.path(NETWORK_MODEL_FILE).exists());
        assert!(!store.path(&format!("{}.tmp", SCALER_FILE)).exists());
    }

    #[test]
    fn test_uncommitted_stage_leaves_live_set() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let live = test_support::fit_bundle(300, 5);
        store.save(&live).unwrap();
        let scaler_before = std::fs::read(store.path(SCALER_FILE)).unwrap();

        let staged = store.stage(&test_support::fit_bundle(300, 6)).unwrap();
        assert_eq!(std::fs::read(store.path(SCALER_FILE)).unwrap(), scaler_before);
        drop(staged);

        assert_eq!(std::fs::read(store.path(SCALER_FILE)).unwrap(), scaler_before);
        let leftovers = std::fs::read_dir(dir.path())
            .unwrap()
            .filter(|entry| {
                entry.as_ref().unwrap().path().extension() == Some(std::ffi::OsStr::new("tmp"))
            })
            .count();
        assert_eq!(leftovers, 0);
    }

    fn saved_store(dir: &Path) -> ArtifactStore {
        let store = ArtifactStore::new(dir);
        store.save(&test_support::fit_bundle(300, 5)).unwrap();
        store.save_codec(&LabelCodec::standard()).unwrap();
        store.load_bundle().unwrap();
        store
    }

    fn edit_artifact(store: &ArtifactStore, file: &str, edit: impl FnOnce(&mut serde_json::Value)) {
        let path = store.path(file);
        let mut value: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        edit(&mut value);
        std::fs::write(&path, serde_json::to_vec(&value).unwrap()).unwrap();
    }

    #[test]
    fn test_short_scaler_fails_startup() {
        let dir = tempfile::tempdir().unwrap();
        let store = saved_store(dir.path());

        edit_artifact(&store, SCALER_FILE, |scaler| {
            scaler["scale"].as_array_mut().unwrap().pop();
        });

        let err = store.load_bundle().unwrap_err();
        assert!(matches!(err, ServiceError::StartupConfig(_)), "{err}");
        assert!(err.to_string().contains("scaler"));
    }

    #[test]
    fn test_out_of_range_tree_node_fails_startup() {
        let dir = tempfile::tempdir().unwrap();
        let store = saved_store(dir.path());

        edit_artifact(&store, BOOSTING_MODEL_FILE, |model| {
            model["trees"][0]["nodes"] = serde_json::json!([
                {"kind": "split", "feature": 99, "threshold": 0.0, "left": 1, "right": 2},
                {"kind": "leaf", "value": 0.0},
                {"kind": "leaf", "value": 0.0},
            ]);
        });
        assert!(matches!(
            store.load_bundle(),
            Err(ServiceError::StartupConfig(_))
        ));

        edit_artifact(&store, BOOSTING_MODEL_FILE, |model| {
            model["trees"][0]["nodes"] = serde_json::json!([
                {"kind": "split", "feature": 0, "threshold": 0.0, "left": 1, "right": 7},
                {"kind": "leaf", "value": 0.0},
            ]);
        });
        let err = store.load_bundle().unwrap_err();
        assert!(err.to_string().contains("tree 0"), "{err}");
    }

    #[test]
    fn test_mismatched_network_layer_fails_startup() {
        let dir = tempfile::tempdir().unwrap();
        let store = saved_store(dir.path());

        edit_artifact(&store, NETWORK_MODEL_FILE, |network| {
            network["layers"][0]["biases"].as_array_mut().unwrap().pop();
        });

        assert!(matches!(
            store.load_bundle(),
            Err(ServiceError::StartupConfig(_))
        ));
    }

    #[test]
    fn test_reordered_feature_columns_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());

        let mut columns = FEATURE_COLUMNS.to_vec();
        columns.swap(0, 1);
        stage_json(&store.path(FEATURE_COLUMNS_FILE), &columns)
            .unwrap()
            .commit()
            .unwrap();

        assert!(matches!(
            store.check_feature_columns(),
            Err(ServiceError::StartupConfig(_))
        ));
    }
}
