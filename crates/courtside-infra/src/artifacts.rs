//! Model artifact storage
//!
//! Layout per run:
//!   `<root>/classifier_models/<run_id>/{model.json, scaler.json, feature_names.json}`
//!   `<root>/ensembles/<run_id>_meta_model.json, <run_id>_ensemble_config.json`
//!
//! Models are serde-persisted; loading an artifact reproduces predictions
//! bit-for-bit.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use courtside_core::ml::{Classifier, StandardScaler};
use courtside_types::{CourtsideError, Result};

/// Paths produced by a classifier save.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierArtifacts {
    pub model_path: PathBuf,
    pub scaler_path: PathBuf,
    pub feature_names_path: PathBuf,
}

/// Everything needed to reload and run an ensemble.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleConfigFile {
    pub run_id: String,
    pub base_model_ids: Vec<String>,
    pub meta_feature_cols: Vec<String>,
    pub meta_model_type: String,
    #[serde(default)]
    pub meta_c_value: Option<f64>,
    pub stacking_mode: String,
    #[serde(default)]
    pub meta_features: Vec<String>,
    #[serde(default)]
    pub use_disagree: bool,
    #[serde(default)]
    pub use_conf: bool,
}

/// Filesystem store for trained models.
#[derive(Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn classifier_dir(&self, run_id: &str) -> PathBuf {
        self.root.join("classifier_models").join(run_id)
    }

    fn ensembles_dir(&self) -> PathBuf {
        self.root.join("ensembles")
    }

    fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(value)?)?;
        Ok(())
    }

    fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
        if !path.exists() {
            return Err(CourtsideError::DataMissing(format!(
                "artifact not found: {:?}",
                path
            )));
        }
        Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
    }

    /// Persist a classifier with its scaler (written even when `None`, for
    /// layout consistency) and resolved feature names.
    pub fn save_classifier(
        &self,
        run_id: &str,
        model: &Classifier,
        scaler: Option<&StandardScaler>,
        feature_names: &[String],
    ) -> Result<ClassifierArtifacts> {
        let dir = self.classifier_dir(run_id);
        let artifacts = ClassifierArtifacts {
            model_path: dir.join("model.json"),
            scaler_path: dir.join("scaler.json"),
            feature_names_path: dir.join("feature_names.json"),
        };
        Self::write_json(&artifacts.model_path, model)?;
        Self::write_json(&artifacts.scaler_path, &scaler)?;
        Self::write_json(&artifacts.feature_names_path, &feature_names.to_vec())?;
        Ok(artifacts)
    }

    pub fn load_classifier(
        &self,
        run_id: &str,
    ) -> Result<(Classifier, Option<StandardScaler>, Vec<String>)> {
        let dir = self.classifier_dir(run_id);
        let model: Classifier = Self::read_json(&dir.join("model.json"))?;
        let scaler: Option<StandardScaler> = Self::read_json(&dir.join("scaler.json"))?;
        let feature_names: Vec<String> = Self::read_json(&dir.join("feature_names.json"))?;
        Ok((model, scaler, feature_names))
    }

    /// Load a classifier from explicit artifact paths (stored on configs).
    pub fn load_classifier_from_paths(
        model_path: &Path,
        scaler_path: &Path,
        feature_names_path: &Path,
    ) -> Result<(Classifier, Option<StandardScaler>, Vec<String>)> {
        let model: Classifier = Self::read_json(model_path)?;
        let scaler: Option<StandardScaler> = Self::read_json(scaler_path)?;
        let feature_names: Vec<String> = Self::read_json(feature_names_path)?;
        Ok((model, scaler, feature_names))
    }

    /// Persist an ensemble meta-model and its config file.
    pub fn save_ensemble(
        &self,
        run_id: &str,
        meta_model: &Classifier,
        config: &EnsembleConfigFile,
    ) -> Result<(PathBuf, PathBuf)> {
        let dir = self.ensembles_dir();
        let model_path = dir.join(format!("{}_meta_model.json", run_id));
        let config_path = dir.join(format!("{}_ensemble_config.json", run_id));
        Self::write_json(&model_path, meta_model)?;
        Self::write_json(&config_path, config)?;
        Ok((model_path, config_path))
    }

    pub fn load_ensemble(&self, run_id: &str) -> Result<(Classifier, EnsembleConfigFile)> {
        let dir = self.ensembles_dir();
        let model: Classifier = Self::read_json(&dir.join(format!("{}_meta_model.json", run_id)))?;
        let config: EnsembleConfigFile =
            Self::read_json(&dir.join(format!("{}_ensemble_config.json", run_id)))?;
        Ok((model, config))
    }
}
