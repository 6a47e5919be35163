//! Experiment configuration
//!
//! Explicit tagged configs instead of kwarg bags: the task selects the
//! branch, the model field carries exactly the hyperparameters its family
//! understands, and the split spec drives the time-based calibration
//! protocol.

use serde::{Deserialize, Serialize};

use courtside_core::ml::{CalibrationMethod, ClassifierKind, RegressorKind};
use courtside_infra::dataset::DatasetSpec;
use courtside_types::{CourtsideError, Result};

pub const DEFAULT_BEGIN_YEAR: i32 = 2012;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    BinaryHomeWin,
    PointsRegression,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointsTarget {
    /// Two models, one per perspective, each on a perspective-specific
    /// feature split.
    HomeAway,
    /// A single model on home - away.
    Margin,
}

impl Default for PointsTarget {
    fn default() -> Self {
        PointsTarget::HomeAway
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalerKind {
    Standard,
    None,
}

impl Default for ScalerKind {
    fn default() -> Self {
        ScalerKind::Standard
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitKind {
    YearBasedCalibration,
    TimeSeriesCv,
}

/// Temporal split configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitSpec {
    #[serde(rename = "type")]
    pub kind: SplitKind,
    #[serde(default)]
    pub begin_year: Option<i32>,
    #[serde(default)]
    pub calibration_years: Vec<i32>,
    #[serde(default)]
    pub evaluation_year: Option<i32>,
    #[serde(default)]
    pub n_splits: Option<usize>,
    #[serde(default)]
    pub min_games_played: Option<u32>,
}

impl SplitSpec {
    pub fn begin_year_or_default(&self) -> i32 {
        self.begin_year.unwrap_or(DEFAULT_BEGIN_YEAR)
    }
}

/// Which features the dataset carries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureSelection {
    #[serde(default)]
    pub blocks: Option<Vec<String>>,
    #[serde(default)]
    pub features: Option<Vec<String>>,
    #[serde(default)]
    pub include_per: Option<bool>,
    #[serde(default)]
    pub diff_mode: Option<String>,
    #[serde(default)]
    pub point_model_id: Option<String>,
}

/// One experiment: task, model, features, splits, calibration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub task: TaskKind,
    #[serde(default)]
    pub model: Option<ClassifierKind>,
    #[serde(default)]
    pub points_model: Option<RegressorKind>,
    #[serde(default)]
    pub points_target: PointsTarget,
    #[serde(default)]
    pub features: FeatureSelection,
    pub splits: SplitSpec,
    #[serde(default)]
    pub calibration_method: CalibrationMethod,
    #[serde(default)]
    pub scaler: ScalerKind,
}

impl ExperimentConfig {
    pub fn validate(&self) -> Result<()> {
        match self.task {
            TaskKind::BinaryHomeWin => {
                if self.model.is_none() {
                    return Err(CourtsideError::Config(
                        "binary_home_win experiments require a `model`".to_string(),
                    ));
                }
            }
            TaskKind::PointsRegression => {
                if self.points_model.is_none() {
                    return Err(CourtsideError::Config(
                        "points_regression experiments require a `points_model`".to_string(),
                    ));
                }
            }
        }
        if self.splits.kind == SplitKind::YearBasedCalibration {
            if self.splits.calibration_years.is_empty() {
                return Err(CourtsideError::Config(
                    "year_based_calibration requires calibration_years".to_string(),
                ));
            }
            if self.splits.evaluation_year.is_none() {
                return Err(CourtsideError::Config(
                    "year_based_calibration requires an evaluation_year".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn model_type_name(&self) -> &'static str {
        match self.task {
            TaskKind::BinaryHomeWin => self
                .model
                .as_ref()
                .map(|m| m.name())
                .unwrap_or("LogisticRegression"),
            TaskKind::PointsRegression => self
                .points_model
                .as_ref()
                .map(|m| m.name())
                .unwrap_or("Ridge"),
        }
    }

    /// The dataset spec this experiment carves from the master.
    pub fn dataset_spec(&self) -> DatasetSpec {
        DatasetSpec {
            feature_blocks: self.features.blocks.clone(),
            individual_features: self.features.features.clone(),
            begin_year: Some(self.splits.begin_year_or_default()),
            min_games_played: self.splits.min_games_played,
            diff_mode: self.features.diff_mode.clone(),
            point_model_id: self.features.point_model_id.clone(),
            include_per: self.features.include_per,
            exclude_preseason: Some(true),
            ..DatasetSpec::default()
        }
    }

    /// Deterministic fit seed derived from the config hash.
    pub fn fit_seed(&self) -> u64 {
        let value = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        let hash = courtside_infra::hashing::stable_hash(&value);
        u64::from_str_radix(&hash[..16.min(hash.len())], 16).unwrap_or(42)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_splits() -> SplitSpec {
        SplitSpec {
            kind: SplitKind::YearBasedCalibration,
            begin_year: Some(2012),
            calibration_years: vec![2023],
            evaluation_year: Some(2024),
            n_splits: None,
            min_games_played: None,
        }
    }

    #[test]
    fn classification_requires_a_model() {
        let config = ExperimentConfig {
            task: TaskKind::BinaryHomeWin,
            model: None,
            points_model: None,
            points_target: PointsTarget::default(),
            features: FeatureSelection::default(),
            splits: base_splits(),
            calibration_method: CalibrationMethod::default(),
            scaler: ScalerKind::default(),
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn calibration_split_requires_years() {
        let mut config = ExperimentConfig {
            task: TaskKind::BinaryHomeWin,
            model: Some(ClassifierKind::LogisticRegression { c: 0.1 }),
            points_model: None,
            points_target: PointsTarget::default(),
            features: FeatureSelection::default(),
            splits: base_splits(),
            calibration_method: CalibrationMethod::default(),
            scaler: ScalerKind::default(),
        };
        assert!(config.validate().is_ok());
        config.splits.calibration_years.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn fit_seed_is_stable_per_config() {
        let config = ExperimentConfig {
            task: TaskKind::BinaryHomeWin,
            model: Some(ClassifierKind::LogisticRegression { c: 0.1 }),
            points_model: None,
            points_target: PointsTarget::default(),
            features: FeatureSelection::default(),
            splits: base_splits(),
            calibration_method: CalibrationMethod::default(),
            scaler: ScalerKind::default(),
        };
        assert_eq!(config.fit_seed(), config.fit_seed());
    }

    #[test]
    fn dataset_spec_applies_begin_year_default() {
        let mut config = ExperimentConfig {
            task: TaskKind::BinaryHomeWin,
            model: Some(ClassifierKind::LogisticRegression { c: 0.1 }),
            points_model: None,
            points_target: PointsTarget::default(),
            features: FeatureSelection::default(),
            splits: base_splits(),
            calibration_method: CalibrationMethod::default(),
            scaler: ScalerKind::default(),
        };
        config.splits.begin_year = None;
        assert_eq!(config.dataset_spec().begin_year, Some(DEFAULT_BEGIN_YEAR));
    }
}
