//! In-crate model toolkit
//!
//! Scaler, linear and tree models, probability calibration, and metrics.
//! Models are plain serde-persistable structs fit on row-major `f64`
//! matrices; training is deterministic given the seed carried by the kind.

pub mod calibrate;
pub mod linear;
pub mod metrics;
pub mod scaler;
pub mod tree;

use serde::{Deserialize, Serialize};

use courtside_types::{CourtsideError, Result};

pub use calibrate::{CalibrationMethod, Calibrator};
pub use linear::{ElasticNet, LinearSvm, LogisticRegression, RidgeRegression};
pub use scaler::StandardScaler;
pub use tree::{
    GradientBoostingClassifier, GradientBoostingRegressor, RandomForestRegressor, RegressionTree,
};

/// Classifier family and hyperparameters — one explicit variant per model
/// instead of a kwargs bag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClassifierKind {
    LogisticRegression {
        #[serde(default = "default_c")]
        c: f64,
    },
    Svm {
        #[serde(default = "default_c")]
        c: f64,
    },
    GradientBoosting {
        #[serde(default = "default_estimators")]
        n_estimators: usize,
        #[serde(default = "default_learning_rate")]
        learning_rate: f64,
        #[serde(default = "default_depth")]
        max_depth: usize,
    },
}

/// Points-regressor family and hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RegressorKind {
    Ridge {
        #[serde(default = "default_alpha")]
        alpha: f64,
    },
    ElasticNet {
        #[serde(default = "default_alpha")]
        alpha: f64,
        #[serde(default = "default_l1_ratio")]
        l1_ratio: f64,
    },
    RandomForest {
        #[serde(default = "default_estimators")]
        n_estimators: usize,
        #[serde(default)]
        max_depth: Option<usize>,
    },
    GradientBoosting {
        #[serde(default = "default_estimators")]
        n_estimators: usize,
        #[serde(default = "default_learning_rate")]
        learning_rate: f64,
        #[serde(default = "default_depth")]
        max_depth: usize,
    },
}

fn default_c() -> f64 {
    0.1
}
fn default_alpha() -> f64 {
    1.0
}
fn default_l1_ratio() -> f64 {
    0.5
}
fn default_estimators() -> usize {
    100
}
fn default_learning_rate() -> f64 {
    0.1
}
fn default_depth() -> usize {
    3
}

impl ClassifierKind {
    pub fn name(&self) -> &'static str {
        match self {
            ClassifierKind::LogisticRegression { .. } => "LogisticRegression",
            ClassifierKind::Svm { .. } => "SVM",
            ClassifierKind::GradientBoosting { .. } => "GradientBoosting",
        }
    }
}

impl RegressorKind {
    pub fn name(&self) -> &'static str {
        match self {
            RegressorKind::Ridge { .. } => "Ridge",
            RegressorKind::ElasticNet { .. } => "ElasticNet",
            RegressorKind::RandomForest { .. } => "RandomForest",
            RegressorKind::GradientBoosting { .. } => "GradientBoosting",
        }
    }
}

/// A fitted binary classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Classifier {
    Logistic(LogisticRegression),
    Svm(LinearSvm),
    GradientBoosting(GradientBoostingClassifier),
}

impl Classifier {
    pub fn fit(kind: &ClassifierKind, x: &[Vec<f64>], y: &[f64], seed: u64) -> Result<Self> {
        if x.is_empty() || x.len() != y.len() {
            return Err(CourtsideError::Run(format!(
                "classifier fit requires matching non-empty x/y (got {} rows, {} labels)",
                x.len(),
                y.len()
            )));
        }
        Ok(match kind {
            ClassifierKind::LogisticRegression { c } => {
                Classifier::Logistic(LogisticRegression::fit(x, y, *c))
            }
            ClassifierKind::Svm { c } => Classifier::Svm(LinearSvm::fit(x, y, *c)),
            ClassifierKind::GradientBoosting {
                n_estimators,
                learning_rate,
                max_depth,
            } => Classifier::GradientBoosting(GradientBoostingClassifier::fit(
                x,
                y,
                *n_estimators,
                *learning_rate,
                *max_depth,
                seed,
            )),
        })
    }

    /// Probability of the positive class, per row.
    pub fn predict_proba(&self, x: &[Vec<f64>]) -> Vec<f64> {
        match self {
            Classifier::Logistic(m) => m.predict_proba(x),
            Classifier::Svm(m) => m.predict_proba(x),
            Classifier::GradientBoosting(m) => m.predict_proba(x),
        }
    }

    /// Model-native feature ranking: absolute coefficients for linear
    /// models, accumulated split gain for tree models.
    pub fn importances(&self) -> Vec<f64> {
        match self {
            Classifier::Logistic(m) => m.weights.iter().map(|w| w.abs()).collect(),
            Classifier::Svm(m) => m.weights.iter().map(|w| w.abs()).collect(),
            Classifier::GradientBoosting(m) => m.importances(),
        }
    }
}

/// A fitted points regressor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Regressor {
    Ridge(RidgeRegression),
    ElasticNet(ElasticNet),
    RandomForest(RandomForestRegressor),
    GradientBoosting(GradientBoostingRegressor),
}

impl Regressor {
    pub fn fit(kind: &RegressorKind, x: &[Vec<f64>], y: &[f64], seed: u64) -> Result<Self> {
        if x.is_empty() || x.len() != y.len() {
            return Err(CourtsideError::Run(format!(
                "regressor fit requires matching non-empty x/y (got {} rows, {} labels)",
                x.len(),
                y.len()
            )));
        }
        Ok(match kind {
            RegressorKind::Ridge { alpha } => Regressor::Ridge(RidgeRegression::fit(x, y, *alpha)?),
            RegressorKind::ElasticNet { alpha, l1_ratio } => {
                Regressor::ElasticNet(ElasticNet::fit(x, y, *alpha, *l1_ratio))
            }
            RegressorKind::RandomForest {
                n_estimators,
                max_depth,
            } => Regressor::RandomForest(RandomForestRegressor::fit(
                x,
                y,
                *n_estimators,
                max_depth.unwrap_or(8),
                seed,
            )),
            RegressorKind::GradientBoosting {
                n_estimators,
                learning_rate,
                max_depth,
            } => Regressor::GradientBoosting(GradientBoostingRegressor::fit(
                x,
                y,
                *n_estimators,
                *learning_rate,
                *max_depth,
                seed,
            )),
        })
    }

    pub fn predict(&self, x: &[Vec<f64>]) -> Vec<f64> {
        match self {
            Regressor::Ridge(m) => m.predict(x),
            Regressor::ElasticNet(m) => m.predict(x),
            Regressor::RandomForest(m) => m.predict(x),
            Regressor::GradientBoosting(m) => m.predict(x),
        }
    }

    pub fn importances(&self) -> Vec<f64> {
        match self {
            Regressor::Ridge(m) => m.weights.iter().map(|w| w.abs()).collect(),
            Regressor::ElasticNet(m) => m.weights.iter().map(|w| w.abs()).collect(),
            Regressor::RandomForest(m) => m.importances(),
            Regressor::GradientBoosting(m) => m.importances(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn separable() -> (Vec<Vec<f64>>, Vec<f64>) {
        let mut x = Vec::new();
        let mut y = Vec::new();
        for i in 0..60 {
            let v = i as f64 / 10.0;
            x.push(vec![v, -v]);
            y.push(if v > 3.0 { 1.0 } else { 0.0 });
        }
        (x, y)
    }

    #[test]
    fn classifier_kinds_fit_and_separate() {
        let (x, y) = separable();
        for kind in [
            ClassifierKind::LogisticRegression { c: 1.0 },
            ClassifierKind::Svm { c: 1.0 },
            ClassifierKind::GradientBoosting {
                n_estimators: 20,
                learning_rate: 0.2,
                max_depth: 2,
            },
        ] {
            let model = Classifier::fit(&kind, &x, &y, 7).unwrap();
            let probs = model.predict_proba(&x);
            let acc: f64 = probs
                .iter()
                .zip(&y)
                .map(|(p, label)| {
                    let pred = if *p >= 0.5 { 1.0 } else { 0.0 };
                    if (pred - label).abs() < 1e-9 {
                        1.0
                    } else {
                        0.0
                    }
                })
                .sum::<f64>()
                / y.len() as f64;
            assert!(acc > 0.9, "{} accuracy {}", kind.name(), acc);
        }
    }

    #[test]
    fn classifier_round_trips_through_json() {
        let (x, y) = separable();
        let model = Classifier::fit(&ClassifierKind::LogisticRegression { c: 1.0 }, &x, &y, 7).unwrap();
        let json = serde_json::to_string(&model).unwrap();
        let restored: Classifier = serde_json::from_str(&json).unwrap();
        let a = model.predict_proba(&x);
        let b = restored.predict_proba(&x);
        for (p, q) in a.iter().zip(&b) {
            assert!((p - q).abs() < 1e-12);
        }
    }

    #[test]
    fn regressor_kinds_fit_a_linear_target() {
        let x: Vec<Vec<f64>> = (0..80).map(|i| vec![i as f64, (i % 7) as f64]).collect();
        let y: Vec<f64> = x.iter().map(|r| 2.0 * r[0] + 3.0).collect();
        for kind in [
            RegressorKind::Ridge { alpha: 0.1 },
            RegressorKind::ElasticNet {
                alpha: 0.01,
                l1_ratio: 0.5,
            },
            RegressorKind::RandomForest {
                n_estimators: 25,
                max_depth: Some(8),
            },
            RegressorKind::GradientBoosting {
                n_estimators: 80,
                learning_rate: 0.2,
                max_depth: 3,
            },
        ] {
            let model = Regressor::fit(&kind, &x, &y, 11).unwrap();
            let preds = model.predict(&x);
            let mae = preds
                .iter()
                .zip(&y)
                .map(|(p, t)| (p - t).abs())
                .sum::<f64>()
                / y.len() as f64;
            assert!(mae < 12.0, "{} mae {}", kind.name(), mae);
        }
    }

    #[test]
    fn importances_match_feature_count() {
        let (x, y) = separable();
        let model = Classifier::fit(&ClassifierKind::LogisticRegression { c: 1.0 }, &x, &y, 7).unwrap();
        assert_eq!(model.importances().len(), 2);
    }
}
