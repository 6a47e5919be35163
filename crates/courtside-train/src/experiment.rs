//! Experiment runner
//!
//! Builds the dataset, tracks the run, trains and evaluates under the
//! configured protocol, persists artifacts, and records metrics and
//! diagnostics. Any failure marks the run `failed` with the error message
//! and never poisons the master or the selected config.

use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;

use courtside_core::ml::metrics::{accuracy, anova_f_scores, brier_score, log_loss, roc_auc};
use courtside_core::ml::{Calibrator, Classifier, StandardScaler};
use courtside_infra::artifacts::ArtifactStore;
use courtside_infra::dataset::{DatasetBuilder, DatasetResult};
use courtside_infra::repos::{RunRepository, RunStatus, RunUpdate};
use courtside_infra::store::DocumentStore;
use courtside_types::{CourtsideError, LeagueConfig, Result};

use crate::config::{ExperimentConfig, ScalerKind, SplitKind, TaskKind};
use crate::frame::DatasetFrame;
use crate::points;

/// Result of a completed experiment.
#[derive(Debug, Clone)]
pub struct ExperimentOutcome {
    pub run_id: String,
    pub dataset_id: String,
    pub metrics: Value,
    pub diagnostics: Value,
    pub artifacts: Value,
    pub point_model_id: Option<String>,
    pub dropped_features: Vec<String>,
}

pub struct ExperimentRunner {
    pub(crate) store: Arc<DocumentStore>,
    pub(crate) cfg: LeagueConfig,
    pub(crate) datasets: DatasetBuilder,
    pub(crate) runs: RunRepository,
    pub(crate) artifacts: ArtifactStore,
}

impl ExperimentRunner {
    pub fn new(
        store: Arc<DocumentStore>,
        cfg: LeagueConfig,
        dataset_cache_dir: PathBuf,
        artifact_root: PathBuf,
    ) -> Self {
        let datasets = DatasetBuilder::new(Arc::clone(&store), cfg.clone(), dataset_cache_dir);
        let runs = RunRepository::new(Arc::clone(&store), &cfg);
        let artifacts = ArtifactStore::new(artifact_root);
        Self {
            store,
            cfg,
            datasets,
            runs,
            artifacts,
        }
    }

    pub fn artifact_store(&self) -> &ArtifactStore {
        &self.artifacts
    }

    pub fn run_repository(&self) -> &RunRepository {
        &self.runs
    }

    /// Run a complete experiment: dataset, train, evaluate, persist.
    pub async fn run_experiment(
        &self,
        config: &ExperimentConfig,
        session_id: &str,
    ) -> Result<ExperimentOutcome> {
        config.validate()?;
        let dataset = self.datasets.build_dataset(&config.dataset_spec()).await?;
        tracing::info!(
            dataset_id = %dataset.dataset_id,
            rows = dataset.row_count,
            cached = dataset.cached,
            "dataset ready"
        );
        match config.task {
            TaskKind::BinaryHomeWin => self.run_classification(config, &dataset, session_id).await,
            TaskKind::PointsRegression => {
                points::run_points_experiment(self, config, &dataset, session_id).await
            }
        }
    }

    async fn run_classification(
        &self,
        config: &ExperimentConfig,
        dataset: &DatasetResult,
        session_id: &str,
    ) -> Result<ExperimentOutcome> {
        let run_id = self
            .runs
            .create_run(
                serde_json::to_value(config)?,
                Some(dataset.dataset_id.clone()),
                config.model_type_name(),
                session_id,
            )
            .await?;
        self.runs
            .update_run(
                &run_id,
                RunUpdate {
                    status: Some(RunStatus::Running),
                    ..RunUpdate::default()
                },
            )
            .await?;

        match self.classification_inner(config, dataset, &run_id) {
            Ok((metrics, diagnostics, artifact_paths)) => {
                self.runs
                    .update_run(
                        &run_id,
                        RunUpdate {
                            status: Some(RunStatus::Completed),
                            metrics: Some(metrics.clone()),
                            diagnostics: Some(diagnostics.clone()),
                            artifacts: Some(artifact_paths.clone()),
                        },
                    )
                    .await?;
                Ok(ExperimentOutcome {
                    run_id,
                    dataset_id: dataset.dataset_id.clone(),
                    metrics,
                    diagnostics,
                    artifacts: artifact_paths,
                    point_model_id: None,
                    dropped_features: dataset.dropped_features.clone(),
                })
            }
            Err(e) => {
                self.runs
                    .update_run(
                        &run_id,
                        RunUpdate {
                            status: Some(RunStatus::Failed),
                            diagnostics: Some(json!({ "error": e.to_string() })),
                            ..RunUpdate::default()
                        },
                    )
                    .await?;
                Err(e)
            }
        }
    }

    fn classification_inner(
        &self,
        config: &ExperimentConfig,
        dataset: &DatasetResult,
        run_id: &str,
    ) -> Result<(Value, Value, Value)> {
        let frame = DatasetFrame::load(&dataset.csv_path, &self.cfg)?;
        if frame.is_empty() {
            return Err(CourtsideError::DataMissing(format!(
                "dataset {} is empty; no training data available",
                dataset.dataset_id
            )));
        }
        let labels = frame.target("HomeWon")?.clone();
        if frame.feature_columns.is_empty() {
            return Err(CourtsideError::DataMissing(
                "dataset has no feature columns after partitioning".to_string(),
            ));
        }

        let kind = config
            .model
            .as_ref()
            .ok_or_else(|| CourtsideError::Config("missing classifier model".to_string()))?;
        let seed = config.fit_seed();

        let (scaler, scaled) = match config.scaler {
            ScalerKind::Standard => {
                let (s, x) = StandardScaler::fit_transform(&frame.features);
                (Some(s), x)
            }
            ScalerKind::None => (None, frame.features.clone()),
        };

        let metrics = match config.splits.kind {
            SplitKind::YearBasedCalibration => {
                self.evaluate_with_calibration(config, &frame, &scaled, &labels, seed)?
            }
            SplitKind::TimeSeriesCv => {
                self.evaluate_time_series(config, &scaled, &labels, seed)?
            }
        };

        // ANOVA F ranking over the full scaled matrix.
        let f_scores = ranked_pairs(&frame.feature_columns, &anova_f_scores(&scaled, &labels));

        // Final model on the full dataset, for persistence and native
        // importances.
        let model = Classifier::fit(kind, &scaled, &labels, seed)?;
        let importances = ranked_pairs(&frame.feature_columns, &model.importances());
        let saved = self
            .artifacts
            .save_classifier(run_id, &model, scaler.as_ref(), &frame.feature_columns)?;

        let diagnostics = json!({
            "f_scores": f_scores,
            "feature_importances": importances,
            "n_features": frame.feature_columns.len(),
            "n_samples": labels.len(),
            "feature_names": frame.feature_columns,
        });
        let artifact_paths = json!({
            "dataset_path": dataset.csv_path,
            "model_type": config.model_type_name(),
            "model_path": saved.model_path,
            "scaler_path": saved.scaler_path,
            "feature_names_path": saved.feature_names_path,
        });
        Ok((metrics, diagnostics, artifact_paths))
    }

    /// Year-based calibration: fit on the training years, calibrate on the
    /// calibration years, report on the evaluation year.
    fn evaluate_with_calibration(
        &self,
        config: &ExperimentConfig,
        frame: &DatasetFrame,
        scaled: &[Vec<f64>],
        labels: &[f64],
        seed: u64,
    ) -> Result<Value> {
        let splits = &config.splits;
        let begin_year = splits.begin_year_or_default();
        let cal_years = &splits.calibration_years;
        let eval_year = splits
            .evaluation_year
            .ok_or_else(|| CourtsideError::Config("missing evaluation_year".to_string()))?;
        let min_cal = *cal_years
            .iter()
            .min()
            .ok_or_else(|| CourtsideError::Config("missing calibration_years".to_string()))?;
        if cal_years.contains(&eval_year) || eval_year < min_cal {
            return Err(CourtsideError::Config(format!(
                "evaluation_year {} overlaps the calibration years {:?}",
                eval_year, cal_years
            )));
        }

        let train_idx = frame.indices_where(|_, ssy| ssy >= begin_year && ssy < min_cal);
        let cal_idx = frame.indices_where(|_, ssy| cal_years.contains(&ssy));
        let eval_idx = frame.indices_where(|_, ssy| ssy == eval_year);
        for (name, idx) in [("training", &train_idx), ("calibration", &cal_idx), ("evaluation", &eval_idx)] {
            if idx.is_empty() {
                return Err(CourtsideError::DataMissing(format!(
                    "no rows in the {} set for the configured split",
                    name
                )));
            }
        }
        // The partition is disjoint by construction; keep the explicit
        // leakage assertion anyway.
        if eval_idx.iter().any(|i| train_idx.contains(i) || cal_idx.contains(i)) {
            return Err(CourtsideError::Run(
                "evaluation rows leaked into training or calibration".to_string(),
            ));
        }

        let take = |idx: &[usize]| -> (Vec<Vec<f64>>, Vec<f64>) {
            (
                idx.iter().map(|i| scaled[*i].clone()).collect(),
                idx.iter().map(|i| labels[*i]).collect(),
            )
        };
        let (x_train, y_train) = take(&train_idx);
        let (x_cal, y_cal) = take(&cal_idx);
        let (x_eval, y_eval) = take(&eval_idx);

        let kind = config
            .model
            .as_ref()
            .ok_or_else(|| CourtsideError::Config("missing classifier model".to_string()))?;
        let model = Classifier::fit(kind, &x_train, &y_train, seed)?;
        let cal_scores = model.predict_proba(&x_cal);
        let calibrator = Calibrator::fit(config.calibration_method, &cal_scores, &y_cal);
        let eval_probs = calibrator.apply_all(&model.predict_proba(&x_eval));

        // Per-year breakdown with the calibrated model, for drift
        // diagnostics across the whole dataset.
        let mut years: Vec<i32> = frame.season_start_years.clone();
        years.sort_unstable();
        years.dedup();
        let mut per_year = serde_json::Map::new();
        for year in years {
            let idx = frame.indices_where(|_, ssy| ssy == year);
            let (x_year, y_year) = take(&idx);
            let probs = calibrator.apply_all(&model.predict_proba(&x_year));
            per_year.insert(
                year.to_string(),
                json!({ "n": idx.len(), "accuracy": accuracy(&y_year, &probs) }),
            );
        }

        Ok(json!({
            "per_year": per_year,
            "accuracy_mean": accuracy(&y_eval, &eval_probs),
            "accuracy_std": 0.0,
            "log_loss_mean": log_loss(&y_eval, &eval_probs),
            "log_loss_std": 0.0,
            "brier_mean": brier_score(&y_eval, &eval_probs),
            "brier_std": 0.0,
            "auc_mean": roc_auc(&y_eval, &eval_probs),
            "auc_std": 0.0,
            "n_folds": 1,
            "split_type": "year_based_calibration",
            "evaluation_year": eval_year,
            "train_set_size": train_idx.len(),
            "calibrate_set_size": cal_idx.len(),
            "evaluation_set_size": eval_idx.len(),
        }))
    }

    /// Walk-forward expanding-window cross-validation; date order is the
    /// row order, no shuffling.
    fn evaluate_time_series(
        &self,
        config: &ExperimentConfig,
        scaled: &[Vec<f64>],
        labels: &[f64],
        seed: u64,
    ) -> Result<Value> {
        let n_splits = config.splits.n_splits.unwrap_or(5).max(2);
        let n = scaled.len();
        let chunk = n / (n_splits + 1);
        if chunk == 0 {
            return Err(CourtsideError::DataMissing(format!(
                "dataset too small for {} walk-forward folds",
                n_splits
            )));
        }

        let kind = config
            .model
            .as_ref()
            .ok_or_else(|| CourtsideError::Config("missing classifier model".to_string()))?;
        let mut accs = Vec::new();
        let mut losses = Vec::new();
        let mut briers = Vec::new();
        let mut aucs = Vec::new();
        for fold in 1..=n_splits {
            let train_end = fold * chunk;
            let test_end = ((fold + 1) * chunk).min(n);
            let x_train = scaled[..train_end].to_vec();
            let y_train = labels[..train_end].to_vec();
            let x_test = scaled[train_end..test_end].to_vec();
            let y_test = labels[train_end..test_end].to_vec();
            if x_test.is_empty() {
                continue;
            }
            let model = Classifier::fit(kind, &x_train, &y_train, seed)?;
            let probs = model.predict_proba(&x_test);
            accs.push(accuracy(&y_test, &probs));
            losses.push(log_loss(&y_test, &probs));
            briers.push(brier_score(&y_test, &probs));
            aucs.push(roc_auc(&y_test, &probs));
        }

        let mean = |v: &[f64]| v.iter().sum::<f64>() / v.len().max(1) as f64;
        let std = |v: &[f64]| {
            if v.len() < 2 {
                return 0.0;
            }
            let m = mean(v);
            (v.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (v.len() - 1) as f64).sqrt()
        };
        Ok(json!({
            "accuracy_mean": mean(&accs),
            "accuracy_std": std(&accs),
            "log_loss_mean": mean(&losses),
            "log_loss_std": std(&losses),
            "brier_mean": mean(&briers),
            "brier_std": std(&briers),
            "auc_mean": mean(&aucs),
            "auc_std": std(&aucs),
            "n_folds": accs.len(),
            "split_type": "time_series_cv",
        }))
    }
}

/// Feature ranking as ordered (name, score) pairs, descending by score.
pub(crate) fn ranked_pairs(names: &[String], scores: &[f64]) -> Vec<(String, f64)> {
    let mut pairs: Vec<(String, f64)> = names
        .iter()
        .cloned()
        .zip(scores.iter().map(|s| if s.is_finite() { *s } else { 0.0 }))
        .collect();
    pairs.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    pairs
}
