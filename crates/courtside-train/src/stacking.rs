//! Stacking trainer
//!
//! Composes K >= 2 compatible base classifiers into a meta-model. Base
//! models must share their temporal triple (begin year, calibration years,
//! evaluation year); feature sets may differ, with each base's
//! preprocessing applied on its own projection. The meta-model trains on
//! the calibration years only and is evaluated on the evaluation year,
//! alongside re-evaluated per-base metrics on the same rows.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use courtside_core::ml::metrics::{accuracy, brier_score, log_loss, roc_auc};
use courtside_core::ml::{Classifier, ClassifierKind, StandardScaler};
use courtside_infra::artifacts::{ArtifactStore, EnsembleConfigFile};
use courtside_infra::dataset::{DatasetBuilder, DatasetSpec};
use courtside_infra::hashing::stable_hash;
use courtside_infra::repos::{
    ConfigRepository, ModelConfigDoc, RunRepository, RunStatus, RunUpdate,
};
use courtside_infra::store::DocumentStore;
use courtside_types::{CourtsideError, LeagueConfig, Result};

use crate::config::ExperimentConfig;
use crate::experiment::{ranked_pairs, ExperimentOutcome};
use crate::frame::DatasetFrame;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StackingMode {
    Naive,
    Informed,
}

/// Inputs to a stacking run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackingParams {
    pub base_config_ids: Vec<String>,
    pub meta_model: ClassifierKind,
    pub mode: StackingMode,
    #[serde(default)]
    pub meta_features: Vec<String>,
    #[serde(default)]
    pub use_disagree: bool,
    #[serde(default)]
    pub use_conf: bool,
}

/// A resolved base model ready for inference.
struct BaseModel {
    config_id: String,
    short_name: String,
    model: Classifier,
    scaler: Option<StandardScaler>,
    feature_names: Vec<String>,
    experiment: ExperimentConfig,
    model_type: String,
}

pub struct StackingTrainer {
    cfg: LeagueConfig,
    datasets: DatasetBuilder,
    runs: RunRepository,
    artifacts: ArtifactStore,
    configs: ConfigRepository,
}

impl StackingTrainer {
    pub fn new(
        store: Arc<DocumentStore>,
        cfg: LeagueConfig,
        dataset_cache_dir: PathBuf,
        artifact_root: PathBuf,
    ) -> Self {
        let datasets = DatasetBuilder::new(Arc::clone(&store), cfg.clone(), dataset_cache_dir);
        let runs = RunRepository::new(Arc::clone(&store), &cfg);
        let configs = ConfigRepository::classifier(store, &cfg);
        Self {
            cfg,
            datasets,
            runs,
            artifacts: ArtifactStore::new(artifact_root),
            configs,
        }
    }

    /// Sanitize a config name into a stable column token.
    fn short_name(doc: &ModelConfigDoc, used: &mut HashSet<String>) -> String {
        let base = match &doc.name {
            Some(name) if !name.is_empty() => name
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
                .collect::<String>(),
            _ => doc.config_id.chars().take(8).collect(),
        };
        let mut candidate = base.clone();
        let mut counter = 1;
        while used.contains(&candidate) {
            candidate = format!("{}_{}", base, counter);
            counter += 1;
        }
        used.insert(candidate.clone());
        candidate
    }

    async fn load_base(&self, config_id: &str, used: &mut HashSet<String>) -> Result<BaseModel> {
        let doc = self.configs.require(config_id).await?;
        let experiment: ExperimentConfig = serde_json::from_value(doc.config.clone())
            .map_err(|e| {
                CourtsideError::Config(format!(
                    "base config {} does not decode as an experiment config: {}",
                    config_id, e
                ))
            })?;
        let short_name = Self::short_name(&doc, used);

        // Prefer saved artifacts; fall back to retraining from the
        // training CSV with a hash-seeded RNG.
        let loaded = if let (Some(model), Some(scaler), Some(features)) = (
            doc.model_artifact_path.as_ref(),
            doc.scaler_artifact_path.as_ref(),
            doc.features_path.as_ref(),
        ) {
            ArtifactStore::load_classifier_from_paths(
                std::path::Path::new(model),
                std::path::Path::new(scaler),
                std::path::Path::new(features),
            )
            .ok()
        } else {
            None
        };
        let loaded = match loaded {
            Some(loaded) => Some(loaded),
            None => match &doc.run_id {
                Some(run_id) => self.artifacts.load_classifier(run_id).ok(),
                None => None,
            },
        };

        let (model, scaler, feature_names) = match loaded {
            Some(loaded) => loaded,
            None => {
                let training_csv = doc.training_csv.as_ref().ok_or_else(|| {
                    CourtsideError::DataMissing(format!(
                        "base model {} has neither saved artifacts nor a training CSV",
                        config_id
                    ))
                })?;
                tracing::warn!(config_id, "base artifacts missing; retraining from training CSV");
                self.retrain_base(&experiment, training_csv, &doc)?
            }
        };

        Ok(BaseModel {
            config_id: doc.config_id.clone(),
            short_name,
            model,
            scaler,
            feature_names,
            experiment,
            model_type: doc.model_type.clone(),
        })
    }

    fn retrain_base(
        &self,
        experiment: &ExperimentConfig,
        training_csv: &str,
        doc: &ModelConfigDoc,
    ) -> Result<(Classifier, Option<StandardScaler>, Vec<String>)> {
        let frame = DatasetFrame::load(std::path::Path::new(training_csv), &self.cfg)?;
        if frame.is_empty() {
            return Err(CourtsideError::DataMissing(format!(
                "training CSV {} is empty",
                training_csv
            )));
        }
        let labels = frame.target("HomeWon")?.clone();
        let kind = experiment.model.clone().ok_or_else(|| {
            CourtsideError::Config(format!(
                "base config {} carries no classifier model",
                doc.config_id
            ))
        })?;
        // Seed from the config hash so the rebuilt model is reproducible
        // per config.
        let seed = u64::from_str_radix(&stable_hash(&doc.config)[..16], 16).unwrap_or(42);
        let (scaler, scaled) = StandardScaler::fit_transform(&frame.features);
        let model = Classifier::fit(&kind, &scaled, &labels, seed)?;
        Ok((model, Some(scaler), frame.feature_columns))
    }

    /// All base configs must share the temporal triple.
    fn validate_compatibility(bases: &[BaseModel]) -> Result<()> {
        let reference = &bases[0].experiment.splits;
        for base in &bases[1..] {
            let splits = &base.experiment.splits;
            if splits.begin_year != reference.begin_year {
                return Err(CourtsideError::Config(format!(
                    "base model {} has incompatible begin_year (expected {:?}, got {:?})",
                    base.config_id, reference.begin_year, splits.begin_year
                )));
            }
            if splits.calibration_years != reference.calibration_years {
                return Err(CourtsideError::Config(format!(
                    "base model {} has incompatible calibration_years (expected {:?}, got {:?})",
                    base.config_id, reference.calibration_years, splits.calibration_years
                )));
            }
            if splits.evaluation_year != reference.evaluation_year {
                return Err(CourtsideError::Config(format!(
                    "base model {} has incompatible evaluation_year (expected {:?}, got {:?})",
                    base.config_id, reference.evaluation_year, splits.evaluation_year
                )));
            }
        }
        Ok(())
    }

    /// Base probabilities for a row set, with each base's own projection
    /// and preprocessing. Shape mismatches against a base scaler raise.
    fn base_probabilities(
        frame: &DatasetFrame,
        indices: &[usize],
        base: &BaseModel,
    ) -> Result<Vec<f64>> {
        let x = frame.project(indices, &base.feature_names);
        let scaled = match &base.scaler {
            Some(scaler) => {
                if scaler.n_features() != base.feature_names.len() {
                    return Err(CourtsideError::Config(format!(
                        "cannot scale features for base model {}: scaler expects {} features but the model lists {}",
                        base.config_id,
                        scaler.n_features(),
                        base.feature_names.len()
                    )));
                }
                scaler.transform(&x)
            }
            None => x,
        };
        Ok(base.model.predict_proba(&scaled))
    }

    /// Assemble the meta matrix for a row set: one `p_<name>` column per
    /// base, then informed extras, then user meta features.
    fn stacking_matrix(
        &self,
        frame: &DatasetFrame,
        indices: &[usize],
        bases: &[BaseModel],
        params: &StackingParams,
    ) -> Result<(Vec<String>, Vec<Vec<f64>>, Vec<f64>)> {
        let mut columns: Vec<(String, Vec<f64>)> = Vec::new();
        for base in bases {
            let probs = Self::base_probabilities(frame, indices, base)?;
            columns.push((format!("p_{}", base.short_name), probs));
        }

        if params.mode == StackingMode::Informed {
            let prob_columns: Vec<(String, Vec<f64>)> = columns.clone();
            if params.use_disagree {
                for i in 0..prob_columns.len() {
                    for j in (i + 1)..prob_columns.len() {
                        let name = format!(
                            "disagree_{}_{}",
                            prob_columns[i].0.trim_start_matches("p_"),
                            prob_columns[j].0.trim_start_matches("p_")
                        );
                        let values: Vec<f64> = prob_columns[i]
                            .1
                            .iter()
                            .zip(&prob_columns[j].1)
                            .map(|(a, b)| (a - b).abs())
                            .collect();
                        columns.push((name, values));
                    }
                }
            }
            if params.use_conf {
                for (name, probs) in &prob_columns {
                    let conf: Vec<f64> = probs.iter().map(|p| (p - 0.5).abs()).collect();
                    columns.push((format!("conf_{}", name.trim_start_matches("p_")), conf));
                }
            }
            for feature in &params.meta_features {
                match frame.feature_columns.iter().position(|f| f == feature) {
                    Some(idx) => {
                        let values: Vec<f64> =
                            indices.iter().map(|i| frame.features[*i][idx]).collect();
                        columns.push((feature.clone(), values));
                    }
                    None => {
                        tracing::warn!(%feature, "meta feature not found in dataset, skipping")
                    }
                }
            }
        }

        let labels: Vec<f64> = {
            let target = frame.target("HomeWon")?;
            indices.iter().map(|i| target[*i]).collect()
        };
        let names: Vec<String> = columns.iter().map(|(n, _)| n.clone()).collect();
        let n_rows = indices.len();
        let mut matrix = vec![Vec::with_capacity(columns.len()); n_rows];
        for (_, values) in &columns {
            for (row, value) in matrix.iter_mut().zip(values) {
                row.push(if value.is_finite() { *value } else { 0.0 });
            }
        }
        Ok((names, matrix, labels))
    }

    /// Train and evaluate a stacked ensemble.
    pub async fn train_stacked_model(
        &self,
        params: &StackingParams,
        session_id: &str,
    ) -> Result<ExperimentOutcome> {
        if params.base_config_ids.len() < 2 {
            return Err(CourtsideError::Config(format!(
                "stacking requires at least 2 base models, got {}",
                params.base_config_ids.len()
            )));
        }

        let mut used = HashSet::new();
        let mut bases = Vec::new();
        for config_id in &params.base_config_ids {
            bases.push(self.load_base(config_id, &mut used).await?);
        }
        Self::validate_compatibility(&bases)?;

        let reference = bases[0].experiment.splits.clone();
        let begin_year = reference.begin_year.unwrap_or(crate::config::DEFAULT_BEGIN_YEAR);
        let calibration_years = reference.calibration_years.clone();
        let evaluation_year = reference.evaluation_year.ok_or_else(|| {
            CourtsideError::Config("base configs carry no evaluation_year".to_string())
        })?;
        let min_cal = *calibration_years.iter().min().ok_or_else(|| {
            CourtsideError::Config("base configs carry no calibration_years".to_string())
        })?;

        // Union of every base's features plus requested meta features.
        let mut union: std::collections::BTreeSet<String> = bases
            .iter()
            .flat_map(|b| b.feature_names.iter().cloned())
            .collect();
        union.extend(params.meta_features.iter().cloned());
        let dataset = self
            .datasets
            .build_dataset(&DatasetSpec {
                individual_features: Some(union.into_iter().collect()),
                begin_year: Some(begin_year),
                min_games_played: reference.min_games_played,
                point_model_id: bases[0].experiment.features.point_model_id.clone(),
                ..DatasetSpec::default()
            })
            .await?;

        let stacking_config = json!({
            "task": "stacking",
            "base_config_ids": params.base_config_ids,
            "meta_model": params.meta_model,
            "stacking_mode": params.mode,
            "meta_features": params.meta_features,
            "use_disagree": params.use_disagree,
            "use_conf": params.use_conf,
            "splits": {
                "begin_year": begin_year,
                "calibration_years": calibration_years,
                "evaluation_year": evaluation_year,
            },
        });
        let run_id = self
            .runs
            .create_run(
                stacking_config.clone(),
                Some(dataset.dataset_id.clone()),
                "Stacked",
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

        let result = self
            .stacking_inner(
                &run_id,
                params,
                &bases,
                &dataset.csv_path,
                begin_year,
                &calibration_years,
                evaluation_year,
                min_cal,
            )
            .await;

        match result {
            Ok((metrics, diagnostics, artifacts)) => {
                self.runs
                    .update_run(
                        &run_id,
                        RunUpdate {
                            status: Some(RunStatus::Completed),
                            metrics: Some(metrics.clone()),
                            diagnostics: Some(diagnostics.clone()),
                            artifacts: Some(artifacts.clone()),
                        },
                    )
                    .await?;
                Ok(ExperimentOutcome {
                    run_id,
                    dataset_id: dataset.dataset_id.clone(),
                    metrics,
                    diagnostics,
                    artifacts,
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

    #[allow(clippy::too_many_arguments)]
    async fn stacking_inner(
        &self,
        run_id: &str,
        params: &StackingParams,
        bases: &[BaseModel],
        csv_path: &std::path::Path,
        begin_year: i32,
        calibration_years: &[i32],
        evaluation_year: i32,
        min_cal: i32,
    ) -> Result<(Value, Value, Value)> {
        let frame = DatasetFrame::load(csv_path, &self.cfg)?;
        if frame.is_empty() {
            return Err(CourtsideError::DataMissing("stacking dataset is empty".to_string()));
        }

        let train_idx = frame.indices_where(|_, ssy| ssy >= begin_year && ssy < min_cal);
        let cal_idx = frame.indices_where(|_, ssy| calibration_years.contains(&ssy));
        let eval_idx = frame.indices_where(|_, ssy| ssy == evaluation_year);
        if cal_idx.is_empty() {
            return Err(CourtsideError::DataMissing(format!(
                "no data found for calibration years {:?}",
                calibration_years
            )));
        }
        if eval_idx.is_empty() {
            return Err(CourtsideError::DataMissing(format!(
                "no data found for evaluation year {}",
                evaluation_year
            )));
        }

        // Meta-model trains on calibration rows only; base-training rows
        // would contribute in-sample probabilities.
        let (meta_cols, x_meta, y_meta) = self.stacking_matrix(&frame, &cal_idx, bases, params)?;
        let meta_model = Classifier::fit(&params.meta_model, &x_meta, &y_meta, 42)?;

        // Evaluation-year matrix and metrics.
        let (_, x_eval, y_eval) = self.stacking_matrix(&frame, &eval_idx, bases, params)?;
        let probs = meta_model.predict_proba(&x_eval);
        let metrics = json!({
            "accuracy_mean": accuracy(&y_eval, &probs),
            "accuracy_std": 0.0,
            "log_loss_mean": log_loss(&y_eval, &probs),
            "log_loss_std": 0.0,
            "brier_mean": brier_score(&y_eval, &probs),
            "brier_std": 0.0,
            "auc_mean": roc_auc(&y_eval, &probs),
            "auc_std": 0.0,
            "n_folds": 1,
            "split_type": "time_based_calibration",
            "evaluation_year": evaluation_year,
        });

        // Re-evaluate every base on the same evaluation rows for an
        // apples-to-apples summary.
        let mut base_summaries = Vec::new();
        for base in bases {
            let base_probs = Self::base_probabilities(&frame, &eval_idx, base)?;
            base_summaries.push(json!({
                "run_id": base.config_id,
                "model_type": base.model_type,
                "short_name": base.short_name,
                "begin_year": base.experiment.splits.begin_year,
                "calibration_years": base.experiment.splits.calibration_years,
                "evaluation_year": base.experiment.splits.evaluation_year,
                "n_features": base.feature_names.len(),
                "metrics": {
                    "accuracy_mean": accuracy(&y_eval, &base_probs),
                    "log_loss_mean": log_loss(&y_eval, &base_probs),
                    "brier_mean": brier_score(&y_eval, &base_probs),
                    "auc_mean": roc_auc(&y_eval, &base_probs),
                    "n_samples_evaluation": y_eval.len(),
                },
            }));
        }

        let meta_importances = ranked_pairs(&meta_cols, &meta_model.importances());
        let derived: Vec<&String> = meta_cols
            .iter()
            .filter(|c| c.starts_with("disagree_") || c.starts_with("conf_"))
            .collect();
        let meta_used: Vec<&String> = meta_cols
            .iter()
            .filter(|c| params.meta_features.contains(c))
            .collect();

        let (model_path, config_path) = self.artifacts.save_ensemble(
            run_id,
            &meta_model,
            &EnsembleConfigFile {
                run_id: run_id.to_string(),
                base_model_ids: params.base_config_ids.clone(),
                meta_feature_cols: meta_cols.clone(),
                meta_model_type: params.meta_model.name().to_string(),
                meta_c_value: match &params.meta_model {
                    ClassifierKind::LogisticRegression { c } | ClassifierKind::Svm { c } => Some(*c),
                    _ => None,
                },
                stacking_mode: match params.mode {
                    StackingMode::Naive => "naive".to_string(),
                    StackingMode::Informed => "informed".to_string(),
                },
                meta_features: params.meta_features.clone(),
                use_disagree: params.use_disagree,
                use_conf: params.use_conf,
            },
        )?;

        // Register the ensemble config so serving can select it.
        let mut doc = self
            .configs
            .upsert(
                json!({
                    "task": "stacking",
                    "base_config_ids": params.base_config_ids,
                    "meta_model": params.meta_model,
                    "stacking_mode": params.mode,
                    "meta_features": params.meta_features,
                    "use_disagree": params.use_disagree,
                    "use_conf": params.use_conf,
                    "splits": {
                        "begin_year": begin_year,
                        "calibration_years": calibration_years,
                        "evaluation_year": evaluation_year,
                    },
                }),
                "Stacked",
                None,
                Some(run_id.to_string()),
            )
            .await?;
        doc.ensemble = true;
        doc.base_config_ids = params.base_config_ids.clone();
        doc.model_artifact_path = Some(model_path.display().to_string());
        doc.ensemble_config_path = Some(config_path.display().to_string());
        self.configs.save(&doc).await?;

        let diagnostics = json!({
            "meta_model_type": params.meta_model.name(),
            "meta_feature_importances": meta_importances,
            "meta_feature_cols": meta_cols,
            "n_base_models": bases.len(),
            "base_run_ids": params.base_config_ids,
            "base_models_summary": base_summaries,
            "n_samples_train": train_idx.len(),
            "n_samples_calibration": cal_idx.len(),
            "n_samples_evaluation": eval_idx.len(),
            "evaluation_year": evaluation_year,
            "calibration_years": calibration_years,
            "begin_year": begin_year,
            "split_type": "time_based_calibration",
            "stacking_mode": params.mode,
            "use_disagree": params.use_disagree,
            "use_conf": params.use_conf,
            "meta_features_used": meta_used,
            "derived_features_used": derived,
            "ensemble_config_id": doc.config_id,
        });
        let artifacts = json!({
            "dataset_path": csv_path,
            "base_ids": params.base_config_ids,
            "meta_model_type": params.meta_model.name(),
            "meta_model_path": model_path,
            "ensemble_config_path": config_path,
        });
        Ok((metrics, diagnostics, artifacts))
    }
}
