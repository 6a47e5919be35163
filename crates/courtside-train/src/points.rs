//! Points regression experiments
//!
//! Trains per-perspective (`home_away`) or margin regressors, evaluates
//! with the optional time-based split, and always caches vectorized
//! predictions for every game in the dataset under a deterministic
//! `points_model_<run_id>` id.

use serde_json::{json, Value};
use std::sync::Arc;

use courtside_core::feature::{FeatureKey, Side};
use courtside_core::ml::metrics::{mae, mape, r2, rmse};
use courtside_core::ml::{Regressor, StandardScaler};
use courtside_infra::dataset::DatasetResult;
use courtside_infra::repos::{
    PointPredictionCacheRepository, PointPredictionDoc, RunStatus, RunUpdate,
};
use courtside_types::{CourtsideError, Result};

use crate::config::{ExperimentConfig, PointsTarget, SplitKind};
use crate::experiment::{ranked_pairs, ExperimentOutcome, ExperimentRunner};
use crate::frame::DatasetFrame;

const POINTS_CLAMP: (f64, f64) = (0.0, 200.0);
const MARGIN_CLAMP: (f64, f64) = (-60.0, 60.0);

/// Whether a feature belongs in a perspective's matrix. Diff and
/// perspective-free features feed both models; side features feed only
/// their own side.
fn feature_for_side(name: &str, side: Side) -> bool {
    match FeatureKey::parse(name) {
        Ok(key) => key.side == Side::Diff || key.side == side,
        // Unparseable features (e.g. pred_margin) feed both perspectives.
        Err(_) => true,
    }
}

struct FittedPerspective {
    features: Vec<String>,
    scaler: StandardScaler,
    model: Regressor,
}

fn fit_perspective(
    frame: &DatasetFrame,
    indices: &[usize],
    features: Vec<String>,
    targets: &[f64],
    config: &ExperimentConfig,
) -> Result<FittedPerspective> {
    let kind = config
        .points_model
        .as_ref()
        .ok_or_else(|| CourtsideError::Config("missing points_model".to_string()))?;
    let x = frame.project(indices, &features);
    let (scaler, scaled) = StandardScaler::fit_transform(&x);
    let model = Regressor::fit(kind, &scaled, targets, config.fit_seed())?;
    Ok(FittedPerspective {
        features,
        scaler,
        model,
    })
}

impl FittedPerspective {
    fn predict(&self, frame: &DatasetFrame, indices: &[usize], clamp: (f64, f64)) -> Vec<f64> {
        let x = frame.project(indices, &self.features);
        let scaled = self.scaler.transform(&x);
        self.model
            .predict(&scaled)
            .into_iter()
            .map(|v| v.clamp(clamp.0, clamp.1))
            .collect()
    }
}

pub(crate) async fn run_points_experiment(
    runner: &ExperimentRunner,
    config: &ExperimentConfig,
    dataset: &DatasetResult,
    session_id: &str,
) -> Result<ExperimentOutcome> {
    let run_id = runner
        .runs
        .create_run(
            serde_json::to_value(config)?,
            Some(dataset.dataset_id.clone()),
            config.model_type_name(),
            session_id,
        )
        .await?;
    runner
        .runs
        .update_run(
            &run_id,
            RunUpdate {
                status: Some(RunStatus::Running),
                ..RunUpdate::default()
            },
        )
        .await?;

    let point_model_id = format!("points_model_{}", run_id);
    match points_inner(runner, config, dataset, &point_model_id) {
        Ok((metrics, mut diagnostics, predictions)) => {
            let cache = PointPredictionCacheRepository::new(Arc::clone(&runner.store), &runner.cfg);
            let cached = cache
                .cache_predictions(
                    &predictions,
                    json!({
                        "run_id": run_id,
                        "model_type": config.model_type_name(),
                        "dataset_id": dataset.dataset_id,
                    }),
                )
                .await?;
            if let Some(obj) = diagnostics.as_object_mut() {
                obj.insert("cached_predictions".to_string(), json!(cached));
            }
            tracing::info!(%point_model_id, cached, "cached point predictions");

            let artifacts = json!({
                "dataset_path": dataset.csv_path,
                "model_type": config.model_type_name(),
                "point_model_id": point_model_id,
            });
            runner
                .runs
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
                point_model_id: Some(point_model_id),
                dropped_features: dataset.dropped_features.clone(),
            })
        }
        Err(e) => {
            runner
                .runs
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

type PointsInner = (Value, Value, Vec<PointPredictionDoc>);

fn points_inner(
    runner: &ExperimentRunner,
    config: &ExperimentConfig,
    dataset: &DatasetResult,
    point_model_id: &str,
) -> Result<PointsInner> {
    let frame = DatasetFrame::load(&dataset.csv_path, &runner.cfg)?;
    if frame.is_empty() {
        return Err(CourtsideError::DataMissing(format!(
            "dataset {} is empty; no training data available",
            dataset.dataset_id
        )));
    }
    let home_points = frame.target("home_points")?.clone();
    let away_points = frame.target("away_points")?.clone();

    // Rows with missing or non-positive totals are dropped.
    let valid: Vec<usize> = (0..frame.len())
        .filter(|i| {
            home_points[*i].is_finite()
                && away_points[*i].is_finite()
                && home_points[*i] > 0.0
                && away_points[*i] > 0.0
        })
        .collect();
    if valid.is_empty() {
        return Err(CourtsideError::DataMissing(
            "no rows with valid home_points/away_points".to_string(),
        ));
    }
    if valid.len() < frame.len() {
        tracing::warn!(
            dropped = frame.len() - valid.len(),
            "filtered rows with invalid point totals"
        );
    }
    if frame.feature_columns.is_empty() {
        return Err(CourtsideError::DataMissing(
            "dataset has no feature columns after partitioning".to_string(),
        ));
    }

    // Optional time-based split: fit strictly before the evaluation year,
    // report on the evaluation year.
    let (fit_idx, eval_idx): (Vec<usize>, Vec<usize>) =
        if config.splits.kind == SplitKind::YearBasedCalibration {
            let begin = config.splits.begin_year_or_default();
            let eval_year = config
                .splits
                .evaluation_year
                .ok_or_else(|| CourtsideError::Config("missing evaluation_year".to_string()))?;
            let fit: Vec<usize> = valid
                .iter()
                .copied()
                .filter(|i| {
                    let ssy = frame.season_start_years[*i];
                    ssy >= begin && ssy < eval_year
                })
                .collect();
            let eval: Vec<usize> = valid
                .iter()
                .copied()
                .filter(|i| frame.season_start_years[*i] == eval_year)
                .collect();
            if fit.is_empty() || eval.is_empty() {
                return Err(CourtsideError::DataMissing(
                    "time-based split produced an empty fit or evaluation set".to_string(),
                ));
            }
            (fit, eval)
        } else {
            (valid.clone(), valid.clone())
        };

    let target_at = |column: &[f64], idx: &[usize]| -> Vec<f64> {
        idx.iter().map(|i| column[*i]).collect()
    };

    let (metrics, diagnostics, predictions) = match config.points_target {
        PointsTarget::Margin => {
            let margin_fit: Vec<f64> = fit_idx
                .iter()
                .map(|i| home_points[*i] - away_points[*i])
                .collect();
            let model = fit_perspective(
                &frame,
                &fit_idx,
                frame.feature_columns.clone(),
                &margin_fit,
                config,
            )?;

            let eval_pred = model.predict(&frame, &eval_idx, MARGIN_CLAMP);
            let eval_true: Vec<f64> = eval_idx
                .iter()
                .map(|i| home_points[*i] - away_points[*i])
                .collect();
            let metrics = json!({
                "margin_mae": mae(&eval_true, &eval_pred),
                "margin_rmse": rmse(&eval_true, &eval_pred),
                "margin_r2": r2(&eval_true, &eval_pred),
            });

            let all_pred = model.predict(&frame, &valid, MARGIN_CLAMP);
            let predictions = build_prediction_docs(
                &frame,
                &valid,
                point_model_id,
                |pos| (None, None, Some(all_pred[pos])),
            );
            let importances = ranked_pairs(&model.features, &model.model.importances());
            let diagnostics = json!({
                "n_features": model.features.len(),
                "n_samples": fit_idx.len(),
                "feature_names": model.features,
                "perspective_split": Value::Null,
                "point_model_id": point_model_id,
                "feature_importances": importances,
            });
            (metrics, diagnostics, predictions)
        }
        PointsTarget::HomeAway => {
            let home_features: Vec<String> = frame
                .feature_columns
                .iter()
                .filter(|f| feature_for_side(f, Side::Home))
                .cloned()
                .collect();
            let away_features: Vec<String> = frame
                .feature_columns
                .iter()
                .filter(|f| feature_for_side(f, Side::Away))
                .cloned()
                .collect();

            let home_model = fit_perspective(
                &frame,
                &fit_idx,
                home_features,
                &target_at(&home_points, &fit_idx),
                config,
            )?;
            let away_model = fit_perspective(
                &frame,
                &fit_idx,
                away_features,
                &target_at(&away_points, &fit_idx),
                config,
            )?;

            let home_eval = home_model.predict(&frame, &eval_idx, POINTS_CLAMP);
            let away_eval = away_model.predict(&frame, &eval_idx, POINTS_CLAMP);
            let home_true = target_at(&home_points, &eval_idx);
            let away_true = target_at(&away_points, &eval_idx);
            let margin_pred: Vec<f64> = home_eval
                .iter()
                .zip(&away_eval)
                .map(|(h, a)| h - a)
                .collect();
            let margin_true: Vec<f64> = home_true
                .iter()
                .zip(&away_true)
                .map(|(h, a)| h - a)
                .collect();
            let total_pred: Vec<f64> = home_eval
                .iter()
                .zip(&away_eval)
                .map(|(h, a)| h + a)
                .collect();
            let total_true: Vec<f64> = home_true
                .iter()
                .zip(&away_true)
                .map(|(h, a)| h + a)
                .collect();

            let home_mae = mae(&home_true, &home_eval);
            let away_mae = mae(&away_true, &away_eval);
            let metrics = json!({
                "home_mae": home_mae,
                "home_rmse": rmse(&home_true, &home_eval),
                "home_r2": r2(&home_true, &home_eval),
                "home_mape": mape(&home_true, &home_eval),
                "away_mae": away_mae,
                "away_rmse": rmse(&away_true, &away_eval),
                "away_r2": r2(&away_true, &away_eval),
                "away_mape": mape(&away_true, &away_eval),
                "home_mae_mean": (home_mae + away_mae) / 2.0,
                "away_mae_mean": (home_mae + away_mae) / 2.0,
                "margin_mae": mae(&margin_true, &margin_pred),
                "margin_rmse": rmse(&margin_true, &margin_pred),
                "margin_r2": r2(&margin_true, &margin_pred),
                "total_mae": mae(&total_true, &total_pred),
                "total_rmse": rmse(&total_true, &total_pred),
                "total_r2": r2(&total_true, &total_pred),
            });

            let home_all = home_model.predict(&frame, &valid, POINTS_CLAMP);
            let away_all = away_model.predict(&frame, &valid, POINTS_CLAMP);
            let predictions = build_prediction_docs(
                &frame,
                &valid,
                point_model_id,
                |pos| (Some(home_all[pos]), Some(away_all[pos]), None),
            );

            // Shared (diff/perspective-free) features average their two
            // importances; side features keep their own.
            let mut combined: std::collections::HashMap<String, (f64, usize)> =
                std::collections::HashMap::new();
            for (features, model) in [
                (&home_model.features, &home_model.model),
                (&away_model.features, &away_model.model),
            ] {
                for (name, score) in features.iter().zip(model.importances()) {
                    let entry = combined.entry(name.clone()).or_insert((0.0, 0));
                    entry.0 += score;
                    entry.1 += 1;
                }
            }
            let names: Vec<String> = combined.keys().cloned().collect();
            let scores: Vec<f64> = names
                .iter()
                .map(|n| {
                    let (sum, count) = combined[n];
                    sum / count as f64
                })
                .collect();
            let importances = ranked_pairs(&names, &scores);

            let all_features: std::collections::BTreeSet<String> = home_model
                .features
                .iter()
                .chain(away_model.features.iter())
                .cloned()
                .collect();
            let diagnostics = json!({
                "n_features": all_features.len(),
                "n_samples": fit_idx.len(),
                "feature_names": all_features.iter().cloned().collect::<Vec<String>>(),
                "perspective_split": {
                    "home_model_features": home_model.features.len(),
                    "away_model_features": away_model.features.len(),
                    "total_unique_features": all_features.len(),
                },
                "point_model_id": point_model_id,
                "feature_importances": importances,
            });
            (metrics, diagnostics, predictions)
        }
    };

    Ok((metrics, diagnostics, predictions))
}

fn build_prediction_docs<F>(
    frame: &DatasetFrame,
    indices: &[usize],
    point_model_id: &str,
    values: F,
) -> Vec<PointPredictionDoc>
where
    F: Fn(usize) -> (Option<f64>, Option<f64>, Option<f64>),
{
    let meta = |name: &str, i: usize| -> String {
        frame
            .meta
            .get(name)
            .and_then(|v| v.get(i))
            .cloned()
            .unwrap_or_default()
    };
    indices
        .iter()
        .enumerate()
        .map(|(pos, i)| {
            let (home, away, margin) = values(pos);
            PointPredictionDoc {
                model_id: point_model_id.to_string(),
                game_id: meta("game_id", *i),
                pred_home_points: home,
                pred_away_points: away,
                pred_margin: margin,
                year: meta("Year", *i).parse().unwrap_or(0),
                month: meta("Month", *i).parse().unwrap_or(0),
                day: meta("Day", *i).parse().unwrap_or(0),
                home_team: meta("Home", *i),
                away_team: meta("Away", *i),
            }
        })
        .collect()
}
