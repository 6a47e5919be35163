//! Model-inspector tools
//!
//! Read-only views over the prediction artifacts: selected configs, the
//! prediction document and its feature values, base-model outputs, the
//! meta-model parameters, the per-base direction table, and scenario
//! snapshot variants.

use serde_json::{json, Map, Value};
use std::sync::Arc;

use courtside_core::ml::Classifier;
use courtside_infra::artifacts::ArtifactStore;
use courtside_types::{CourtsideError, Result};

use super::{arg_str, FnTool, MatchupTool, ToolContext};

async fn selected_configs(ctx: &ToolContext) -> Result<Value> {
    let classifier = ctx.configs.selected().await?;
    let points = ctx.points_configs.selected().await?;
    let summarize = |doc: Option<courtside_infra::repos::ModelConfigDoc>| match doc {
        Some(doc) => json!({
            "config_id": doc.config_id,
            "name": doc.name,
            "model_type": doc.model_type,
            "ensemble": doc.ensemble,
            "base_config_ids": doc.base_config_ids,
            "run_id": doc.run_id,
        }),
        None => Value::Null,
    };
    Ok(json!({
        "classifier": summarize(classifier),
        "points": summarize(points),
    }))
}

async fn prediction_doc(ctx: &ToolContext, game_id: &str) -> Result<Value> {
    match ctx.predictions.get(game_id).await? {
        Some(doc) => Ok(json!({
            "game_id": doc.game_id,
            "home_win_prob": doc.home_win_prob,
            "away_win_prob": doc.away_win_prob,
            "predicted_winner": doc.predicted_winner,
            "config_id": doc.config_id,
            "base_outputs": doc.base_outputs,
            "created_at": doc.created_at,
        })),
        None => Ok(json!({"error": format!("no prediction for game {}", game_id)})),
    }
}

async fn prediction_feature_values(
    ctx: &ToolContext,
    game_id: &str,
    keys: Option<Vec<String>>,
) -> Result<Value> {
    let doc = match ctx.predictions.get(game_id).await? {
        Some(doc) => doc,
        None => return Ok(json!({"error": format!("no prediction for game {}", game_id)})),
    };
    let mut out = Map::new();
    match keys {
        Some(keys) => {
            for key in keys {
                if let Some(v) = doc.features_dict.get(&key) {
                    out.insert(key, json!(v));
                }
            }
        }
        None => {
            for (key, v) in &doc.features_dict {
                out.insert(key.clone(), json!(v));
            }
        }
    }
    Ok(Value::Object(out))
}

async fn prediction_base_outputs(ctx: &ToolContext, game_id: &str) -> Result<Value> {
    match ctx.predictions.get(game_id).await? {
        Some(doc) => Ok(json!({
            "game_id": doc.game_id,
            "meta_feature_values": doc.meta_feature_values,
        })),
        None => Ok(json!({"error": format!("no prediction for game {}", game_id)})),
    }
}

/// Per-base directional table: which team each base model favors.
async fn base_model_direction_table(ctx: &ToolContext, game_id: &str) -> Result<Value> {
    let doc = match ctx.predictions.get(game_id).await? {
        Some(doc) => doc,
        None => return Ok(json!({"error": format!("no prediction for game {}", game_id)})),
    };
    let game = ctx.games.require(game_id).await?;
    let mut rows: Vec<Value> = doc
        .base_outputs
        .iter()
        .map(|(name, p)| {
            json!({
                "base": name.trim_start_matches("p_"),
                "p_home": p,
                "favors": if *p >= 0.5 { "HOME" } else { "AWAY" },
                "team": if *p >= 0.5 { &game.home.name } else { &game.away.name },
            })
        })
        .collect();
    rows.sort_by(|a, b| {
        b["p_home"]
            .as_f64()
            .partial_cmp(&a["p_home"].as_f64())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    Ok(json!({
        "game_id": game_id,
        "home": game.home.name,
        "away": game.away.name,
        "ensemble_p_home": doc.home_win_prob / 100.0,
        "bases": rows,
    }))
}

/// Meta-model coefficients/intercept plus the meta column list, for
/// contribution analysis. Tree meta-models expose structure counts only.
async fn ensemble_meta_model_params(ctx: &ToolContext) -> Result<Value> {
    let selected = ctx
        .configs
        .selected()
        .await?
        .ok_or_else(|| CourtsideError::Config("no selected classifier config".to_string()))?;
    if !selected.ensemble {
        return Err(CourtsideError::Config(format!(
            "selected config {} is not an ensemble",
            selected.config_id
        )));
    }
    let run_id = selected
        .run_id
        .ok_or_else(|| CourtsideError::Config("selected ensemble has no run recorded".to_string()))?;
    let artifacts = ArtifactStore::new(&ctx.artifact_root);
    let (meta_model, config) = artifacts.load_ensemble(&run_id)?;
    let params = match &meta_model {
        Classifier::Logistic(m) => json!({
            "coefficients": m.weights,
            "intercept": m.intercept,
            "c": m.c,
        }),
        Classifier::Svm(m) => json!({
            "coefficients": m.weights,
            "intercept": m.intercept,
            "c": m.c,
        }),
        Classifier::GradientBoosting(_) => json!({
            "note": "tree meta-model; see importances on the stacking run diagnostics",
        }),
    };
    Ok(json!({
        "run_id": config.run_id,
        "meta_model_type": config.meta_model_type,
        "meta_feature_cols": config.meta_feature_cols,
        "stacking_mode": config.stacking_mode,
        "params": params,
    }))
}

async fn snapshot_doc(ctx: &ToolContext, snapshot_id: &str) -> Result<Value> {
    match ctx.snapshots.get(snapshot_id).await? {
        Some(snap) => Ok(json!({
            "snapshot_id": snap.snapshot_id,
            "game_id": snap.game_id,
            "note": snap.note,
            "home_win_prob": snap.prediction.home_win_prob,
            "away_win_prob": snap.prediction.away_win_prob,
            "predicted_winner": snap.prediction.predicted_winner,
            "base_outputs": snap.prediction.base_outputs,
            "created_at": snap.created_at,
        })),
        None => Ok(json!({"error": format!("no snapshot {}", snapshot_id)})),
    }
}

async fn snapshot_base_outputs(ctx: &ToolContext, snapshot_id: &str) -> Result<Value> {
    match ctx.snapshots.get(snapshot_id).await? {
        Some(snap) => Ok(json!({
            "snapshot_id": snap.snapshot_id,
            "meta_feature_values": snap.prediction.meta_feature_values,
        })),
        None => Ok(json!({"error": format!("no snapshot {}", snapshot_id)})),
    }
}

/// The model-inspector's read-only tool set.
pub fn toolset(ctx: &Arc<ToolContext>) -> Vec<Arc<dyn MatchupTool>> {
    let mut tools: Vec<Arc<dyn MatchupTool>> = Vec::new();
    let game_arg = json!({"type": "object", "properties": {"game_id": {"type": "string"}}});
    let snapshot_arg = json!({"type": "object", "properties": {"snapshot_id": {"type": "string"}}, "required": ["snapshot_id"]});

    let c = Arc::clone(ctx);
    tools.push(FnTool::new(
        "get_base_model_direction_table",
        "USE FIRST: pre-computed direction table showing which team each base model favors. Do NOT override these directions.",
        game_arg.clone(),
        Box::new(move |args| {
            let ctx = Arc::clone(&c);
            Box::pin(async move {
                let game_id =
                    super::arg_str_opt(&args, "game_id").unwrap_or_else(|| ctx.game_id.clone());
                base_model_direction_table(&ctx, &game_id).await
            })
        }),
    ));

    let c = Arc::clone(ctx);
    tools.push(FnTool::new(
        "get_selected_configs",
        "Get currently selected classifier + points model configs.",
        json!({"type": "object", "properties": {}}),
        Box::new(move |_args| {
            let ctx = Arc::clone(&c);
            Box::pin(async move { selected_configs(&ctx).await })
        }),
    ));

    let c = Arc::clone(ctx);
    tools.push(FnTool::new(
        "get_ensemble_meta_model_params",
        "Get meta-model coefficients/intercept and meta_feature_cols for contribution analysis.",
        game_arg.clone(),
        Box::new(move |_args| {
            let ctx = Arc::clone(&c);
            Box::pin(async move { ensemble_meta_model_params(&ctx).await })
        }),
    ));

    let c = Arc::clone(ctx);
    tools.push(FnTool::new(
        "get_prediction_doc",
        "Get ensemble base model breakdown for this game_id.",
        game_arg.clone(),
        Box::new(move |args| {
            let ctx = Arc::clone(&c);
            Box::pin(async move {
                let game_id =
                    super::arg_str_opt(&args, "game_id").unwrap_or_else(|| ctx.game_id.clone());
                prediction_doc(&ctx, &game_id).await
            })
        }),
    ));

    let c = Arc::clone(ctx);
    tools.push(FnTool::new(
        "get_prediction_feature_values",
        "Get features_dict for this game_id; optionally filter by keys.",
        json!({"type": "object", "properties": {"game_id": {"type": "string"}, "keys": {"type": "array", "items": {"type": "string"}}}}),
        Box::new(move |args| {
            let ctx = Arc::clone(&c);
            Box::pin(async move {
                let game_id =
                    super::arg_str_opt(&args, "game_id").unwrap_or_else(|| ctx.game_id.clone());
                let keys = args.get("keys").and_then(|v| v.as_array()).map(|items| {
                    items
                        .iter()
                        .filter_map(|v| v.as_str().map(|s| s.to_string()))
                        .collect::<Vec<String>>()
                });
                prediction_feature_values(&ctx, &game_id, keys).await
            })
        }),
    ));

    let c = Arc::clone(ctx);
    tools.push(FnTool::new(
        "get_prediction_base_outputs",
        "Get ensemble meta_feature_values for this game_id.",
        game_arg,
        Box::new(move |args| {
            let ctx = Arc::clone(&c);
            Box::pin(async move {
                let game_id =
                    super::arg_str_opt(&args, "game_id").unwrap_or_else(|| ctx.game_id.clone());
                prediction_base_outputs(&ctx, &game_id).await
            })
        }),
    ));

    let c = Arc::clone(ctx);
    tools.push(FnTool::new(
        "get_prediction_snapshot_doc",
        "Get ensemble base model breakdown for a scenario snapshot_id.",
        snapshot_arg.clone(),
        Box::new(move |args| {
            let ctx = Arc::clone(&c);
            Box::pin(async move {
                let snapshot_id = arg_str(&args, "snapshot_id")?;
                snapshot_doc(&ctx, &snapshot_id).await
            })
        }),
    ));

    let c = Arc::clone(ctx);
    tools.push(FnTool::new(
        "get_prediction_snapshot_base_outputs",
        "Get ensemble meta_feature_values for a scenario snapshot_id.",
        snapshot_arg,
        Box::new(move |args| {
            let ctx = Arc::clone(&c);
            Box::pin(async move {
                let snapshot_id = arg_str(&args, "snapshot_id")?;
                snapshot_base_outputs(&ctx, &snapshot_id).await
            })
        }),
    ));

    tools
}
