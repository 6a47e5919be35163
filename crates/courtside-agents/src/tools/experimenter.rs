//! Experimenter agent tools
//!
//! Lineups, roster bucket mutation (persists platform-wide), and re-running
//! the selected ensemble with a scenario snapshot.

use serde_json::{json, Value};
use std::sync::Arc;

use courtside_types::Result;

use super::{arg_str, FnTool, MatchupTool, ToolContext};

/// One team's buckets from the lineup service, selected by team id.
pub async fn lineups_for_team(ctx: &ToolContext, team_id: &str) -> Result<Value> {
    let keys = ctx.team_keys(team_id).await?;
    let lineups = ctx.lineup_service.get_game_lineups(&ctx.game_id).await?;
    let is_home = keys.iter().any(|k| *k == ctx.game.home.name);
    let side = if is_home { &lineups.home } else { &lineups.away };
    Ok(json!({
        "team": if is_home { &ctx.game.home.name } else { &ctx.game.away.name },
        "side": if is_home { "home" } else { "away" },
        "source": lineups.source,
        "starters": side.starters,
        "bench": side.bench,
        "inactive": side.inactive,
    }))
}

/// The experimenter's tool set.
pub fn toolset(ctx: &Arc<ToolContext>) -> Vec<Arc<dyn MatchupTool>> {
    let mut tools: Vec<Arc<dyn MatchupTool>> = Vec::new();

    let c = Arc::clone(ctx);
    tools.push(FnTool::new(
        "get_lineups",
        "Get starters/bench/injured for a team_id (required).",
        json!({"type": "object", "properties": {"team_id": {"type": "string"}}, "required": ["team_id"]}),
        Box::new(move |args| {
            let ctx = Arc::clone(&c);
            Box::pin(async move {
                let team_id = arg_str(&args, "team_id")?;
                lineups_for_team(&ctx, &team_id).await
            })
        }),
    ));

    let c = Arc::clone(ctx);
    tools.push(FnTool::new(
        "set_player_lineup_bucket",
        "Move a player to a roster bucket (bucket: \"injured\" | \"bench\" | \"starter\"). Persists in the roster collection platform-wide.",
        json!({"type": "object", "properties": {"player_id": {"type": "string"}, "bucket": {"type": "string"}}, "required": ["player_id", "bucket"]}),
        Box::new(move |args| {
            let ctx = Arc::clone(&c);
            Box::pin(async move {
                let player_id = arg_str(&args, "player_id")?;
                let bucket = arg_str(&args, "bucket")?;
                let roster = ctx
                    .rosters
                    .set_player_bucket(&ctx.game.season, &player_id, &bucket)
                    .await?;
                Ok(json!({
                    "player_id": player_id,
                    "bucket": bucket,
                    "team": roster.team,
                    "season": roster.season,
                    "persisted": true,
                }))
            })
        }),
    ));

    let c = Arc::clone(ctx);
    tools.push(FnTool::new(
        "predict",
        "Run the selected ensemble for this game_id, persist the prediction, and capture a scenario snapshot.",
        json!({"type": "object", "properties": {}}),
        Box::new(move |_args| {
            let ctx = Arc::clone(&c);
            Box::pin(async move {
                let (prediction, snapshot) = ctx
                    .prediction_service
                    .predict_and_snapshot(&ctx.game_id, Some("experimenter scenario".to_string()))
                    .await?;
                Ok(json!({
                    "game_id": prediction.game_id,
                    "home_win_prob": prediction.home_win_prob,
                    "away_win_prob": prediction.away_win_prob,
                    "predicted_winner": prediction.predicted_winner,
                    "snapshot_id": snapshot.snapshot_id,
                }))
            })
        }),
    ));

    tools
}
