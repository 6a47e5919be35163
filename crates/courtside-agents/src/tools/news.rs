//! Research/media agent tools
//!
//! News and web search through the TTL'd news cache; every tool accepts a
//! `force_refresh` flag bypassing the cache.

use serde_json::{json, Value};
use std::sync::Arc;

use super::{arg_bool, arg_str, FnTool, MatchupTool, ToolContext};

/// The research/media agent's tool set.
pub fn toolset(ctx: &Arc<ToolContext>, force_web_refresh: bool) -> Vec<Arc<dyn MatchupTool>> {
    let mut tools: Vec<Arc<dyn MatchupTool>> = Vec::new();
    let refresh_arg = json!({"type": "boolean", "description": "bypass the TTL cache"});

    let c = Arc::clone(ctx);
    tools.push(FnTool::new(
        "web_search",
        "General web search (fallback / broader context).",
        json!({"type": "object", "properties": {"query": {"type": "string"}, "num_results": {"type": "integer"}, "force_refresh": refresh_arg.clone()}, "required": ["query"]}),
        Box::new(move |args| {
            let ctx = Arc::clone(&c);
            Box::pin(async move {
                let query = arg_str(&args, "query")?;
                let num = args
                    .get("num_results")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(5) as usize;
                let refresh = arg_bool(&args, "force_refresh") || force_web_refresh;
                ctx.news.web_search(&query, num, refresh).await
            })
        }),
    ));

    let c = Arc::clone(ctx);
    tools.push(FnTool::new(
        "get_game_news",
        "Web search news for this game_id.",
        json!({"type": "object", "properties": {"game_id": {"type": "string"}, "force_refresh": refresh_arg.clone()}}),
        Box::new(move |args| {
            let ctx = Arc::clone(&c);
            Box::pin(async move {
                let refresh = arg_bool(&args, "force_refresh") || force_web_refresh;
                let label = format!("{} vs {}", ctx.game.away.name, ctx.game.home.name);
                ctx.news.game_news(&label, refresh).await
            })
        }),
    ));

    let c = Arc::clone(ctx);
    tools.push(FnTool::new(
        "get_team_news",
        "Web search news for a team_id. team_id is required (see shared context game.home.team_id / game.away.team_id).",
        json!({"type": "object", "properties": {"team_id": {"type": "string"}, "force_refresh": refresh_arg.clone()}, "required": ["team_id"]}),
        Box::new(move |args| {
            let ctx = Arc::clone(&c);
            Box::pin(async move {
                let team_id = arg_str(&args, "team_id")?;
                let refresh = arg_bool(&args, "force_refresh") || force_web_refresh;
                let keys = ctx.team_keys(&team_id).await?;
                let label = keys.first().cloned().unwrap_or(team_id);
                ctx.news.team_news(&label, refresh).await
            })
        }),
    ));

    let c = Arc::clone(ctx);
    tools.push(FnTool::new(
        "get_player_news",
        "Web search news for a player_id (usually from get_lineups output).",
        json!({"type": "object", "properties": {"player_id": {"type": "string"}, "force_refresh": refresh_arg}, "required": ["player_id"]}),
        Box::new(move |args| {
            let ctx = Arc::clone(&c);
            Box::pin(async move {
                let player_id = arg_str(&args, "player_id")?;
                let refresh = arg_bool(&args, "force_refresh") || force_web_refresh;
                ctx.news.player_news(&player_id, refresh).await
            })
        }),
    ));

    tools
}
