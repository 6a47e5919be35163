//! Stats agent tools
//!
//! Windowed team and player lookups anchored to the matchup date and
//! season, plus a sandboxed arithmetic `run_code` tool for ad-hoc
//! aggregation. Windows are `season`, `gamesN`, or `daysN`; unknown
//! windows are rejected rather than treated as unlimited.

use serde_json::{json, Value};
use std::sync::Arc;

use courtside_core::games::Game;
use courtside_types::{CourtsideError, Result};

use super::{arg_str, arg_str_opt, FnTool, MatchupTool, ToolContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    Season,
    Games(u32),
    Days(u32),
}

/// Parse a window token; `games_10` normalizes to `games10`.
pub fn parse_window(window: &str) -> Result<Window> {
    let normalized = window.trim().replace('_', "").to_lowercase();
    if normalized == "season" {
        return Ok(Window::Season);
    }
    if let Some(n) = normalized.strip_prefix("games") {
        if let Ok(n) = n.parse::<u32>() {
            return Ok(Window::Games(n));
        }
    }
    if let Some(n) = normalized.strip_prefix("days") {
        if let Ok(n) = n.parse::<u32>() {
            return Ok(Window::Days(n));
        }
    }
    Err(CourtsideError::Tool(format!(
        "invalid window {:?} (allowed: \"season\", \"gamesN\", or \"daysN\")",
        window
    )))
}

fn game_row(game: &Game, team_keys: &[String], team_label: &str) -> Value {
    let is_team_home = team_keys.iter().any(|k| *k == game.home.name);
    let (team_points, opp_points) = if is_team_home {
        (game.home.points, game.away.points)
    } else {
        (game.away.points, game.home.points)
    };
    let team_won = game
        .home_won_resolved()
        .map(|home_won| if is_team_home { home_won } else { !home_won });
    json!({
        "game_id": game.game_id,
        "date": game.date.iso(),
        "season": game.season,
        "home": game.home.name,
        "away": game.away.name,
        "home_points": game.home.points,
        "away_points": game.away.points,
        "team": team_label,
        "is_team_home": is_team_home,
        "team_points": team_points,
        "opp_points": opp_points,
        "team_won": team_won,
    })
}

/// A team's completed games before the matchup date, windowed and
/// optionally split by home/away.
pub async fn team_games(
    ctx: &ToolContext,
    team_id: &str,
    window: &str,
    split: Option<&str>,
) -> Result<Vec<Value>> {
    let spec = parse_window(window)?;
    let keys = ctx.team_keys(team_id).await?;
    let label = keys.first().cloned().unwrap_or_else(|| team_id.to_string());
    let anchor = ctx.game.date;
    let season = ctx.game.season.clone();

    let mut games: Vec<Game> = ctx
        .games
        .list_completed()
        .await?
        .into_iter()
        .filter(|g| g.date.key() < anchor.key())
        .filter(|g| match split {
            Some("home") => keys.iter().any(|k| *k == g.home.name),
            Some("away") => keys.iter().any(|k| *k == g.away.name),
            _ => keys.iter().any(|k| *k == g.home.name || *k == g.away.name),
        })
        .filter(|g| match spec {
            // Season and day windows stay within the matchup's season.
            Window::Season | Window::Days(_) => g.season == season,
            Window::Games(_) => true,
        })
        .collect();
    games.sort_by_key(|g| std::cmp::Reverse(g.date.key()));
    match spec {
        Window::Games(n) => games.truncate(n as usize),
        Window::Days(n) => {
            let start = anchor.minus_days(n as i64).key();
            games.retain(|g| g.date.key() >= start);
        }
        Window::Season => {}
    }
    Ok(games.iter().map(|g| game_row(g, &keys, &label)).collect())
}

/// Pre-computed aggregates over a windowed game list.
pub async fn team_stats(
    ctx: &ToolContext,
    team_id: &str,
    window: &str,
    split: Option<&str>,
) -> Result<Value> {
    let games = team_games(ctx, team_id, window, split).await?;
    if games.is_empty() {
        return Ok(json!({
            "team": team_id,
            "window": window,
            "split": split.unwrap_or("all"),
            "games_played": 0,
            "wins": 0,
            "losses": 0,
            "win_pct": 0.0,
            "error": format!("No games found for team {} with window {}", team_id, window),
        }));
    }

    let mut wins = 0u32;
    let mut losses = 0u32;
    let mut home_games = 0u32;
    let mut away_games = 0u32;
    let mut points = 0.0;
    let mut allowed = 0.0;
    for row in &games {
        match row["team_won"].as_bool() {
            Some(true) => wins += 1,
            Some(false) => losses += 1,
            None => {}
        }
        if row["is_team_home"].as_bool().unwrap_or(false) {
            home_games += 1;
        } else {
            away_games += 1;
        }
        points += row["team_points"].as_f64().unwrap_or(0.0);
        allowed += row["opp_points"].as_f64().unwrap_or(0.0);
    }
    // Rows are newest-first; the streak is the unbroken run from the top.
    let mut streak_kind: Option<bool> = None;
    let mut streak = 0i64;
    for row in &games {
        match row["team_won"].as_bool() {
            Some(won) => match streak_kind {
                None => {
                    streak_kind = Some(won);
                    streak = 1;
                }
                Some(kind) if kind == won => streak += 1,
                _ => break,
            },
            None => break,
        }
    }
    let n = games.len() as f64;
    let streak_label = match streak_kind {
        Some(true) => format!("W{}", streak),
        Some(false) => format!("L{}", streak),
        None => "-".to_string(),
    };
    Ok(json!({
        "team": games[0]["team"],
        "window": window,
        "split": split.unwrap_or("all"),
        "season": ctx.game.season,
        "games_played": games.len(),
        "wins": wins,
        "losses": losses,
        "win_pct": wins as f64 / n,
        "avg_points": points / n,
        "avg_points_allowed": allowed / n,
        "avg_margin": (points - allowed) / n,
        "streak": streak_label,
        "home_games": home_games,
        "away_games": away_games,
        "last_game_date": games[0]["date"],
    }))
}

async fn compare_team_stats(
    ctx: &ToolContext,
    team_a: &str,
    team_b: &str,
    window: &str,
) -> Result<Value> {
    let a = team_stats(ctx, team_a, window, None).await?;
    let b = team_stats(ctx, team_b, window, None).await?;
    let delta = |key: &str| a[key].as_f64().unwrap_or(0.0) - b[key].as_f64().unwrap_or(0.0);
    Ok(json!({
        "team_a": a,
        "team_b": b,
        "deltas": {
            "win_pct": delta("win_pct"),
            "avg_points": delta("avg_points"),
            "avg_points_allowed": delta("avg_points_allowed"),
            "avg_margin": delta("avg_margin"),
        },
    }))
}

/// Games where the two teams played each other, newest first.
async fn head_to_head_games(
    ctx: &ToolContext,
    team_a: &str,
    team_b: &str,
    window: &str,
) -> Result<Vec<Value>> {
    let spec = parse_window(window)?;
    let keys_a = ctx.team_keys(team_a).await?;
    let keys_b = ctx.team_keys(team_b).await?;
    let label = keys_a.first().cloned().unwrap_or_else(|| team_a.to_string());
    let anchor = ctx.game.date;

    let mut games: Vec<Game> = ctx
        .games
        .list_completed()
        .await?
        .into_iter()
        .filter(|g| g.date.key() < anchor.key())
        .filter(|g| {
            let a_in = keys_a.iter().any(|k| *k == g.home.name || *k == g.away.name);
            let b_in = keys_b.iter().any(|k| *k == g.home.name || *k == g.away.name);
            a_in && b_in
        })
        .filter(|g| match spec {
            Window::Season | Window::Days(_) => g.season == ctx.game.season,
            Window::Games(_) => true,
        })
        .collect();
    games.sort_by_key(|g| std::cmp::Reverse(g.date.key()));
    if let Window::Games(n) = spec {
        games.truncate(n as usize);
    }
    Ok(games.iter().map(|g| game_row(g, &keys_a, &label)).collect())
}

async fn head_to_head_stats(
    ctx: &ToolContext,
    team_a: &str,
    team_b: &str,
    window: &str,
) -> Result<Value> {
    let games = head_to_head_games(ctx, team_a, team_b, window).await?;
    let wins = games
        .iter()
        .filter(|g| g["team_won"].as_bool() == Some(true))
        .count();
    let losses = games
        .iter()
        .filter(|g| g["team_won"].as_bool() == Some(false))
        .count();
    let margin: f64 = games
        .iter()
        .map(|g| g["team_points"].as_f64().unwrap_or(0.0) - g["opp_points"].as_f64().unwrap_or(0.0))
        .sum();
    let n = games.len().max(1) as f64;
    Ok(json!({
        "team_a": team_a,
        "team_b": team_b,
        "window": window,
        "games": games.len(),
        "team_a_wins": wins,
        "team_a_losses": losses,
        "avg_margin_for_a": margin / n,
    }))
}

async fn player_stats(ctx: &ToolContext, player_id: &str, window: &str) -> Result<Vec<Value>> {
    let spec = parse_window(window)?;
    let anchor = ctx.game.date;
    let mut lines: Vec<_> = ctx
        .player_stats
        .list_for_player(player_id)
        .await?
        .into_iter()
        .filter(|l| l.date.key() < anchor.key() && l.played())
        .filter(|l| match spec {
            Window::Season | Window::Days(_) => l.season == ctx.game.season,
            Window::Games(_) => true,
        })
        .collect();
    lines.sort_by_key(|l| std::cmp::Reverse(l.date.key()));
    match spec {
        Window::Games(n) => lines.truncate(n as usize),
        Window::Days(n) => {
            let start = anchor.minus_days(n as i64).key();
            lines.retain(|l| l.date.key() >= start);
        }
        Window::Season => {}
    }
    Ok(lines
        .iter()
        .map(|l| {
            json!({
                "game_id": l.game_id,
                "date": l.date.iso(),
                "team": l.team,
                "minutes": l.minutes,
                "points": l.points,
                "rebounds": l.rebounds,
                "assists": l.assists,
                "turnovers": l.turnovers,
                "steals": l.steals,
                "blocks": l.blocks,
                "fg": format!("{}/{}", l.fg_made, l.fg_att),
                "three": format!("{}/{}", l.three_made, l.three_att),
                "ft": format!("{}/{}", l.ft_made, l.ft_att),
                "plus_minus": l.plus_minus,
                "starter": l.starter,
            })
        })
        .collect())
}

/// Lightweight derived player aggregates over a window.
async fn advanced_player_stats(ctx: &ToolContext, player_id: &str, window: &str) -> Result<Value> {
    let rows = player_stats(ctx, player_id, window).await?;
    if rows.is_empty() {
        return Ok(json!({
            "player_id": player_id,
            "window": window,
            "games": 0,
            "error": "no games in window",
        }));
    }
    let lines: Vec<_> = ctx
        .player_stats
        .list_for_player(player_id)
        .await?
        .into_iter()
        .filter(|l| rows.iter().any(|r| r["game_id"] == json!(l.game_id.clone())))
        .collect();
    let n = lines.len() as f64;
    let sum = |f: fn(&courtside_core::games::PlayerGameLine) -> f64| -> f64 {
        lines.iter().map(|l| f(l)).sum()
    };
    let fga = sum(|l| l.fg_att);
    let fta = sum(|l| l.ft_att);
    let pts = sum(|l| l.points);
    let efg = if fga > 0.0 {
        (sum(|l| l.fg_made) + 0.5 * sum(|l| l.three_made)) / fga
    } else {
        0.0
    };
    let ts = if fga + 0.44 * fta > 0.0 {
        pts / (2.0 * (fga + 0.44 * fta))
    } else {
        0.0
    };
    Ok(json!({
        "player_id": player_id,
        "window": window,
        "games": lines.len(),
        "mpg": sum(|l| l.minutes) / n,
        "ppg": pts / n,
        "rpg": sum(|l| l.rebounds) / n,
        "apg": sum(|l| l.assists) / n,
        "efg": efg,
        "ts_pct": ts,
        "usage_events_per_game": (fga + 0.44 * fta + sum(|l| l.turnovers)) / n,
    }))
}

/// Rotation/talent aggregates (top-1 PER, top-3 average, starter average,
/// MPG-weighted PER) before the matchup date.
async fn rotation_stats(ctx: &ToolContext, team_id: &str, window: &str) -> Result<Value> {
    parse_window(window)?;
    let per = ctx.per_calculator().await?;
    let keys = ctx.team_keys(team_id).await?;
    let mut summary = None;
    for key in &keys {
        let candidate = per.team_summary(key, &ctx.game.season, &ctx.game.date);
        if !candidate.players.is_empty() {
            summary = Some((key.clone(), candidate));
            break;
        }
    }
    let (team, summary) = match summary {
        Some(found) => found,
        None => {
            return Ok(json!({
                "team": team_id,
                "window": window,
                "players": 0,
                "error": "no rated players before the matchup date",
            }))
        }
    };
    let top3: Vec<f64> = summary.players.iter().take(3).map(|p| p.per).collect();
    Ok(json!({
        "team": team,
        "window": window,
        "players": summary.players.len(),
        "per_mean": summary.per_mean,
        "per_weighted_mpg": summary.per_weighted_mpg,
        "starters_per_avg": summary.starters_mean,
        "top1_per": top3.first().copied().unwrap_or(0.0),
        "top3_per_avg": if top3.is_empty() { 0.0 } else { top3.iter().sum::<f64>() / top3.len() as f64 },
        "top_players": summary
            .players
            .iter()
            .take(5)
            .map(|p| json!({"player_id": p.player_id, "per": p.per, "mpg": p.mpg}))
            .collect::<Vec<Value>>(),
    }))
}

/// Sandboxed arithmetic evaluator: each non-empty line is an expression
/// over numbers, `+ - * /`, and parentheses.
pub fn run_code(code: &str) -> Result<Value> {
    let mut lines = Vec::new();
    for line in code.lines().map(|l| l.trim()).filter(|l| !l.is_empty()) {
        match eval_expression(line) {
            Ok(value) => lines.push(json!({"expr": line, "value": value})),
            Err(e) => lines.push(json!({"expr": line, "error": e.to_string()})),
        }
    }
    if lines.is_empty() {
        return Err(CourtsideError::Tool("empty code block".to_string()));
    }
    Ok(json!({ "lines": lines }))
}

fn eval_expression(input: &str) -> Result<f64> {
    struct Parser<'a> {
        chars: std::iter::Peekable<std::str::Chars<'a>>,
    }
    impl Parser<'_> {
        fn skip_ws(&mut self) {
            while self.chars.peek().map(|c| c.is_whitespace()).unwrap_or(false) {
                self.chars.next();
            }
        }
        fn expr(&mut self) -> Result<f64> {
            let mut value = self.term()?;
            loop {
                self.skip_ws();
                match self.chars.peek() {
                    Some('+') => {
                        self.chars.next();
                        value += self.term()?;
                    }
                    Some('-') => {
                        self.chars.next();
                        value -= self.term()?;
                    }
                    _ => return Ok(value),
                }
            }
        }
        fn term(&mut self) -> Result<f64> {
            let mut value = self.factor()?;
            loop {
                self.skip_ws();
                match self.chars.peek() {
                    Some('*') => {
                        self.chars.next();
                        value *= self.factor()?;
                    }
                    Some('/') => {
                        self.chars.next();
                        let divisor = self.factor()?;
                        if divisor == 0.0 {
                            return Err(CourtsideError::Tool("division by zero".to_string()));
                        }
                        value /= divisor;
                    }
                    _ => return Ok(value),
                }
            }
        }
        fn factor(&mut self) -> Result<f64> {
            self.skip_ws();
            match self.chars.peek() {
                Some('(') => {
                    self.chars.next();
                    let value = self.expr()?;
                    self.skip_ws();
                    if self.chars.next() != Some(')') {
                        return Err(CourtsideError::Tool("unbalanced parentheses".to_string()));
                    }
                    Ok(value)
                }
                Some('-') => {
                    self.chars.next();
                    Ok(-self.factor()?)
                }
                _ => {
                    let mut number = String::new();
                    while self
                        .chars
                        .peek()
                        .map(|c| c.is_ascii_digit() || *c == '.')
                        .unwrap_or(false)
                    {
                        number.push(self.chars.next().expect("peeked"));
                    }
                    number
                        .parse::<f64>()
                        .map_err(|_| CourtsideError::Tool(format!("invalid number near {:?}", number)))
                }
            }
        }
    }
    let mut parser = Parser {
        chars: input.chars().peekable(),
    };
    let value = parser.expr()?;
    parser.skip_ws();
    if parser.chars.next().is_some() {
        return Err(CourtsideError::Tool(format!(
            "unsupported expression: {}",
            input
        )));
    }
    Ok(value)
}

fn window_param() -> Value {
    json!({"type": "string", "description": "\"season\", \"gamesN\", or \"daysN\""})
}

/// The stats agent's tool set, bound to one matchup.
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
                super::experimenter::lineups_for_team(&ctx, &team_id).await
            })
        }),
    ));

    let c = Arc::clone(ctx);
    tools.push(FnTool::new(
        "get_team_stats",
        "Get pre-computed team aggregates (wins, losses, averages). USE THIS for team records instead of counting games. Args: team_id, window, optional split (\"home\"/\"away\").",
        json!({"type": "object", "properties": {"team_id": {"type": "string"}, "window": window_param(), "split": {"type": "string"}}, "required": ["team_id", "window"]}),
        Box::new(move |args| {
            let ctx = Arc::clone(&c);
            Box::pin(async move {
                let team_id = arg_str(&args, "team_id")?;
                let window = arg_str(&args, "window")?;
                let split = arg_str_opt(&args, "split");
                team_stats(&ctx, &team_id, &window, split.as_deref()).await
            })
        }),
    ));

    let c = Arc::clone(ctx);
    tools.push(FnTool::new(
        "compare_team_stats",
        "Compare two teams' stats side by side with deltas. Args: team_a_id, team_b_id, window.",
        json!({"type": "object", "properties": {"team_a_id": {"type": "string"}, "team_b_id": {"type": "string"}, "window": window_param()}, "required": ["team_a_id", "team_b_id", "window"]}),
        Box::new(move |args| {
            let ctx = Arc::clone(&c);
            Box::pin(async move {
                let a = arg_str(&args, "team_a_id")?;
                let b = arg_str(&args, "team_b_id")?;
                let window = arg_str(&args, "window")?;
                compare_team_stats(&ctx, &a, &b, &window).await
            })
        }),
    ));

    let c = Arc::clone(ctx);
    tools.push(FnTool::new(
        "get_rotation_stats",
        "Get pre-computed rotation/talent aggregates (top-1 PER, top-3 avg, starter avg, MPG-weighted PER). USE THIS for player talent audits. Args: team_id, window.",
        json!({"type": "object", "properties": {"team_id": {"type": "string"}, "window": window_param()}, "required": ["team_id", "window"]}),
        Box::new(move |args| {
            let ctx = Arc::clone(&c);
            Box::pin(async move {
                let team_id = arg_str(&args, "team_id")?;
                let window = arg_str(&args, "window")?;
                rotation_stats(&ctx, &team_id, &window).await
            })
        }),
    ));

    let c = Arc::clone(ctx);
    tools.push(FnTool::new(
        "get_team_games",
        "Get individual game results for trend analysis (NOT for counting records - use get_team_stats). NOT for head-to-head - use get_head_to_head_games. Args: team_id, window, optional split.",
        json!({"type": "object", "properties": {"team_id": {"type": "string"}, "window": window_param(), "split": {"type": "string"}}, "required": ["team_id", "window"]}),
        Box::new(move |args| {
            let ctx = Arc::clone(&c);
            Box::pin(async move {
                let team_id = arg_str(&args, "team_id")?;
                let window = arg_str(&args, "window")?;
                let split = arg_str_opt(&args, "split");
                Ok(Value::Array(
                    team_games(&ctx, &team_id, &window, split.as_deref()).await?,
                ))
            })
        }),
    ));

    let c = Arc::clone(ctx);
    tools.push(FnTool::new(
        "get_head_to_head_games",
        "Get games where two specific teams played EACH OTHER (head-to-head). This is the ONLY tool for H2H game lists. Args: team_a_id, team_b_id, window.",
        json!({"type": "object", "properties": {"team_a_id": {"type": "string"}, "team_b_id": {"type": "string"}, "window": window_param()}, "required": ["team_a_id", "team_b_id"]}),
        Box::new(move |args| {
            let ctx = Arc::clone(&c);
            Box::pin(async move {
                let a = arg_str(&args, "team_a_id")?;
                let b = arg_str(&args, "team_b_id")?;
                let window = arg_str_opt(&args, "window").unwrap_or_else(|| "season".to_string());
                Ok(Value::Array(head_to_head_games(&ctx, &a, &b, &window).await?))
            })
        }),
    ));

    let c = Arc::clone(ctx);
    tools.push(FnTool::new(
        "get_head_to_head_stats",
        "Get aggregated head-to-head record and stats between two teams. Use for H2H record verification. Args: team_a_id, team_b_id, window.",
        json!({"type": "object", "properties": {"team_a_id": {"type": "string"}, "team_b_id": {"type": "string"}, "window": window_param()}, "required": ["team_a_id", "team_b_id"]}),
        Box::new(move |args| {
            let ctx = Arc::clone(&c);
            Box::pin(async move {
                let a = arg_str(&args, "team_a_id")?;
                let b = arg_str(&args, "team_b_id")?;
                let window = arg_str_opt(&args, "window").unwrap_or_else(|| "season".to_string());
                head_to_head_stats(&ctx, &a, &b, &window).await
            })
        }),
    ));

    let c = Arc::clone(ctx);
    tools.push(FnTool::new(
        "get_player_stats",
        "Get windowed raw player game stats.",
        json!({"type": "object", "properties": {"player_id": {"type": "string"}, "window": window_param()}, "required": ["player_id", "window"]}),
        Box::new(move |args| {
            let ctx = Arc::clone(&c);
            Box::pin(async move {
                let player_id = arg_str(&args, "player_id")?;
                let window = arg_str(&args, "window")?;
                Ok(Value::Array(player_stats(&ctx, &player_id, &window).await?))
            })
        }),
    ));

    let c = Arc::clone(ctx);
    tools.push(FnTool::new(
        "get_advanced_player_stats",
        "Get lightweight derived player stats over a window.",
        json!({"type": "object", "properties": {"player_id": {"type": "string"}, "window": window_param()}, "required": ["player_id", "window"]}),
        Box::new(move |args| {
            let ctx = Arc::clone(&c);
            Box::pin(async move {
                let player_id = arg_str(&args, "player_id")?;
                let window = arg_str(&args, "window")?;
                advanced_player_stats(&ctx, &player_id, &window).await
            })
        }),
    ));

    tools.push(FnTool::new(
        "run_code",
        "Evaluate arithmetic expressions (one per line) for ad-hoc aggregation.",
        json!({"type": "object", "properties": {"code": {"type": "string"}}, "required": ["code"]}),
        Box::new(move |args| {
            Box::pin(async move {
                let code = arg_str(&args, "code")?;
                run_code(&code)
            })
        }),
    ));

    tools
}

/// The tools whose results are cacheable per matchup (deterministic
/// DB-backed lookups).
pub const CACHEABLE_STATS_TOOLS: [&str; 8] = [
    "get_team_stats",
    "compare_team_stats",
    "get_rotation_stats",
    "get_team_games",
    "get_player_stats",
    "get_advanced_player_stats",
    "get_head_to_head_games",
    "get_head_to_head_stats",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_parsing() {
        assert_eq!(parse_window("season").unwrap(), Window::Season);
        assert_eq!(parse_window("games10").unwrap(), Window::Games(10));
        assert_eq!(parse_window("games_12").unwrap(), Window::Games(12));
        assert_eq!(parse_window("days5").unwrap(), Window::Days(5));
        assert!(parse_window("everything").is_err());
        assert!(parse_window("").is_err());
    }

    #[test]
    fn arithmetic_evaluator() {
        let out = run_code("1 + 2 * 3\n(10 - 4) / 3\n-2 + 1").unwrap();
        let lines = out["lines"].as_array().unwrap();
        assert_eq!(lines[0]["value"], 7.0);
        assert_eq!(lines[1]["value"], 2.0);
        assert_eq!(lines[2]["value"], -1.0);
    }

    #[test]
    fn evaluator_reports_errors_per_line() {
        let out = run_code("1 / 0\nimport os").unwrap();
        let lines = out["lines"].as_array().unwrap();
        assert!(lines[0]["error"].as_str().unwrap().contains("zero"));
        assert!(lines[1].get("error").is_some());
    }
}
