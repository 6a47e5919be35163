//! Shared feature context
//!
//! One-shot loader state for the feature pipeline: pins games, player
//! lines, Elo, team-name normalization, and venue lookups in memory, then
//! dispatches per-row feature calculation. The context owns the
//! calculators; the stat handler never reaches back into it. All methods
//! take `&self` and are safe to share across worker threads; internal
//! caches only extend under a mutex.

use std::collections::HashMap;
use std::sync::Arc;

use courtside_types::{GameDate, LeagueConfig, Result};

use crate::elo::EloCache;
use crate::feature::FeatureKey;
use crate::games::{Game, GameIndex, PlayerGameLine, Team};
use crate::per::PerCalculator;
use crate::stats::StatHandler;

/// Everything the infra loader pins in memory for a context.
#[derive(Default)]
pub struct ContextData {
    pub games: Vec<Game>,
    pub player_lines: Vec<PlayerGameLine>,
    pub teams: Vec<Team>,
    /// venue_guid -> (lat, lon)
    pub venue_coords: HashMap<String, (f64, f64)>,
    /// game_id -> venue_guid, for games whose document carries no guid
    pub game_venues: HashMap<String, String>,
}

/// Read-mostly shared state for per-row feature calculation.
pub struct SharedFeatureContext {
    cfg: LeagueConfig,
    feature_names: Vec<String>,
    index: Arc<GameIndex>,
    handler: StatHandler,
    per: Option<PerCalculator>,
    team_name_map: HashMap<String, String>,
    /// game_id -> (home severity, away severity), precomputed when injury
    /// features are requested so row calculation stays O(1) per lookup.
    season_severity: HashMap<String, (f64, f64)>,
    needs_per: bool,
    needs_injuries: bool,
}

fn feature_needs_per(name: &str) -> bool {
    name.starts_with("player_")
        || name.starts_with("per_available")
        || name
            .split('|')
            .next()
            .map(|s| s.to_lowercase().ends_with("_per"))
            .unwrap_or(false)
}

impl SharedFeatureContext {
    /// Build a context from preloaded data. `preload_seasons` bounds the
    /// pinned corpus to an explicit season list.
    pub fn new(
        feature_names: Vec<String>,
        cfg: LeagueConfig,
        data: ContextData,
        preload_seasons: Option<Vec<String>>,
    ) -> Result<Self> {
        let needs_per = feature_names.iter().any(|f| feature_needs_per(f));
        let needs_injuries = feature_names.iter().any(|f| f.starts_with("inj_"));
        let needs_elo = feature_names
            .iter()
            .any(|f| f.split('|').next().map(|s| s.starts_with("elo")).unwrap_or(false));

        let games: Vec<Game> = match &preload_seasons {
            Some(seasons) => data
                .games
                .into_iter()
                .filter(|g| seasons.iter().any(|s| *s == g.season))
                .collect(),
            None => data.games,
        };

        let index = Arc::new(GameIndex::build(games, &cfg));
        let mut handler = StatHandler::new(Arc::clone(&index));
        if needs_elo {
            handler.set_elo(Arc::new(EloCache::build(index.all_games(), cfg.elo.clone())));
        }
        handler.set_venues(data.venue_coords, data.game_venues);

        let per = if needs_per || needs_injuries {
            Some(PerCalculator::build(
                index.all_games(),
                data.player_lines,
                preload_seasons.as_deref(),
            ))
        } else {
            None
        };

        let mut team_name_map = HashMap::new();
        for team in &data.teams {
            if !team.display_name.is_empty() && !team.abbreviation.is_empty() {
                team_name_map.insert(team.display_name.clone(), team.abbreviation.clone());
                team_name_map.insert(
                    team.display_name.to_lowercase(),
                    team.abbreviation.clone(),
                );
            }
        }

        let mut ctx = Self {
            cfg,
            feature_names,
            index,
            handler,
            per,
            team_name_map,
            season_severity: HashMap::new(),
            needs_per,
            needs_injuries,
        };
        if ctx.needs_injuries {
            ctx.season_severity = ctx.precompute_season_severity();
        }
        Ok(ctx)
    }

    pub fn config(&self) -> &LeagueConfig {
        &self.cfg
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn index(&self) -> &GameIndex {
        &self.index
    }

    pub fn per_calculator(&self) -> Option<&PerCalculator> {
        self.per.as_ref()
    }

    /// Elo rating points accumulated during the replay, for persistence
    /// into the Elo cache collection.
    pub fn elo_records(&self) -> &[crate::elo::EloRecord] {
        self.handler
            .elo()
            .map(|e| e.records())
            .unwrap_or(&[])
    }

    /// Normalize a display name to the abbreviation used in game docs.
    /// Unknown names pass through unchanged.
    pub fn normalize_team(&self, name: &str) -> String {
        if let Some(abbr) = self.team_name_map.get(name) {
            return abbr.clone();
        }
        if let Some(abbr) = self.team_name_map.get(&name.to_lowercase()) {
            return abbr.clone();
        }
        name.to_string()
    }

    /// One severity entry per game, computed once so per-row injury
    /// features avoid re-aggregating a whole season of player lines.
    fn precompute_season_severity(&self) -> HashMap<String, (f64, f64)> {
        let mut out = HashMap::new();
        let per = match &self.per {
            Some(per) => per,
            None => return out,
        };
        for game in self.index.all_games() {
            let home_injured = &game.home.injured_players;
            let away_injured = &game.away.injured_players;
            if home_injured.is_empty() && away_injured.is_empty() {
                continue;
            }
            let home_summary = per.team_summary(&game.home.name, &game.season, &game.date);
            let away_summary = per.team_summary(&game.away.name, &game.season, &game.date);
            let home_sev = per.injury_impact(&home_summary, home_injured).severity;
            let away_sev = per.injury_impact(&away_summary, away_injured).severity;
            out.insert(game.game_id.clone(), (home_sev, away_sev));
        }
        out
    }

    fn injuries_from_game_doc(
        &self,
        home: &str,
        away: &str,
        season: &str,
        date: &GameDate,
    ) -> Option<HashMap<String, Vec<String>>> {
        let game = self.index.find_game(season, date, home)?;
        if game.home.injured_players.is_empty() && game.away.injured_players.is_empty() {
            return None;
        }
        let mut out = HashMap::new();
        out.insert(home.to_string(), game.home.injured_players.clone());
        out.insert(away.to_string(), game.away.injured_players.clone());
        Some(out)
    }

    /// Calculate every configured feature for one row, sourcing the
    /// injured-player lists from the game document (training path).
    #[allow(clippy::too_many_arguments)]
    pub fn calculate_features_for_row(
        &self,
        home: &str,
        away: &str,
        season: &str,
        date: &GameDate,
        game_id: Option<&str>,
        venue_guid: Option<&str>,
        existing_row: Option<&HashMap<String, f64>>,
    ) -> HashMap<String, f64> {
        let home = self.normalize_team(home);
        let away = self.normalize_team(away);
        let injured = self.injuries_from_game_doc(&home, &away, season, date);
        self.calculate_features_with_injuries(
            &home,
            &away,
            season,
            date,
            game_id,
            venue_guid,
            existing_row,
            injured.as_ref(),
        )
    }

    /// Same as [`calculate_features_for_row`] but with an explicit injured
    /// list (serving path, sourced from roster flags).
    #[allow(clippy::too_many_arguments)]
    pub fn calculate_features_with_injuries(
        &self,
        home: &str,
        away: &str,
        season: &str,
        date: &GameDate,
        game_id: Option<&str>,
        venue_guid: Option<&str>,
        existing_row: Option<&HashMap<String, f64>>,
        injured: Option<&HashMap<String, Vec<String>>>,
    ) -> HashMap<String, f64> {
        let mut features: HashMap<String, f64> = HashMap::new();

        for name in &self.feature_names {
            if !name.contains('|') {
                let value = match name.as_str() {
                    "SeasonStartYear" => self.cfg.season_start_year(date.year, date.month) as f64,
                    "Year" => date.year as f64,
                    "Month" => date.month as f64,
                    "Day" => date.day as f64,
                    _ => 0.0,
                };
                features.insert(name.clone(), value);
                continue;
            }
            if name.starts_with("player_")
                || name.starts_with("per_available")
                || name.starts_with("inj_")
            {
                continue;
            }
            let value = self
                .handler
                .calculate_feature(
                    name,
                    home,
                    away,
                    season,
                    date,
                    self.per.as_ref(),
                    venue_guid,
                )
                .unwrap_or(0.0);
            features.insert(name.clone(), if value.is_finite() { value } else { 0.0 });
        }

        if (self.needs_per || self.needs_injuries) && self.per.is_some() {
            let per = self.per.as_ref().expect("per calculator present");
            let per_features =
                per.get_game_per_features(home, away, season, date, injured);
            for name in &self.feature_names {
                if name.starts_with("player_")
                    || name.starts_with("per_available")
                    || name.starts_with("inj_")
                {
                    features.insert(
                        name.clone(),
                        per_features.get(name).copied().unwrap_or(0.0),
                    );
                }
            }
            // Precomputed severity table wins over the per-row computation
            // when available.
            if let Some((home_sev, away_sev)) =
                game_id.and_then(|id| self.season_severity.get(id).copied())
            {
                let names = [
                    ("inj_severity|none|raw|home", home_sev),
                    ("inj_severity|none|raw|away", away_sev),
                    ("inj_severity|none|raw|diff", home_sev - away_sev),
                ];
                for (name, value) in names {
                    if self.feature_names.iter().any(|f| f == name) {
                        features.insert(name.to_string(), value);
                    }
                }
            }

            if let Some(existing) = existing_row {
                self.fix_share_features(&mut features, existing, home, away, season, date);
            }
        }

        // Every requested feature has a value; non-applicable ones are 0.0.
        for name in &self.feature_names {
            features.entry(name.clone()).or_insert(0.0);
        }
        features
    }

    /// Recompute share features from existing raw master values when the
    /// live computation produced zero but the stored raw aggregate did not
    /// (incremental-update path).
    fn fix_share_features(
        &self,
        features: &mut HashMap<String, f64>,
        existing: &HashMap<String, f64>,
        home: &str,
        away: &str,
        season: &str,
        date: &GameDate,
    ) {
        let per = match &self.per {
            Some(per) => per,
            None => return,
        };
        let pairs = [
            (
                "inj_per_share|none|top3_sum|home",
                "inj_per|none|top3_sum|home",
            ),
            (
                "inj_per_share|none|top3_sum|away",
                "inj_per|none|top3_sum|away",
            ),
            (
                "inj_per_weighted_share|none|weighted_MIN|home",
                "inj_per|none|weighted_MIN|home",
            ),
            (
                "inj_per_weighted_share|none|weighted_MIN|away",
                "inj_per|none|weighted_MIN|away",
            ),
        ];

        let mut summaries: Option<(crate::per::TeamPerSummary, crate::per::TeamPerSummary)> = None;
        for (share_name, raw_name) in pairs {
            if !self.feature_names.iter().any(|f| f == share_name) {
                continue;
            }
            let current = features.get(share_name).copied().unwrap_or(0.0);
            let raw = existing.get(raw_name).copied().unwrap_or(0.0);
            if current != 0.0 || raw == 0.0 {
                continue;
            }
            if summaries.is_none() {
                summaries = Some((
                    per.team_summary(home, season, date),
                    per.team_summary(away, season, date),
                ));
            }
            let (home_summary, away_summary) = summaries.as_ref().expect("summaries fetched");
            let value = if share_name.contains("top3_sum") {
                if share_name.ends_with("home") {
                    PerCalculator::share(raw, home_summary.top3_sum)
                } else {
                    PerCalculator::share(raw, away_summary.top3_sum)
                }
            } else if share_name.ends_with("home") {
                PerCalculator::share(raw, home_summary.weighted_min_total)
            } else {
                PerCalculator::share(raw, away_summary.weighted_min_total)
            };
            features.insert(share_name.to_string(), value);
        }

        for (diff_name, home_name, away_name) in [
            (
                "inj_per_share|none|top3_sum|diff",
                "inj_per_share|none|top3_sum|home",
                "inj_per_share|none|top3_sum|away",
            ),
            (
                "inj_per_weighted_share|none|weighted_MIN|diff",
                "inj_per_weighted_share|none|weighted_MIN|home",
                "inj_per_weighted_share|none|weighted_MIN|away",
            ),
        ] {
            if self.feature_names.iter().any(|f| f == diff_name) {
                let h = features.get(home_name).copied().unwrap_or(0.0);
                let a = features.get(away_name).copied().unwrap_or(0.0);
                features.insert(diff_name.to_string(), h - a);
            }
        }
    }

    /// Validate that every configured feature key parses; used by builders
    /// to fail fast before a long generation run.
    pub fn validate_features(&self) -> Result<()> {
        for name in &self.feature_names {
            if name.contains('|') {
                FeatureKey::parse(name)?;
            }
        }
        Ok(())
    }

    pub fn severity_for(&self, game_id: &str) -> Option<(f64, f64)> {
        self.season_severity.get(game_id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::games::TeamBox;

    fn team_box(name: &str, points: f64) -> TeamBox {
        TeamBox {
            name: name.to_string(),
            points,
            fg_made: 40.0,
            fg_att: 88.0,
            three_made: 11.0,
            three_att: 31.0,
            ft_made: 16.0,
            ft_att: 21.0,
            off_reb: 9.0,
            def_reb: 33.0,
            rebounds: 42.0,
            assists: 24.0,
            turnovers: 13.0,
            steals: 7.0,
            blocks: 4.0,
            fouls: 18.0,
            ..TeamBox::default()
        }
    }

    fn fixture() -> ContextData {
        let mut games = Vec::new();
        for day in 1..=8u32 {
            games.push(Game {
                game_id: format!("g{}", day),
                date: GameDate::new(2023, 11, day),
                season: "2023-2024".to_string(),
                home: team_box("BOS", 110.0),
                away: team_box("NYK", 101.0),
                home_won: Some(true),
                game_type: None,
                venue_guid: None,
            });
        }
        ContextData {
            games,
            player_lines: Vec::new(),
            teams: vec![Team {
                team_id: Some("2".to_string()),
                abbreviation: "BOS".to_string(),
                display_name: "Boston Celtics".to_string(),
                logo: None,
                colors: Vec::new(),
            }],
            venue_coords: HashMap::new(),
            game_venues: HashMap::new(),
        }
    }

    #[test]
    fn computes_requested_features_with_zero_fallback() {
        let ctx = SharedFeatureContext::new(
            vec![
                "points|season|avg|diff".to_string(),
                "elo|none|raw|diff".to_string(),
                "SeasonStartYear".to_string(),
                "pred_margin".to_string(),
            ],
            LeagueConfig::nba(),
            fixture(),
            None,
        )
        .unwrap();

        let row = ctx.calculate_features_for_row(
            "BOS",
            "NYK",
            "2023-2024",
            &GameDate::new(2023, 11, 9),
            Some("g9"),
            None,
            None,
        );
        assert_eq!(row.len(), 4);
        assert!((row["points|season|avg|diff"] - 9.0).abs() < 1e-9);
        assert!(row["elo|none|raw|diff"] > 0.0);
        assert_eq!(row["SeasonStartYear"], 2023.0);
        assert_eq!(row["pred_margin"], 0.0);
    }

    #[test]
    fn normalizes_display_names() {
        let ctx = SharedFeatureContext::new(
            vec!["points|season|avg|home".to_string()],
            LeagueConfig::nba(),
            fixture(),
            None,
        )
        .unwrap();
        let via_display = ctx.calculate_features_for_row(
            "Boston Celtics",
            "NYK",
            "2023-2024",
            &GameDate::new(2023, 11, 9),
            None,
            None,
            None,
        );
        assert!((via_display["points|season|avg|home"] - 110.0).abs() < 1e-9);
    }

    #[test]
    fn preload_seasons_bounds_the_corpus() {
        let ctx = SharedFeatureContext::new(
            vec!["points|season|avg|home".to_string()],
            LeagueConfig::nba(),
            fixture(),
            Some(vec!["2021-2022".to_string()]),
        )
        .unwrap();
        let row = ctx.calculate_features_for_row(
            "BOS",
            "NYK",
            "2023-2024",
            &GameDate::new(2023, 11, 9),
            None,
            None,
            None,
        );
        assert_eq!(row["points|season|avg|home"], 0.0);
    }
}
