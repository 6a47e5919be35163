//! League configuration
//!
//! Every repository and every feature context receives a `LeagueConfig`
//! explicitly; there are no module-level collection names or hidden
//! singletons. The config resolves logical collection names, season rules,
//! upstream endpoint templates, and league constants.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Logical collection keys understood by [`LeagueConfig::collection`].
const COLLECTION_DEFAULTS: &[(&str, &str)] = &[
    ("games", "games_nba"),
    ("player_stats", "player_stats_nba"),
    ("players", "players_nba"),
    ("rosters", "rosters_nba"),
    ("teams", "teams_nba"),
    ("model_config", "model_config_nba"),
    ("model_config_points", "model_config_points_nba"),
    ("experiment_runs", "experiment_runs_nba"),
    ("master_training_metadata", "master_training_metadata_nba"),
    ("cached_league_stats", "cached_league_stats_nba"),
    ("cached_elo_ratings", "cached_elo_ratings_nba"),
    ("point_prediction_cache", "point_prediction_cache_nba"),
    ("model_predictions", "model_predictions_nba"),
    ("prediction_scenarios", "prediction_scenarios_nba"),
    ("cached_news", "cached_news_nba"),
    ("matchup_shared_context", "matchup_shared_context_nba"),
    ("tool_cache", "tool_cache_nba"),
];

/// Elo update constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EloSettings {
    /// K-factor applied to each rating update
    pub k_factor: f64,
    /// Rating points added to the home side's expectation
    pub home_advantage: f64,
    /// Rating for a team with no prior games
    pub cold_start: f64,
}

impl Default for EloSettings {
    fn default() -> Self {
        Self {
            k_factor: 20.0,
            home_advantage: 100.0,
            cold_start: 1500.0,
        }
    }
}

/// Upstream sports-data endpoint templates. Placeholders: `{date}`
/// (YYYYMMDD), `{game_id}`, `{team_id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EspnEndpoints {
    pub scoreboard_url: String,
    pub summary_url: String,
    pub venue_url: String,
}

impl Default for EspnEndpoints {
    fn default() -> Self {
        Self {
            scoreboard_url:
                "https://site.api.espn.com/apis/site/v2/sports/basketball/nba/scoreboard?dates={date}"
                    .to_string(),
            summary_url:
                "https://site.api.espn.com/apis/site/v2/sports/basketball/nba/summary?event={game_id}"
                    .to_string(),
            venue_url: "https://site.api.espn.com/apis/site/v2/sports/basketball/nba/venues/{venue_id}"
                .to_string(),
        }
    }
}

/// League-specific configuration resolved once at boot and passed into
/// every component that touches league data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeagueConfig {
    pub league_id: String,

    /// Overrides for logical collection names; anything absent falls back
    /// to the built-in defaults with the league id substituted.
    pub collections: HashMap<String, String>,

    /// Calendar month separating consecutive seasons. Games in or after
    /// this month belong to the season starting that calendar year.
    pub season_cutover_month: u32,
    pub season_start: (u32, u32),
    pub season_end: (u32, u32),

    /// Game types omitted from training and records.
    pub exclude_game_types: Vec<String>,

    /// Which field on a team doc identifies it across collections
    /// ("abbreviation" or "team_id").
    pub team_primary_identifier: String,

    pub espn: EspnEndpoints,
    pub elo: EloSettings,
}

impl LeagueConfig {
    /// Default NBA configuration.
    pub fn nba() -> Self {
        Self {
            league_id: "nba".to_string(),
            collections: HashMap::new(),
            season_cutover_month: 10,
            season_start: (10, 1),
            season_end: (6, 30),
            exclude_game_types: vec!["preseason".to_string(), "allstar".to_string()],
            team_primary_identifier: "abbreviation".to_string(),
            espn: EspnEndpoints::default(),
            elo: EloSettings::default(),
        }
    }

    /// Resolve a logical collection name.
    pub fn collection(&self, key: &str) -> String {
        if let Some(name) = self.collections.get(key) {
            return name.clone();
        }
        for (k, default) in COLLECTION_DEFAULTS {
            if *k == key {
                // Defaults are written for the NBA league id; other leagues
                // swap the suffix.
                if self.league_id == "nba" {
                    return (*default).to_string();
                }
                return default.replace("_nba", &format!("_{}", self.league_id));
            }
        }
        format!("{}_{}", key, self.league_id)
    }

    /// Season string for a game date, e.g. `"2023-2024"`.
    pub fn season_for(&self, year: i32, month: u32) -> String {
        let start = self.season_start_year(year, month);
        format!("{}-{}", start, start + 1)
    }

    /// Calendar year a game's season started in. Months at or past the
    /// cutover belong to that year's season; earlier months to the prior
    /// year's.
    pub fn season_start_year(&self, year: i32, month: u32) -> i32 {
        if month >= self.season_cutover_month {
            year
        } else {
            year - 1
        }
    }

    /// Whether a game type is excluded from training and records.
    pub fn is_excluded_game_type(&self, game_type: Option<&str>) -> bool {
        match game_type {
            Some(t) => self.exclude_game_types.iter().any(|e| e == t),
            None => false,
        }
    }
}

impl Default for LeagueConfig {
    fn default() -> Self {
        Self::nba()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_resolution_prefers_overrides() {
        let mut cfg = LeagueConfig::nba();
        cfg.collections
            .insert("games".to_string(), "stats_custom".to_string());
        assert_eq!(cfg.collection("games"), "stats_custom");
        assert_eq!(cfg.collection("teams"), "teams_nba");
    }

    #[test]
    fn season_cutover_splits_calendar_years() {
        let cfg = LeagueConfig::nba();
        assert_eq!(cfg.season_for(2023, 10), "2023-2024");
        assert_eq!(cfg.season_for(2024, 2), "2023-2024");
        assert_eq!(cfg.season_start_year(2024, 10), 2024);
        assert_eq!(cfg.season_start_year(2024, 6), 2023);
    }

    #[test]
    fn excluded_game_types() {
        let cfg = LeagueConfig::nba();
        assert!(cfg.is_excluded_game_type(Some("preseason")));
        assert!(!cfg.is_excluded_game_type(Some("playoff")));
        assert!(!cfg.is_excluded_game_type(None));
    }
}
