//! Incrementally maintained Elo ratings
//!
//! Replays completed games in chronological order, updating both teams'
//! ratings with the standard logistic expected-score rule plus a home-court
//! adjustment. Lookups return the rating in effect immediately before the
//! requested date.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use courtside_types::{EloSettings, GameDate};

use crate::games::Game;

/// One persisted rating point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EloRecord {
    pub team: String,
    pub date: GameDate,
    pub season: String,
    pub elo: f64,
}

/// Per-team rating history keyed by date.
pub struct EloCache {
    settings: EloSettings,
    /// team -> chronological (date key, post-game rating)
    history: HashMap<String, Vec<(i64, f64)>>,
    records: Vec<EloRecord>,
}

impl EloCache {
    /// Replay a corpus of games. The input may be unsorted; only completed
    /// games update ratings.
    pub fn build(games: &[Arc<Game>], settings: EloSettings) -> Self {
        let mut ordered: Vec<&Arc<Game>> = games.iter().filter(|g| g.is_completed()).collect();
        ordered.sort_by_key(|g| (g.date.key(), g.game_id.clone()));

        let mut current: HashMap<String, f64> = HashMap::new();
        let mut history: HashMap<String, Vec<(i64, f64)>> = HashMap::new();
        let mut records = Vec::new();

        for game in ordered {
            let home = game.home.name.clone();
            let away = game.away.name.clone();
            let r_home = *current.get(&home).unwrap_or(&settings.cold_start);
            let r_away = *current.get(&away).unwrap_or(&settings.cold_start);

            let expected_home =
                1.0 / (1.0 + 10f64.powf(-((r_home + settings.home_advantage) - r_away) / 400.0));
            let home_score = if game.home_won_resolved() == Some(true) {
                1.0
            } else {
                0.0
            };

            let delta = settings.k_factor * (home_score - expected_home);
            let new_home = r_home + delta;
            let new_away = r_away - delta;

            current.insert(home.clone(), new_home);
            current.insert(away.clone(), new_away);
            let key = game.date.key();
            history.entry(home.clone()).or_default().push((key, new_home));
            history.entry(away.clone()).or_default().push((key, new_away));
            records.push(EloRecord {
                team: home,
                date: game.date,
                season: game.season.clone(),
                elo: new_home,
            });
            records.push(EloRecord {
                team: away,
                date: game.date,
                season: game.season.clone(),
                elo: new_away,
            });
        }

        Self {
            settings,
            history,
            records,
        }
    }

    /// Rating in effect immediately before `date`; the configured
    /// cold-start rating when the team has no prior games.
    pub fn rating_before(&self, team: &str, date: &GameDate) -> f64 {
        let cutoff = date.key();
        match self.history.get(team) {
            Some(points) => {
                let idx = points.partition_point(|(k, _)| *k < cutoff);
                if idx == 0 {
                    self.settings.cold_start
                } else {
                    points[idx - 1].1
                }
            }
            None => self.settings.cold_start,
        }
    }

    /// All rating points, for persistence into the Elo cache collection.
    pub fn records(&self) -> &[EloRecord] {
        &self.records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::games::TeamBox;

    fn game(id: &str, date: GameDate, home: &str, away: &str, hp: f64, ap: f64) -> Arc<Game> {
        Arc::new(Game {
            game_id: id.to_string(),
            date,
            season: "2023-2024".to_string(),
            home: TeamBox {
                name: home.to_string(),
                points: hp,
                ..TeamBox::default()
            },
            away: TeamBox {
                name: away.to_string(),
                points: ap,
                ..TeamBox::default()
            },
            home_won: Some(hp > ap),
            game_type: None,
            venue_guid: None,
        })
    }

    #[test]
    fn cold_start_before_any_games() {
        let cache = EloCache::build(&[], EloSettings::default());
        assert_eq!(cache.rating_before("BOS", &GameDate::new(2023, 10, 25)), 1500.0);
    }

    #[test]
    fn winner_gains_loser_loses() {
        let games = vec![game("g1", GameDate::new(2023, 10, 25), "BOS", "NYK", 110.0, 100.0)];
        let cache = EloCache::build(&games, EloSettings::default());
        let after = GameDate::new(2023, 10, 26);
        assert!(cache.rating_before("BOS", &after) > 1500.0);
        assert!(cache.rating_before("NYK", &after) < 1500.0);
        // Zero-sum update.
        let total = cache.rating_before("BOS", &after) + cache.rating_before("NYK", &after);
        assert!((total - 3000.0).abs() < 1e-9);
    }

    #[test]
    fn lookup_is_strictly_before_date() {
        let games = vec![game("g1", GameDate::new(2023, 10, 25), "BOS", "NYK", 110.0, 100.0)];
        let cache = EloCache::build(&games, EloSettings::default());
        // On the game date itself the pre-game rating applies.
        assert_eq!(cache.rating_before("BOS", &GameDate::new(2023, 10, 25)), 1500.0);
    }

    #[test]
    fn home_favorite_gains_less_for_winning() {
        let settings = EloSettings::default();
        let games = vec![
            game("g1", GameDate::new(2023, 10, 25), "BOS", "NYK", 110.0, 100.0),
            game("g2", GameDate::new(2023, 10, 27), "NYK", "BOS", 100.0, 90.0),
        ];
        let cache = EloCache::build(&games, settings.clone());
        // Home win expectation exceeds 0.5 with equal ratings, so the home
        // winner gains less than half the K-factor.
        let gain = cache.rating_before("BOS", &GameDate::new(2023, 10, 26)) - settings.cold_start;
        assert!(gain > 0.0 && gain < settings.k_factor / 2.0);
    }
}
