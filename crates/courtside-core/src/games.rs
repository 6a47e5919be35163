//! Game, player, and roster domain types plus the in-memory game index
//! used by the feature pipeline.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use courtside_types::{GameDate, LeagueConfig};

/// One team's side of a game document: identifiers plus box-score totals.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TeamBox {
    pub name: String,
    #[serde(default)]
    pub team_id: Option<String>,
    pub points: f64,
    #[serde(default)]
    pub fg_made: f64,
    #[serde(default)]
    pub fg_att: f64,
    #[serde(default)]
    pub three_made: f64,
    #[serde(default)]
    pub three_att: f64,
    #[serde(default)]
    pub ft_made: f64,
    #[serde(default)]
    pub ft_att: f64,
    #[serde(default)]
    pub off_reb: f64,
    #[serde(default)]
    pub def_reb: f64,
    #[serde(default)]
    pub rebounds: f64,
    #[serde(default)]
    pub assists: f64,
    #[serde(default)]
    pub turnovers: f64,
    #[serde(default)]
    pub steals: f64,
    #[serde(default)]
    pub blocks: f64,
    #[serde(default)]
    pub fouls: f64,
    /// Player ids reported out for this game (training-time injury source).
    #[serde(default)]
    pub injured_players: Vec<String>,
}

impl TeamBox {
    /// Estimated possessions for this side.
    pub fn possessions(&self) -> f64 {
        self.fg_att - self.off_reb + self.turnovers + 0.44 * self.ft_att
    }
}

/// A single game document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Game {
    pub game_id: String,
    pub date: GameDate,
    pub season: String,
    pub home: TeamBox,
    pub away: TeamBox,
    #[serde(default)]
    pub home_won: Option<bool>,
    #[serde(default)]
    pub game_type: Option<String>,
    #[serde(default)]
    pub venue_guid: Option<String>,
}

impl Game {
    /// Completed iff both sides scored.
    pub fn is_completed(&self) -> bool {
        self.home.points > 0.0 && self.away.points > 0.0
    }

    /// Whether the home side won; falls back to the point totals when the
    /// explicit flag is absent.
    pub fn home_won_resolved(&self) -> Option<bool> {
        match self.home_won {
            Some(v) => Some(v),
            None if self.is_completed() => Some(self.home.points > self.away.points),
            None => None,
        }
    }

    /// The box for `team`, or None if the team did not play in this game.
    pub fn box_for(&self, team: &str) -> Option<&TeamBox> {
        if self.home.name == team {
            Some(&self.home)
        } else if self.away.name == team {
            Some(&self.away)
        } else {
            None
        }
    }

    /// The opposing box for `team`.
    pub fn opponent_box_for(&self, team: &str) -> Option<&TeamBox> {
        if self.home.name == team {
            Some(&self.away)
        } else if self.away.name == team {
            Some(&self.home)
        } else {
            None
        }
    }

    pub fn is_home(&self, team: &str) -> bool {
        self.home.name == team
    }
}

/// One player's box-score line for one game.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlayerGameLine {
    pub player_id: String,
    pub game_id: String,
    pub team: String,
    #[serde(default)]
    pub opponent: String,
    pub date: GameDate,
    pub season: String,
    pub minutes: f64,
    pub points: f64,
    #[serde(default)]
    pub rebounds: f64,
    #[serde(default)]
    pub off_reb: f64,
    #[serde(default)]
    pub assists: f64,
    #[serde(default)]
    pub turnovers: f64,
    #[serde(default)]
    pub steals: f64,
    #[serde(default)]
    pub blocks: f64,
    #[serde(default)]
    pub fouls: f64,
    #[serde(default)]
    pub fg_made: f64,
    #[serde(default)]
    pub fg_att: f64,
    #[serde(default)]
    pub three_made: f64,
    #[serde(default)]
    pub three_att: f64,
    #[serde(default)]
    pub ft_made: f64,
    #[serde(default)]
    pub ft_att: f64,
    #[serde(default)]
    pub plus_minus: f64,
    #[serde(default)]
    pub starter: bool,
    #[serde(default)]
    pub did_not_play: bool,
}

impl PlayerGameLine {
    /// Only entries with minutes count as played.
    pub fn played(&self) -> bool {
        self.minutes > 0.0 && !self.did_not_play
    }
}

/// One entry on a team-season roster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RosterEntry {
    pub player_id: String,
    #[serde(default)]
    pub starter: bool,
    #[serde(default)]
    pub injured: bool,
}

/// Prediction-time source of truth for who plays.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Roster {
    pub team: String,
    pub season: String,
    pub entries: Vec<RosterEntry>,
}

impl Roster {
    pub fn injured_player_ids(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.injured)
            .map(|e| e.player_id.clone())
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Player {
    pub player_id: String,
    pub name: String,
    #[serde(default)]
    pub team: Option<String>,
    #[serde(default)]
    pub headshot: Option<String>,
    #[serde(default)]
    pub positions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    #[serde(default)]
    pub team_id: Option<String>,
    pub abbreviation: String,
    pub display_name: String,
    #[serde(default)]
    pub logo: Option<String>,
    #[serde(default)]
    pub colors: Vec<String>,
}

/// Read-only indices over a preloaded game corpus.
///
/// Two views: a per-(season, team) date-sorted list for window queries and a
/// season → date → home-team lookup for locating a specific game document.
pub struct GameIndex {
    games: Vec<Arc<Game>>,
    by_team: HashMap<(String, String), Vec<Arc<Game>>>,
    by_home: HashMap<String, HashMap<i64, HashMap<String, Arc<Game>>>>,
}

impl GameIndex {
    /// Build indices from a game corpus. Excluded game types and
    /// uncompleted games are filtered out here so every window query sees
    /// only trainable games.
    pub fn build(games: Vec<Game>, cfg: &LeagueConfig) -> Self {
        let mut kept: Vec<Arc<Game>> = games
            .into_iter()
            .filter(|g| g.is_completed() && !cfg.is_excluded_game_type(g.game_type.as_deref()))
            .map(Arc::new)
            .collect();
        kept.sort_by_key(|g| (g.date.key(), g.game_id.clone()));

        let mut by_team: HashMap<(String, String), Vec<Arc<Game>>> = HashMap::new();
        let mut by_home: HashMap<String, HashMap<i64, HashMap<String, Arc<Game>>>> = HashMap::new();
        for game in &kept {
            by_team
                .entry((game.season.clone(), game.home.name.clone()))
                .or_default()
                .push(Arc::clone(game));
            by_team
                .entry((game.season.clone(), game.away.name.clone()))
                .or_default()
                .push(Arc::clone(game));
            by_home
                .entry(game.season.clone())
                .or_default()
                .entry(game.date.key())
                .or_default()
                .insert(game.home.name.clone(), Arc::clone(game));
        }

        Self {
            games: kept,
            by_team,
            by_home,
        }
    }

    /// All indexed games in chronological order.
    pub fn all_games(&self) -> &[Arc<Game>] {
        &self.games
    }

    pub fn seasons(&self) -> Vec<String> {
        let mut out: Vec<String> = self.by_home.keys().cloned().collect();
        out.sort();
        out
    }

    /// A team's season games strictly before `date`, chronological.
    pub fn team_games_before(&self, team: &str, season: &str, date: &GameDate) -> &[Arc<Game>] {
        match self.by_team.get(&(season.to_string(), team.to_string())) {
            Some(games) => {
                let cutoff = date.key();
                let end = games.partition_point(|g| g.date.key() < cutoff);
                &games[..end]
            }
            None => &[],
        }
    }

    /// Locate the game a given home team played on a given date.
    pub fn find_game(&self, season: &str, date: &GameDate, home: &str) -> Option<&Arc<Game>> {
        self.by_home
            .get(season)?
            .get(&date.key())?
            .get(home)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn game(id: &str, season: &str, date: GameDate, home: &str, away: &str, hp: f64, ap: f64) -> Game {
        Game {
            game_id: id.to_string(),
            date,
            season: season.to_string(),
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
        }
    }

    #[test]
    fn index_filters_incomplete_and_excluded_games() {
        let cfg = LeagueConfig::nba();
        let mut pre = game("g0", "2023-2024", GameDate::new(2023, 10, 1), "BOS", "NYK", 100.0, 90.0);
        pre.game_type = Some("preseason".to_string());
        let unfinished = game("g1", "2023-2024", GameDate::new(2023, 10, 25), "BOS", "NYK", 0.0, 0.0);
        let real = game("g2", "2023-2024", GameDate::new(2023, 10, 26), "BOS", "NYK", 112.0, 105.0);
        let index = GameIndex::build(vec![pre, unfinished, real], &cfg);
        assert_eq!(index.all_games().len(), 1);
        assert_eq!(index.all_games()[0].game_id, "g2");
    }

    #[test]
    fn team_games_before_is_strict() {
        let cfg = LeagueConfig::nba();
        let g1 = game("g1", "2023-2024", GameDate::new(2023, 10, 25), "BOS", "NYK", 100.0, 95.0);
        let g2 = game("g2", "2023-2024", GameDate::new(2023, 10, 27), "MIA", "BOS", 99.0, 101.0);
        let g3 = game("g3", "2023-2024", GameDate::new(2023, 10, 29), "BOS", "PHI", 120.0, 110.0);
        let index = GameIndex::build(vec![g1, g2, g3], &cfg);

        let before = index.team_games_before("BOS", "2023-2024", &GameDate::new(2023, 10, 29));
        assert_eq!(before.len(), 2);
        assert!(before.iter().all(|g| g.date < GameDate::new(2023, 10, 29)));
    }

    #[test]
    fn find_game_by_home_side() {
        let cfg = LeagueConfig::nba();
        let g = game("g1", "2023-2024", GameDate::new(2023, 11, 2), "DEN", "LAL", 119.0, 107.0);
        let index = GameIndex::build(vec![g], &cfg);
        assert!(index
            .find_game("2023-2024", &GameDate::new(2023, 11, 2), "DEN")
            .is_some());
        assert!(index
            .find_game("2023-2024", &GameDate::new(2023, 11, 2), "LAL")
            .is_none());
    }
}
