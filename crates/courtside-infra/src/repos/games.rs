//! Game, player-stat, roster, and team repositories

use std::sync::Arc;

use courtside_core::games::{Game, Player, PlayerGameLine, Roster, Team};
use courtside_types::{CourtsideError, GameDate, LeagueConfig, Result};

use crate::store::DocumentStore;

/// Games collection access.
#[derive(Clone)]
pub struct GameRepository {
    store: Arc<DocumentStore>,
    collection: String,
    cfg: LeagueConfig,
}

impl GameRepository {
    pub fn new(store: Arc<DocumentStore>, cfg: &LeagueConfig) -> Self {
        Self {
            store,
            collection: cfg.collection("games"),
            cfg: cfg.clone(),
        }
    }

    pub async fn upsert(&self, game: &Game) -> Result<()> {
        self.store
            .put_doc(&self.collection, &game.game_id, game)
            .await
    }

    pub async fn get(&self, game_id: &str) -> Result<Option<Game>> {
        self.store.get_doc(&self.collection, game_id).await
    }

    pub async fn require(&self, game_id: &str) -> Result<Game> {
        self.get(game_id)
            .await?
            .ok_or_else(|| CourtsideError::NotFound(format!("game {}", game_id)))
    }

    pub async fn list_all(&self) -> Result<Vec<Game>> {
        self.store.list_docs(&self.collection).await
    }

    /// The default training corpus: completed games with excluded game
    /// types removed, chronological.
    pub async fn list_completed(&self) -> Result<Vec<Game>> {
        let mut games: Vec<Game> = self
            .list_all()
            .await?
            .into_iter()
            .filter(|g| g.is_completed() && !self.cfg.is_excluded_game_type(g.game_type.as_deref()))
            .collect();
        games.sort_by_key(|g| (g.date.key(), g.game_id.clone()));
        Ok(games)
    }

    /// Completed games with `start < date <= end`.
    pub async fn list_between(
        &self,
        start_exclusive: &GameDate,
        end_inclusive: &GameDate,
    ) -> Result<Vec<Game>> {
        Ok(self
            .list_completed()
            .await?
            .into_iter()
            .filter(|g| g.date.key() > start_exclusive.key() && g.date.key() <= end_inclusive.key())
            .collect())
    }

    pub async fn mark_injured_players(
        &self,
        game_id: &str,
        home_injured: Vec<String>,
        away_injured: Vec<String>,
    ) -> Result<()> {
        let mut game = self.require(game_id).await?;
        game.home.injured_players = home_injured;
        game.away.injured_players = away_injured;
        self.upsert(&game).await
    }
}

/// Player box-score lines.
#[derive(Clone)]
pub struct PlayerStatRepository {
    store: Arc<DocumentStore>,
    collection: String,
}

impl PlayerStatRepository {
    pub fn new(store: Arc<DocumentStore>, cfg: &LeagueConfig) -> Self {
        Self {
            store,
            collection: cfg.collection("player_stats"),
        }
    }

    fn doc_id(line: &PlayerGameLine) -> String {
        format!("{}:{}", line.player_id, line.game_id)
    }

    pub async fn upsert(&self, line: &PlayerGameLine) -> Result<()> {
        self.store
            .put_doc(&self.collection, &Self::doc_id(line), line)
            .await
    }

    pub async fn list_all(&self) -> Result<Vec<PlayerGameLine>> {
        self.store.list_docs(&self.collection).await
    }

    pub async fn list_for_player(&self, player_id: &str) -> Result<Vec<PlayerGameLine>> {
        let mut lines: Vec<PlayerGameLine> = self
            .list_all()
            .await?
            .into_iter()
            .filter(|l| l.player_id == player_id)
            .collect();
        lines.sort_by_key(|l| l.date.key());
        Ok(lines)
    }
}

/// Team-season rosters: the prediction-time source of truth for who plays.
#[derive(Clone)]
pub struct RosterRepository {
    store: Arc<DocumentStore>,
    collection: String,
}

impl RosterRepository {
    pub fn new(store: Arc<DocumentStore>, cfg: &LeagueConfig) -> Self {
        Self {
            store,
            collection: cfg.collection("rosters"),
        }
    }

    fn doc_id(team: &str, season: &str) -> String {
        format!("{}:{}", team, season)
    }

    pub async fn upsert(&self, roster: &Roster) -> Result<()> {
        self.store
            .put_doc(
                &self.collection,
                &Self::doc_id(&roster.team, &roster.season),
                roster,
            )
            .await
    }

    pub async fn get(&self, team: &str, season: &str) -> Result<Option<Roster>> {
        self.store
            .get_doc(&self.collection, &Self::doc_id(team, season))
            .await
    }

    pub async fn list_by_season(&self, season: &str) -> Result<Vec<Roster>> {
        Ok(self
            .store
            .list_docs::<Roster>(&self.collection)
            .await?
            .into_iter()
            .filter(|r| r.season == season)
            .collect())
    }

    /// Move one player to a bucket (`injured` / `bench` / `starter`) on the
    /// roster containing them. Mutates the roster doc platform-wide.
    pub async fn set_player_bucket(
        &self,
        season: &str,
        player_id: &str,
        bucket: &str,
    ) -> Result<Roster> {
        let (starter, injured) = match bucket {
            "starter" => (true, false),
            "bench" => (false, false),
            "injured" => (false, true),
            other => {
                return Err(CourtsideError::Tool(format!(
                    "invalid bucket {:?} (expected injured | bench | starter)",
                    other
                )))
            }
        };
        for mut roster in self.list_by_season(season).await? {
            if let Some(entry) = roster.entries.iter_mut().find(|e| e.player_id == player_id) {
                entry.starter = starter;
                entry.injured = injured;
                self.upsert(&roster).await?;
                return Ok(roster);
            }
        }
        Err(CourtsideError::NotFound(format!(
            "player {} on any {} roster",
            player_id, season
        )))
    }

    /// Sync a computed lineup back into the roster flags atomically (one
    /// document write per team).
    pub async fn sync_lineup(
        &self,
        team: &str,
        season: &str,
        starters: &[String],
        inactive: &[String],
    ) -> Result<()> {
        let mut roster = self.get(team, season).await?.unwrap_or(Roster {
            team: team.to_string(),
            season: season.to_string(),
            entries: Vec::new(),
        });
        for entry in &mut roster.entries {
            entry.starter = starters.iter().any(|p| *p == entry.player_id);
            entry.injured = inactive.iter().any(|p| *p == entry.player_id);
        }
        // Players seen in the lineup but absent from the roster are added.
        for player_id in starters.iter().chain(inactive.iter()) {
            if !roster.entries.iter().any(|e| e.player_id == *player_id) {
                roster.entries.push(courtside_core::games::RosterEntry {
                    player_id: player_id.clone(),
                    starter: starters.iter().any(|p| p == player_id),
                    injured: inactive.iter().any(|p| p == player_id),
                });
            }
        }
        self.upsert(&roster).await
    }
}

/// Teams collection access plus id-to-key resolution for tools.
#[derive(Clone)]
pub struct TeamRepository {
    store: Arc<DocumentStore>,
    collection: String,
    primary_identifier: String,
}

impl TeamRepository {
    pub fn new(store: Arc<DocumentStore>, cfg: &LeagueConfig) -> Self {
        Self {
            store,
            collection: cfg.collection("teams"),
            primary_identifier: cfg.team_primary_identifier.clone(),
        }
    }

    pub async fn upsert(&self, team: &Team) -> Result<()> {
        let id = match self.primary_identifier.as_str() {
            "team_id" => team
                .team_id
                .clone()
                .unwrap_or_else(|| team.abbreviation.clone()),
            _ => team.abbreviation.clone(),
        };
        self.store.put_doc(&self.collection, &id, team).await
    }

    pub async fn list_all(&self) -> Result<Vec<Team>> {
        self.store.list_docs(&self.collection).await
    }

    pub async fn find(&self, key: &str) -> Result<Option<Team>> {
        Ok(self.list_all().await?.into_iter().find(|t| {
            t.abbreviation == key
                || t.display_name == key
                || t.team_id.as_deref() == Some(key)
        }))
    }

    /// The identifiers a team may appear under in game documents. Some
    /// corpora store abbreviations, others display names; querying with
    /// both avoids silently missing games.
    pub async fn team_keys(&self, team_id: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        if let Some(team) = self.find(team_id).await? {
            for candidate in [Some(team.abbreviation), Some(team.display_name), team.team_id] {
                if let Some(value) = candidate {
                    if !value.is_empty() && !keys.contains(&value) {
                        keys.push(value);
                    }
                }
            }
        }
        let raw = team_id.to_string();
        if !keys.contains(&raw) {
            keys.push(raw);
        }
        Ok(keys)
    }
}

/// Players collection access.
#[derive(Clone)]
pub struct PlayerRepository {
    store: Arc<DocumentStore>,
    collection: String,
}

impl PlayerRepository {
    pub fn new(store: Arc<DocumentStore>, cfg: &LeagueConfig) -> Self {
        Self {
            store,
            collection: cfg.collection("players"),
        }
    }

    pub async fn upsert(&self, player: &Player) -> Result<()> {
        self.store
            .put_doc(&self.collection, &player.player_id, player)
            .await
    }

    pub async fn get(&self, player_id: &str) -> Result<Option<Player>> {
        self.store.get_doc(&self.collection, player_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courtside_core::games::{RosterEntry, TeamBox};

    fn game(id: &str, date: GameDate, home: &str, away: &str, hp: f64, ap: f64) -> Game {
        Game {
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
        }
    }

    #[tokio::test]
    async fn completed_filter_and_date_window() {
        let store = Arc::new(DocumentStore::in_memory().await.unwrap());
        let cfg = LeagueConfig::nba();
        let repo = GameRepository::new(store, &cfg);
        repo.upsert(&game("g1", GameDate::new(2023, 11, 1), "BOS", "NYK", 100.0, 90.0))
            .await
            .unwrap();
        repo.upsert(&game("g2", GameDate::new(2023, 11, 3), "BOS", "NYK", 0.0, 0.0))
            .await
            .unwrap();
        let mut pre = game("g3", GameDate::new(2023, 11, 5), "BOS", "NYK", 99.0, 98.0);
        pre.game_type = Some("preseason".to_string());
        repo.upsert(&pre).await.unwrap();
        repo.upsert(&game("g4", GameDate::new(2023, 11, 7), "BOS", "NYK", 105.0, 104.0))
            .await
            .unwrap();

        assert_eq!(repo.list_completed().await.unwrap().len(), 2);
        let window = repo
            .list_between(&GameDate::new(2023, 11, 1), &GameDate::new(2023, 11, 7))
            .await
            .unwrap();
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].game_id, "g4");
    }

    #[tokio::test]
    async fn roster_bucket_moves() {
        let store = Arc::new(DocumentStore::in_memory().await.unwrap());
        let cfg = LeagueConfig::nba();
        let repo = RosterRepository::new(store, &cfg);
        repo.upsert(&Roster {
            team: "BOS".to_string(),
            season: "2023-2024".to_string(),
            entries: vec![RosterEntry {
                player_id: "p1".to_string(),
                starter: true,
                injured: false,
            }],
        })
        .await
        .unwrap();

        let updated = repo
            .set_player_bucket("2023-2024", "p1", "injured")
            .await
            .unwrap();
        assert!(updated.entries[0].injured);
        assert!(!updated.entries[0].starter);
        assert!(repo
            .set_player_bucket("2023-2024", "p1", "courtside")
            .await
            .is_err());
        assert!(repo
            .set_player_bucket("2023-2024", "ghost", "bench")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn team_keys_resolution() {
        let store = Arc::new(DocumentStore::in_memory().await.unwrap());
        let cfg = LeagueConfig::nba();
        let repo = TeamRepository::new(store, &cfg);
        repo.upsert(&Team {
            team_id: Some("2".to_string()),
            abbreviation: "BOS".to_string(),
            display_name: "Boston Celtics".to_string(),
            logo: None,
            colors: Vec::new(),
        })
        .await
        .unwrap();
        let keys = repo.team_keys("2").await.unwrap();
        assert!(keys.contains(&"BOS".to_string()));
        assert!(keys.contains(&"Boston Celtics".to_string()));
        assert!(keys.contains(&"2".to_string()));
    }
}
