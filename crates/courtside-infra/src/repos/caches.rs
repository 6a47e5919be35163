//! Elo-rating and league-stats cache repositories

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use courtside_core::elo::EloRecord;
use courtside_types::{GameDate, LeagueConfig, Result};

use crate::store::DocumentStore;

/// Persisted per-(team, date, season) Elo ratings.
#[derive(Clone)]
pub struct EloRatingRepository {
    store: Arc<DocumentStore>,
    collection: String,
}

impl EloRatingRepository {
    pub fn new(store: Arc<DocumentStore>, cfg: &LeagueConfig) -> Self {
        Self {
            store,
            collection: cfg.collection("cached_elo_ratings"),
        }
    }

    fn doc_id(record: &EloRecord) -> String {
        format!("{}:{}", record.team, record.date.iso())
    }

    pub async fn persist(&self, records: &[EloRecord]) -> Result<usize> {
        for record in records {
            self.store
                .put_doc(&self.collection, &Self::doc_id(record), record)
                .await?;
        }
        Ok(records.len())
    }

    pub async fn get(&self, team: &str, date: &GameDate) -> Result<Option<EloRecord>> {
        self.store
            .get_doc(&self.collection, &format!("{}:{}", team, date.iso()))
            .await
    }
}

/// League-season constants (factor, VOP, DRB%, pace) cached per season.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeagueStatsDoc {
    pub season: String,
    pub factor: f64,
    pub vop: f64,
    pub drbp: f64,
    pub pace: f64,
    pub avg_uper: f64,
}

#[derive(Clone)]
pub struct LeagueStatsRepository {
    store: Arc<DocumentStore>,
    collection: String,
}

impl LeagueStatsRepository {
    pub fn new(store: Arc<DocumentStore>, cfg: &LeagueConfig) -> Self {
        Self {
            store,
            collection: cfg.collection("cached_league_stats"),
        }
    }

    pub async fn upsert(&self, doc: &LeagueStatsDoc) -> Result<()> {
        self.store.put_doc(&self.collection, &doc.season, doc).await
    }

    pub async fn get(&self, season: &str) -> Result<Option<LeagueStatsDoc>> {
        self.store.get_doc(&self.collection, season).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn elo_records_round_trip() {
        let store = Arc::new(DocumentStore::in_memory().await.unwrap());
        let repo = EloRatingRepository::new(store, &LeagueConfig::nba());
        let records = vec![EloRecord {
            team: "BOS".to_string(),
            date: GameDate::new(2024, 1, 5),
            season: "2023-2024".to_string(),
            elo: 1523.4,
        }];
        assert_eq!(repo.persist(&records).await.unwrap(), 1);
        let loaded = repo
            .get("BOS", &GameDate::new(2024, 1, 5))
            .await
            .unwrap()
            .unwrap();
        assert!((loaded.elo - 1523.4).abs() < 1e-9);
    }

    #[tokio::test]
    async fn league_stats_round_trip() {
        let store = Arc::new(DocumentStore::in_memory().await.unwrap());
        let repo = LeagueStatsRepository::new(store, &LeagueConfig::nba());
        repo.upsert(&LeagueStatsDoc {
            season: "2023-2024".to_string(),
            factor: 0.66,
            vop: 1.08,
            drbp: 0.76,
            pace: 99.2,
            avg_uper: 0.27,
        })
        .await
        .unwrap();
        assert!(repo.get("2023-2024").await.unwrap().is_some());
        assert!(repo.get("1999-2000").await.unwrap().is_none());
    }
}
