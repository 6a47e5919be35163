//! Shared-context loader
//!
//! Assembles a `SharedFeatureContext` from the document store: games,
//! player lines (only when a requested feature needs them), teams, and
//! venue coordinates. This is the single place a context touches I/O;
//! everything downstream is pure.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use courtside_core::context::{ContextData, SharedFeatureContext};
use courtside_types::{LeagueConfig, Result};

use crate::repos::{GameRepository, PlayerStatRepository, TeamRepository};
use crate::store::DocumentStore;

/// Venue coordinates, persisted by the upstream sync path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueDoc {
    pub venue_guid: String,
    pub lat: f64,
    pub lon: f64,
}

/// Loads and pins everything a feature context needs.
pub struct ContextLoader {
    store: Arc<DocumentStore>,
    cfg: LeagueConfig,
}

impl ContextLoader {
    pub fn new(store: Arc<DocumentStore>, cfg: LeagueConfig) -> Self {
        Self { store, cfg }
    }

    fn needs_player_data(feature_names: &[String]) -> bool {
        feature_names.iter().any(|f| {
            f.starts_with("player_")
                || f.starts_with("per_available")
                || f.starts_with("inj_")
                || f.split('|')
                    .next()
                    .map(|s| s.to_lowercase().ends_with("_per"))
                    .unwrap_or(false)
        })
    }

    pub async fn load(
        &self,
        feature_names: Vec<String>,
        preload_seasons: Option<Vec<String>>,
    ) -> Result<SharedFeatureContext> {
        let games_repo = GameRepository::new(Arc::clone(&self.store), &self.cfg);
        let teams_repo = TeamRepository::new(Arc::clone(&self.store), &self.cfg);

        tracing::info!(
            league = %self.cfg.league_id,
            features = feature_names.len(),
            seasons = ?preload_seasons,
            "initializing shared feature context"
        );

        let games = games_repo.list_all().await?;
        tracing::info!(count = games.len(), "loaded game corpus");

        let player_lines = if Self::needs_player_data(&feature_names) {
            let lines = PlayerStatRepository::new(Arc::clone(&self.store), &self.cfg)
                .list_all()
                .await?;
            tracing::info!(count = lines.len(), "loaded player lines for PER features");
            lines
        } else {
            Vec::new()
        };

        let teams = teams_repo.list_all().await?;

        let mut venue_coords = HashMap::new();
        let venues: Vec<VenueDoc> = self
            .store
            .list_docs(&self.cfg.collection("venues"))
            .await
            .unwrap_or_default();
        for venue in venues {
            venue_coords.insert(venue.venue_guid.clone(), (venue.lat, venue.lon));
        }

        let game_venues = games
            .iter()
            .filter_map(|g| {
                g.venue_guid
                    .as_ref()
                    .map(|v| (g.game_id.clone(), v.clone()))
            })
            .collect();

        let ctx = SharedFeatureContext::new(
            feature_names,
            self.cfg.clone(),
            ContextData {
                games,
                player_lines,
                teams,
                venue_coords,
                game_venues,
            },
            preload_seasons,
        )?;

        // Refresh the cached league-season constants (best-effort).
        if let Some(per) = ctx.per_calculator() {
            let repo = crate::repos::LeagueStatsRepository::new(Arc::clone(&self.store), &self.cfg);
            for season in per.seasons() {
                if let Some(stats) = per.league_stats(&season) {
                    let doc = crate::repos::LeagueStatsDoc {
                        season: season.clone(),
                        factor: stats.factor,
                        vop: stats.vop,
                        drbp: stats.drbp,
                        pace: stats.pace,
                        avg_uper: stats.avg_uper,
                    };
                    if let Err(e) = repo.upsert(&doc).await {
                        tracing::warn!(%season, error = %e, "league stats cache write failed");
                    }
                }
            }
        }

        Ok(ctx)
    }
}
