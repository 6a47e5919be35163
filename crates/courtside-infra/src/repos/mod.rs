//! Typed repositories over the document store
//!
//! Each repository binds the store to one logical collection resolved
//! through the league config.

pub mod caches;
pub mod games;
pub mod matchup;
pub mod models;
pub mod predictions;

pub use caches::{EloRatingRepository, LeagueStatsDoc, LeagueStatsRepository};
pub use games::{GameRepository, PlayerStatRepository, RosterRepository, TeamRepository};
pub use matchup::{HistoryEntry, NewsCacheRepository, SharedContextRepository, ToolCacheRepository};
pub use models::{ConfigRepository, ModelConfigDoc, RunDoc, RunRepository, RunStatus, RunUpdate};
pub use predictions::{
    MasterMetadataDoc, MasterMetadataRepository, PointPredictionCacheRepository, PointPredictionDoc,
    PredictionDoc, PredictionRepository, SnapshotDoc, SnapshotRepository,
};
