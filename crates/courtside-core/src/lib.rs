//! Courtside core domain logic
//!
//! Pure, I/O-free building blocks of the modeling core: game and player
//! domain types, the feature-key grammar and catalog, the stat handler,
//! the PER calculator, the Elo cache, the shared feature context, and the
//! in-crate model toolkit. Infrastructure crates load data and hand it to
//! these types; nothing here touches a database or the filesystem.

pub mod catalog;
pub mod context;
pub mod elo;
pub mod feature;
pub mod games;
pub mod ml;
pub mod per;
pub mod stats;

pub use context::{ContextData, SharedFeatureContext};
pub use elo::EloCache;
pub use feature::{CalcWeight, FeatureKey, Side, TimePeriod};
pub use games::{Game, GameIndex, Player, PlayerGameLine, Roster, RosterEntry, Team, TeamBox};
pub use per::PerCalculator;
pub use stats::StatHandler;
