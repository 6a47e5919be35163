//! Courtside infrastructure
//!
//! Persistence, filesystem, and HTTP concerns: the SQLite-backed document
//! store, typed repositories for every logical collection, the shared
//! context loader, the master-table and dataset builders, model artifact
//! storage, and the best-effort upstream sports/news clients.

pub mod artifacts;
pub mod dataset;
pub mod espn;
pub mod hashing;
pub mod loader;
pub mod master;
pub mod news;
pub mod repos;
pub mod store;

pub use artifacts::ArtifactStore;
pub use dataset::{DatasetBuilder, DatasetResult, DatasetSpec};
pub use loader::ContextLoader;
pub use master::{MasterOptions, MasterSummary, MasterTableBuilder};
pub use store::DocumentStore;
