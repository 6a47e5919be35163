//! Courtside training engine
//!
//! The deterministic, cache-keyed experiment layer: dataset-backed
//! classification and points-regression runs under time-based calibration,
//! stacking of compatible base models into calibrated ensembles, and the
//! serving services that run the selected ensemble for a single game.

pub mod config;
pub mod experiment;
pub mod frame;
pub mod points;
pub mod serving;
pub mod stacking;

pub use config::{ExperimentConfig, PointsTarget, ScalerKind, SplitKind, SplitSpec, TaskKind};
pub use experiment::{ExperimentOutcome, ExperimentRunner};
pub use frame::DatasetFrame;
pub use serving::{LineupService, PredictionService};
pub use stacking::{StackingMode, StackingParams, StackingTrainer};
