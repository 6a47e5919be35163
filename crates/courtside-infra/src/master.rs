//! Master training table
//!
//! Builds the single wide CSV every dataset is carved from: metadata
//! columns first, feature columns sorted lexicographically, targets last.
//! Supports full generation, incremental window updates aligned to the
//! existing header, and bounded date-range regeneration. Writes are
//! write-once per path: rows stream into a temp file that is atomically
//! renamed over the target.

use rayon::prelude::*;
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use courtside_core::catalog::{all_feature_keys, CatalogOptions};
use courtside_core::context::SharedFeatureContext;
use courtside_core::games::Game;
use courtside_types::{CourtsideError, GameDate, LeagueConfig, Result};

use crate::loader::ContextLoader;
use crate::repos::{GameRepository, MasterMetadataRepository};
use crate::store::DocumentStore;

pub const META_COLUMNS: [&str; 6] = ["Year", "Month", "Day", "Home", "Away", "game_id"];
pub const TARGET_COLUMNS: [&str; 3] = ["HomeWon", "home_points", "away_points"];

const CHUNK_SIZE: usize = 64;

/// Options for master generation.
#[derive(Debug, Clone)]
pub struct MasterOptions {
    pub catalog: CatalogOptions,
    /// Restrict to an explicit season list (bounds memory).
    pub seasons: Option<Vec<String>>,
    pub output_path: PathBuf,
}

/// Result of a master build or update.
#[derive(Debug, Clone)]
pub struct MasterSummary {
    pub csv_path: PathBuf,
    pub feature_count: usize,
    pub row_count: usize,
    pub rows_changed: usize,
    pub last_date_updated: Option<String>,
}

pub struct MasterTableBuilder {
    store: Arc<DocumentStore>,
    cfg: LeagueConfig,
}

impl MasterTableBuilder {
    pub fn new(store: Arc<DocumentStore>, cfg: LeagueConfig) -> Self {
        Self { store, cfg }
    }

    fn games_repo(&self) -> GameRepository {
        GameRepository::new(Arc::clone(&self.store), &self.cfg)
    }

    fn metadata_repo(&self) -> MasterMetadataRepository {
        MasterMetadataRepository::new(Arc::clone(&self.store), &self.cfg)
    }

    fn header(features: &[String]) -> Vec<String> {
        META_COLUMNS
            .iter()
            .map(|c| c.to_string())
            .chain(features.iter().cloned())
            .chain(TARGET_COLUMNS.iter().map(|c| c.to_string()))
            .collect()
    }

    fn format_value(v: f64) -> String {
        if v == 0.0 {
            "0.0".to_string()
        } else {
            format!("{}", v)
        }
    }

    fn row_for_game(ctx: &SharedFeatureContext, features: &[String], game: &Game) -> Vec<String> {
        let values = ctx.calculate_features_for_row(
            &game.home.name,
            &game.away.name,
            &game.season,
            &game.date,
            Some(&game.game_id),
            game.venue_guid.as_deref(),
            None,
        );
        let mut row = Vec::with_capacity(META_COLUMNS.len() + features.len() + TARGET_COLUMNS.len());
        row.push(game.date.year.to_string());
        row.push(game.date.month.to_string());
        row.push(game.date.day.to_string());
        row.push(game.home.name.clone());
        row.push(game.away.name.clone());
        row.push(game.game_id.clone());
        for feature in features {
            row.push(Self::format_value(
                values.get(feature).copied().unwrap_or(0.0),
            ));
        }
        let home_won = match game.home_won_resolved() {
            Some(true) => "1",
            _ => "0",
        };
        row.push(home_won.to_string());
        row.push(format!("{}", game.home.points));
        row.push(format!("{}", game.away.points));
        row
    }

    fn write_rows_atomic(path: &Path, header: &[String], rows: &[Vec<String>]) -> Result<()> {
        let dir = path
            .parent()
            .ok_or_else(|| CourtsideError::InvalidInput(format!("bad master path: {:?}", path)))?;
        std::fs::create_dir_all(dir)?;
        let temp = tempfile::NamedTempFile::new_in(dir)?;
        {
            let mut writer = csv::Writer::from_writer(temp.reopen()?);
            writer
                .write_record(header)
                .map_err(|e| CourtsideError::Other(format!("csv write failed: {}", e)))?;
            for row in rows {
                writer
                    .write_record(row)
                    .map_err(|e| CourtsideError::Other(format!("csv write failed: {}", e)))?;
            }
            writer
                .flush()
                .map_err(|e| CourtsideError::Other(format!("csv flush failed: {}", e)))?;
        }
        temp.persist(path)
            .map_err(|e| CourtsideError::Other(format!("atomic rename failed: {}", e)))?;
        Ok(())
    }

    /// Read a master CSV into (header, rows).
    pub fn read_master(path: &Path) -> Result<(Vec<String>, Vec<Vec<String>>)> {
        if !path.exists() {
            return Err(CourtsideError::DataMissing(format!(
                "master CSV not found at {:?}; generate it first",
                path
            )));
        }
        let mut reader = csv::Reader::from_path(path)
            .map_err(|e| CourtsideError::Other(format!("csv open failed: {}", e)))?;
        let header: Vec<String> = reader
            .headers()
            .map_err(|e| CourtsideError::Other(format!("csv header failed: {}", e)))?
            .iter()
            .map(|s| s.to_string())
            .collect();
        let mut rows = Vec::new();
        for record in reader.records() {
            let record =
                record.map_err(|e| CourtsideError::Other(format!("csv row failed: {}", e)))?;
            rows.push(record.iter().map(|s| s.to_string()).collect());
        }
        Ok((header, rows))
    }

    fn feature_columns(header: &[String]) -> Vec<String> {
        header
            .iter()
            .filter(|c| {
                !META_COLUMNS.contains(&c.as_str()) && !TARGET_COLUMNS.contains(&c.as_str())
            })
            .cloned()
            .collect()
    }

    fn row_key(header: &[String], row: &[String]) -> String {
        let index = |name: &str| header.iter().position(|h| h == name).unwrap_or(usize::MAX);
        let get = |name: &str| {
            let i = index(name);
            row.get(i).cloned().unwrap_or_default()
        };
        format!(
            "{}-{}-{}-{}-{}",
            get("Year"),
            get("Month"),
            get("Day"),
            get("Home"),
            get("Away")
        )
    }

    fn sort_key(header: &[String], row: &[String]) -> (i64, String, String) {
        let get = |name: &str| {
            header
                .iter()
                .position(|h| h == name)
                .and_then(|i| row.get(i))
                .cloned()
                .unwrap_or_default()
        };
        let date_key = get("Year").parse::<i64>().unwrap_or(0) * 10_000
            + get("Month").parse::<i64>().unwrap_or(0) * 100
            + get("Day").parse::<i64>().unwrap_or(0);
        (date_key, get("Home"), get("Away"))
    }

    fn compute_rows(
        ctx: &SharedFeatureContext,
        features: &[String],
        games: &[Arc<Game>],
    ) -> Vec<Vec<String>> {
        games
            .par_chunks(CHUNK_SIZE)
            .flat_map(|chunk| {
                chunk
                    .iter()
                    .map(|game| Self::row_for_game(ctx, features, game))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Full generation over every completed game.
    pub async fn generate_full(&self, opts: &MasterOptions) -> Result<MasterSummary> {
        let features = all_feature_keys(&opts.catalog);
        let loader = ContextLoader::new(Arc::clone(&self.store), self.cfg.clone());
        let ctx = loader.load(features.clone(), opts.seasons.clone()).await?;
        ctx.validate_features()?;

        let games: Vec<Arc<Game>> = ctx.index().all_games().to_vec();
        tracing::info!(games = games.len(), features = features.len(), "generating master table");

        let rows = Self::compute_rows(&ctx, &features, &games);
        let header = Self::header(&features);
        Self::write_rows_atomic(&opts.output_path, &header, &rows)?;

        // Persist the replayed Elo ratings alongside the master.
        let elo_records = ctx.elo_records();
        if !elo_records.is_empty() {
            let count = crate::repos::EloRatingRepository::new(Arc::clone(&self.store), &self.cfg)
                .persist(elo_records)
                .await?;
            tracing::debug!(count, "persisted elo rating cache");
        }

        let last_date = games.last().map(|g| g.date.iso());
        self.metadata_repo()
            .upsert(
                &opts.output_path.display().to_string(),
                features.clone(),
                last_date.as_deref().unwrap_or(""),
                json!({
                    "game_windows": opts.catalog.game_windows,
                    "day_windows": opts.catalog.day_windows,
                    "no_player": opts.catalog.no_player,
                }),
            )
            .await?;

        Ok(MasterSummary {
            csv_path: opts.output_path.clone(),
            feature_count: features.len(),
            rows_changed: rows.len(),
            row_count: rows.len(),
            last_date_updated: last_date,
        })
    }

    /// Compute rows for a set of games aligned to an existing header: the
    /// header is authoritative, missing columns fill with 0.
    async fn rows_aligned_to_header(
        &self,
        header: &[String],
        games: Vec<Game>,
    ) -> Result<Vec<Vec<String>>> {
        let features = Self::feature_columns(header);
        // Load the full corpus: Elo and season aggregates for the window
        // rows depend on games outside the window's seasons.
        let loader = ContextLoader::new(Arc::clone(&self.store), self.cfg.clone());
        let ctx = loader.load(features.clone(), None).await?;
        let games: Vec<Arc<Game>> = games.into_iter().map(Arc::new).collect();
        Ok(Self::compute_rows(&ctx, &features, &games))
    }

    /// Incremental update: compute rows for games with
    /// `start < date <= end`, align to the existing header, append,
    /// de-duplicate on the metadata key, and sort.
    pub async fn update_incremental(
        &self,
        start_exclusive: &GameDate,
        end_inclusive: &GameDate,
    ) -> Result<MasterSummary> {
        let meta = self.metadata_repo().get().await?.ok_or_else(|| {
            CourtsideError::DataMissing(
                "master training metadata does not exist; run a full generation first".to_string(),
            )
        })?;
        let path = PathBuf::from(&meta.file_path);
        let (header, mut rows) = Self::read_master(&path)?;

        let new_games = self
            .games_repo()
            .list_between(start_exclusive, end_inclusive)
            .await?;
        if new_games.is_empty() {
            return Ok(MasterSummary {
                csv_path: path,
                feature_count: Self::feature_columns(&header).len(),
                row_count: rows.len(),
                rows_changed: 0,
                last_date_updated: Some(meta.last_date_updated),
            });
        }

        let new_rows = self.rows_aligned_to_header(&header, new_games).await?;
        let changed = new_rows.len();
        rows.extend(new_rows);

        // Keep the most recent entry per (Year, Month, Day, Home, Away).
        let mut deduped: HashMap<String, Vec<String>> = HashMap::new();
        for row in rows {
            deduped.insert(Self::row_key(&header, &row), row);
        }
        let mut rows: Vec<Vec<String>> = deduped.into_values().collect();
        rows.sort_by(|a, b| Self::sort_key(&header, a).cmp(&Self::sort_key(&header, b)));

        Self::write_rows_atomic(&path, &header, &rows)?;
        let meta = self
            .metadata_repo()
            .upsert(
                &meta.file_path,
                Self::feature_columns(&header),
                &end_inclusive.iso(),
                meta.options.clone(),
            )
            .await?;

        Ok(MasterSummary {
            csv_path: path,
            feature_count: Self::feature_columns(&header).len(),
            row_count: rows.len(),
            rows_changed: changed,
            last_date_updated: Some(meta.last_date_updated),
        })
    }

    /// Remove master rows within the closed date range, recompute them
    /// under the existing header, and re-insert sorted. New catalog
    /// columns require full regeneration; the existing columns are
    /// preserved as-is.
    pub async fn regenerate_range(
        &self,
        start_inclusive: &GameDate,
        end_inclusive: &GameDate,
    ) -> Result<MasterSummary> {
        let meta = self.metadata_repo().get().await?.ok_or_else(|| {
            CourtsideError::DataMissing(
                "master training metadata does not exist; run a full generation first".to_string(),
            )
        })?;
        let path = PathBuf::from(&meta.file_path);
        let (header, rows) = Self::read_master(&path)?;

        let in_range = |row: &Vec<String>| {
            let key = Self::sort_key(&header, row).0;
            key >= start_inclusive.key() && key <= end_inclusive.key()
        };
        let mut kept: Vec<Vec<String>> = rows.into_iter().filter(|r| !in_range(r)).collect();

        let window_games: Vec<Game> = self
            .games_repo()
            .list_completed()
            .await?
            .into_iter()
            .filter(|g| g.date.key() >= start_inclusive.key() && g.date.key() <= end_inclusive.key())
            .collect();
        let recomputed = self.rows_aligned_to_header(&header, window_games).await?;
        let changed = recomputed.len();
        kept.extend(recomputed);
        kept.sort_by(|a, b| Self::sort_key(&header, a).cmp(&Self::sort_key(&header, b)));

        Self::write_rows_atomic(&path, &header, &kept)?;
        let meta = self
            .metadata_repo()
            .upsert(
                &meta.file_path,
                Self::feature_columns(&header),
                &meta.last_date_updated.clone(),
                meta.options.clone(),
            )
            .await?;

        Ok(MasterSummary {
            csv_path: path,
            feature_count: Self::feature_columns(&header).len(),
            row_count: kept.len(),
            rows_changed: changed,
            last_date_updated: Some(meta.last_date_updated),
        })
    }
}
