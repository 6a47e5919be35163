//! Dataset builder
//!
//! Projects a cached subset of master columns plus temporal filters into a
//! hashed dataset artifact: CSV plus sidecar JSON metadata. Feature
//! resolution is an explicit `{available, dropped}` split; only truly
//! fatal conditions (missing master, zero rows, zero features) raise.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use courtside_core::catalog::{available_blocks, features_for_blocks, side_allowed};
use courtside_types::{CourtsideError, GameDate, LeagueConfig, Result};

use crate::hashing::stable_hash;
use crate::master::{MasterTableBuilder, META_COLUMNS, TARGET_COLUMNS};
use crate::repos::{MasterMetadataRepository, PointPredictionCacheRepository};
use crate::store::DocumentStore;

/// Declarative description of a dataset carve.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_blocks: Option<Vec<String>>,
    /// Explicit feature list; overrides blocks and bypasses the diff-mode
    /// filter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub individual_features: Option<Vec<String>>,
    /// Season-start-year lower bound (inclusive).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub begin_year: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_year: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub begin_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    /// Require both teams to have at least this many prior same-season
    /// games before each included row.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_games_played: Option<u32>,
    /// `home_minus_away` | `absolute` | `mixed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff_mode: Option<String>,
    /// Merge this points model's cached margins as a `pred_margin` column.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub point_model_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_per: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_preseason: Option<bool>,
}

/// Outcome of a dataset build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetResult {
    pub dataset_id: String,
    pub csv_path: PathBuf,
    pub schema: Vec<String>,
    pub row_count: usize,
    pub feature_count: usize,
    #[serde(default)]
    pub dropped_features: Vec<String>,
    pub cached: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct DatasetMetadata {
    dataset_id: String,
    spec: DatasetSpec,
    schema: Vec<String>,
    row_count: usize,
    feature_count: usize,
    created_at: String,
    #[serde(default)]
    dropped_features: Vec<String>,
    #[serde(default)]
    requested_feature_count: Option<usize>,
}

pub struct DatasetBuilder {
    store: Arc<DocumentStore>,
    cfg: LeagueConfig,
    cache_dir: PathBuf,
}

impl DatasetBuilder {
    pub fn new(store: Arc<DocumentStore>, cfg: LeagueConfig, cache_dir: PathBuf) -> Self {
        Self {
            store,
            cfg,
            cache_dir,
        }
    }

    fn cache_paths(&self, dataset_id: &str) -> (PathBuf, PathBuf) {
        (
            self.cache_dir.join(format!("dataset_{}.csv", dataset_id)),
            self.cache_dir.join(format!("dataset_{}_meta.json", dataset_id)),
        )
    }

    pub fn dataset_id(spec: &DatasetSpec) -> Result<String> {
        Ok(stable_hash(&serde_json::to_value(spec)?))
    }

    async fn master_path(&self) -> Result<PathBuf> {
        let meta = MasterMetadataRepository::new(Arc::clone(&self.store), &self.cfg)
            .get()
            .await?
            .ok_or_else(|| {
                CourtsideError::DataMissing(
                    "master training CSV metadata not found; generate the master first".to_string(),
                )
            })?;
        let path = PathBuf::from(meta.file_path);
        if !path.exists() {
            return Err(CourtsideError::DataMissing(format!(
                "master training CSV not found at {:?}; cannot build dataset without pre-computed features",
                path
            )));
        }
        Ok(path)
    }

    fn try_cached(&self, dataset_id: &str) -> Option<DatasetResult> {
        let (csv_path, meta_path) = self.cache_paths(dataset_id);
        if !csv_path.exists() || !meta_path.exists() {
            return None;
        }
        let metadata: DatasetMetadata =
            serde_json::from_str(&std::fs::read_to_string(&meta_path).ok()?).ok()?;
        // A cached CSV must carry actual data rows, not just a header.
        let mut reader = csv::Reader::from_path(&csv_path).ok()?;
        if metadata.row_count == 0 || reader.records().next().is_none() {
            tracing::warn!(dataset_id, "cached dataset is empty, rebuilding");
            let _ = std::fs::remove_file(&csv_path);
            let _ = std::fs::remove_file(&meta_path);
            return None;
        }
        Some(DatasetResult {
            dataset_id: dataset_id.to_string(),
            csv_path,
            schema: metadata.schema,
            row_count: metadata.row_count,
            feature_count: metadata.feature_count,
            dropped_features: metadata.dropped_features,
            cached: true,
        })
    }

    fn resolve_features(
        &self,
        spec: &DatasetSpec,
        master_features: &[String],
    ) -> Result<(Vec<String>, Vec<String>)> {
        let requested: Vec<String> = if let Some(individual) = &spec.individual_features {
            individual.clone()
        } else if let Some(blocks) = &spec.feature_blocks {
            let (mut selected, missing_blocks) = features_for_blocks(master_features, blocks);
            if !missing_blocks.is_empty() && selected.is_empty() {
                return Err(CourtsideError::Config(format!(
                    "invalid feature blocks {:?}; valid blocks are {:?}",
                    missing_blocks,
                    available_blocks(master_features)
                )));
            }
            if let Some(mode) = &spec.diff_mode {
                selected.retain(|f| side_allowed(f, mode));
            }
            selected
        } else {
            master_features.to_vec()
        };

        if requested.is_empty() {
            return Err(CourtsideError::Config(format!(
                "no features specified or available; valid feature blocks are {:?}",
                available_blocks(master_features)
            )));
        }

        let master_set: std::collections::HashSet<&String> = master_features.iter().collect();
        let dropped: Vec<String> = requested
            .iter()
            .filter(|f| !master_set.contains(f))
            .cloned()
            .collect();
        // Preserve the master's column order, not the request order, so
        // feature alignment is stable across builds.
        let available: Vec<String> = master_features
            .iter()
            .filter(|f| requested.iter().any(|r| r == *f))
            .cloned()
            .collect();
        if available.is_empty() {
            return Err(CourtsideError::Config(format!(
                "all {} requested features are missing from the master CSV; regenerate the master or request available features",
                dropped.len()
            )));
        }
        if !dropped.is_empty() {
            tracing::warn!(
                dropped = dropped.len(),
                available = available.len(),
                "requested features missing from master will be dropped"
            );
        }
        Ok((available, dropped))
    }

    /// Build (or return the cached) dataset for a spec.
    pub async fn build_dataset(&self, spec: &DatasetSpec) -> Result<DatasetResult> {
        let dataset_id = Self::dataset_id(spec)?;
        if let Some(cached) = self.try_cached(&dataset_id) {
            return Ok(cached);
        }

        let master_path = self.master_path().await?;
        let (header, rows) = MasterTableBuilder::read_master(&master_path)?;
        let master_features: Vec<String> = header
            .iter()
            .filter(|c| !META_COLUMNS.contains(&c.as_str()) && !TARGET_COLUMNS.contains(&c.as_str()))
            .cloned()
            .collect();

        let (features, dropped) = self.resolve_features(spec, &master_features)?;

        let col = |name: &str| header.iter().position(|h| h == name);
        let year_idx = col("Year").ok_or_else(|| {
            CourtsideError::DataMissing("master CSV is missing the Year column".to_string())
        })?;
        let month_idx = col("Month").ok_or_else(|| {
            CourtsideError::DataMissing("master CSV is missing the Month column".to_string())
        })?;
        let day_idx = col("Day").unwrap_or(year_idx);
        let home_idx = col("Home").unwrap_or(0);
        let away_idx = col("Away").unwrap_or(0);

        let season_start_year = |row: &Vec<String>| -> i32 {
            let year: i32 = row[year_idx].parse().unwrap_or(0);
            let month: u32 = row[month_idx].parse().unwrap_or(1);
            self.cfg.season_start_year(year, month)
        };
        let date_key = |row: &Vec<String>| -> i64 {
            let y: i64 = row[year_idx].parse().unwrap_or(0);
            let m: i64 = row[month_idx].parse().unwrap_or(0);
            let d: i64 = row[day_idx].parse().unwrap_or(0);
            y * 10_000 + m * 100 + d
        };

        let begin_date_key = match &spec.begin_date {
            Some(s) => Some(GameDate::parse_iso(s)?.key()),
            None => None,
        };
        let end_date_key = match &spec.end_date {
            Some(s) => Some(GameDate::parse_iso(s)?.key()),
            None => None,
        };

        let mut filtered: Vec<&Vec<String>> = rows
            .iter()
            .filter(|row| {
                let ssy = season_start_year(row);
                if let Some(begin) = spec.begin_year {
                    if ssy < begin {
                        return false;
                    }
                }
                if let Some(end) = spec.end_year {
                    if ssy > end {
                        return false;
                    }
                }
                let key = date_key(row);
                if let Some(begin) = begin_date_key {
                    if key < begin {
                        return false;
                    }
                }
                if let Some(end) = end_date_key {
                    if key > end {
                        return false;
                    }
                }
                true
            })
            .collect();

        if let Some(min_games) = spec.min_games_played.filter(|k| *k > 0) {
            filtered = Self::apply_min_games_filter(
                filtered,
                min_games as usize,
                &season_start_year,
                &date_key,
                home_idx,
                away_idx,
            );
            if filtered.is_empty() {
                return Err(CourtsideError::DataMissing(format!(
                    "no training data after applying min_games_played >= {}; both teams must have that many prior same-season games",
                    min_games
                )));
            }
        }

        if filtered.is_empty() {
            return Err(CourtsideError::DataMissing(format!(
                "no training data after filtering master CSV (begin_year={:?}, end_year={:?}, dates {:?}..{:?})",
                spec.begin_year, spec.end_year, spec.begin_date, spec.end_date
            )));
        }

        // Optional pred_margin join from the point-prediction cache.
        let margins: Option<HashMap<String, f64>> = match &spec.point_model_id {
            Some(model_id) => Some(
                PointPredictionCacheRepository::new(Arc::clone(&self.store), &self.cfg)
                    .margins_by_row_key(model_id)
                    .await?,
            ),
            None => None,
        };

        let mut schema = features.clone();
        if margins.is_some() {
            schema.push("pred_margin".to_string());
        }

        let meta_cols: Vec<usize> = META_COLUMNS.iter().filter_map(|c| col(c)).collect();
        let target_cols: Vec<usize> = TARGET_COLUMNS.iter().filter_map(|c| col(c)).collect();
        let feature_cols: Vec<usize> = features.iter().filter_map(|f| col(f)).collect();

        let mut out_header: Vec<String> = Vec::new();
        for idx in &meta_cols {
            out_header.push(header[*idx].clone());
        }
        out_header.extend(schema.iter().cloned());
        for idx in &target_cols {
            out_header.push(header[*idx].clone());
        }

        let mut out_rows: Vec<Vec<String>> = Vec::with_capacity(filtered.len());
        for row in &filtered {
            let mut out = Vec::with_capacity(out_header.len());
            for idx in &meta_cols {
                out.push(row[*idx].clone());
            }
            for idx in &feature_cols {
                out.push(row.get(*idx).cloned().unwrap_or_else(|| "0.0".to_string()));
            }
            if let Some(margins) = &margins {
                let key = format!(
                    "{}-{}-{}-{}-{}",
                    row[year_idx].parse::<i64>().unwrap_or(0),
                    row[month_idx].parse::<i64>().unwrap_or(0),
                    row[day_idx].parse::<i64>().unwrap_or(0),
                    row[home_idx],
                    row[away_idx]
                );
                out.push(format!("{}", margins.get(&key).copied().unwrap_or(0.0)));
            }
            for idx in &target_cols {
                out.push(row.get(*idx).cloned().unwrap_or_else(|| "0".to_string()));
            }
            out_rows.push(out);
        }

        let (csv_path, meta_path) = self.cache_paths(&dataset_id);
        std::fs::create_dir_all(&self.cache_dir)?;
        Self::write_csv_atomic(&csv_path, &out_header, &out_rows)?;

        let metadata = DatasetMetadata {
            dataset_id: dataset_id.clone(),
            spec: spec.clone(),
            schema: schema.clone(),
            row_count: out_rows.len(),
            feature_count: schema.len(),
            created_at: Utc::now().to_rfc3339(),
            dropped_features: dropped.clone(),
            requested_feature_count: if dropped.is_empty() {
                None
            } else {
                Some(dropped.len() + schema.len())
            },
        };
        let temp = tempfile::NamedTempFile::new_in(&self.cache_dir)?;
        std::fs::write(temp.path(), serde_json::to_string_pretty(&metadata)?)?;
        temp.persist(&meta_path)
            .map_err(|e| CourtsideError::Other(format!("atomic rename failed: {}", e)))?;

        tracing::info!(
            %dataset_id,
            rows = out_rows.len(),
            features = schema.len(),
            "dataset built"
        );
        Ok(DatasetResult {
            dataset_id,
            csv_path,
            schema,
            row_count: out_rows.len(),
            feature_count: metadata.feature_count,
            dropped_features: dropped,
            cached: false,
        })
    }

    fn apply_min_games_filter<'a>(
        rows: Vec<&'a Vec<String>>,
        min_games: usize,
        season_start_year: &dyn Fn(&Vec<String>) -> i32,
        date_key: &dyn Fn(&Vec<String>) -> i64,
        home_idx: usize,
        away_idx: usize,
    ) -> Vec<&'a Vec<String>> {
        let mut order: Vec<usize> = (0..rows.len()).collect();
        order.sort_by_key(|i| date_key(rows[*i]));

        let mut priors: HashMap<(i32, String), usize> = HashMap::new();
        let mut keep = vec![false; rows.len()];
        for i in order {
            let row = rows[i];
            let season = season_start_year(row);
            let home_key = (season, row[home_idx].clone());
            let away_key = (season, row[away_idx].clone());
            let home_prior = *priors.get(&home_key).unwrap_or(&0);
            let away_prior = *priors.get(&away_key).unwrap_or(&0);
            keep[i] = home_prior >= min_games && away_prior >= min_games;
            *priors.entry(home_key).or_insert(0) += 1;
            *priors.entry(away_key).or_insert(0) += 1;
        }
        rows.into_iter()
            .enumerate()
            .filter(|(i, _)| keep[*i])
            .map(|(_, r)| r)
            .collect()
    }

    fn write_csv_atomic(path: &Path, header: &[String], rows: &[Vec<String>]) -> Result<()> {
        let dir = path
            .parent()
            .ok_or_else(|| CourtsideError::InvalidInput(format!("bad dataset path: {:?}", path)))?;
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
}
