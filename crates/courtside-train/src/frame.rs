//! Dataset frame
//!
//! Loads a dataset CSV and partitions its columns into metadata, targets,
//! and features. Prediction columns other than `pred_margin` never enter
//! the feature partition.

use std::collections::HashMap;
use std::path::Path;

use courtside_types::{CourtsideError, LeagueConfig, Result};

pub const META_COLUMNS: [&str; 6] = ["Year", "Month", "Day", "Home", "Away", "game_id"];
pub const TARGET_COLUMNS: [&str; 3] = ["HomeWon", "home_points", "away_points"];
const EXCLUDED_PRED_COLUMNS: [&str; 3] = ["pred_home_points", "pred_away_points", "pred_point_total"];

/// A loaded dataset: metadata strings, numeric feature matrix, targets.
#[derive(Debug, Clone)]
pub struct DatasetFrame {
    pub header: Vec<String>,
    pub feature_columns: Vec<String>,
    /// Row-major feature matrix, NaN/Inf replaced with 0.
    pub features: Vec<Vec<f64>>,
    /// Metadata column values per row, keyed by column name.
    pub meta: HashMap<String, Vec<String>>,
    /// Target column values per row (missing entries are NaN).
    pub targets: HashMap<String, Vec<f64>>,
    /// Season start year per row, per the league cutover rule.
    pub season_start_years: Vec<i32>,
}

impl DatasetFrame {
    pub fn load(path: &Path, cfg: &LeagueConfig) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)
            .map_err(|e| CourtsideError::DataMissing(format!("cannot open dataset {:?}: {}", path, e)))?;
        let header: Vec<String> = reader
            .headers()
            .map_err(|e| CourtsideError::Other(format!("csv header failed: {}", e)))?
            .iter()
            .map(|s| s.to_string())
            .collect();

        let feature_columns: Vec<String> = header
            .iter()
            .filter(|c| {
                !META_COLUMNS.contains(&c.as_str())
                    && !TARGET_COLUMNS.contains(&c.as_str())
                    && !EXCLUDED_PRED_COLUMNS.contains(&c.as_str())
            })
            .cloned()
            .collect();

        let col = |name: &str| header.iter().position(|h| h == name);
        let feature_idx: Vec<usize> = feature_columns
            .iter()
            .filter_map(|f| col(f))
            .collect();
        let meta_idx: Vec<(String, usize)> = META_COLUMNS
            .iter()
            .filter_map(|c| col(c).map(|i| (c.to_string(), i)))
            .collect();
        let target_idx: Vec<(String, usize)> = TARGET_COLUMNS
            .iter()
            .filter_map(|c| col(c).map(|i| (c.to_string(), i)))
            .collect();

        let mut features: Vec<Vec<f64>> = Vec::new();
        let mut meta: HashMap<String, Vec<String>> = meta_idx
            .iter()
            .map(|(name, _)| (name.clone(), Vec::new()))
            .collect();
        let mut targets: HashMap<String, Vec<f64>> = target_idx
            .iter()
            .map(|(name, _)| (name.clone(), Vec::new()))
            .collect();
        let mut season_start_years = Vec::new();

        for record in reader.records() {
            let record = record.map_err(|e| CourtsideError::Other(format!("csv row failed: {}", e)))?;
            let parse = |i: usize| -> f64 {
                record
                    .get(i)
                    .and_then(|v| v.parse::<f64>().ok())
                    .filter(|v| v.is_finite())
                    .unwrap_or(0.0)
            };
            features.push(feature_idx.iter().map(|i| parse(*i)).collect());
            for (name, idx) in &meta_idx {
                meta.get_mut(name)
                    .expect("meta column")
                    .push(record.get(*idx).unwrap_or("").to_string());
            }
            for (name, idx) in &target_idx {
                let raw = record.get(*idx).unwrap_or("");
                let value = raw.parse::<f64>().unwrap_or(f64::NAN);
                targets.get_mut(name).expect("target column").push(value);
            }
            let year: i32 = record
                .get(col("Year").unwrap_or(0))
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            let month: u32 = record
                .get(col("Month").unwrap_or(0))
                .and_then(|v| v.parse().ok())
                .unwrap_or(1);
            season_start_years.push(cfg.season_start_year(year, month));
        }

        Ok(Self {
            header,
            feature_columns,
            features,
            meta,
            targets,
            season_start_years,
        })
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn target(&self, name: &str) -> Result<&Vec<f64>> {
        self.targets.get(name).ok_or_else(|| {
            CourtsideError::DataMissing(format!(
                "target column '{}' not found; available columns: {:?}",
                name, self.header
            ))
        })
    }

    /// Row indices matching a predicate over (row, season_start_year).
    pub fn indices_where<F: Fn(usize, i32) -> bool>(&self, predicate: F) -> Vec<usize> {
        (0..self.len())
            .filter(|i| predicate(*i, self.season_start_years[*i]))
            .collect()
    }

    pub fn select_rows(&self, indices: &[usize]) -> Vec<Vec<f64>> {
        indices.iter().map(|i| self.features[*i].clone()).collect()
    }

    pub fn select_target(&self, name: &str, indices: &[usize]) -> Result<Vec<f64>> {
        let column = self.target(name)?;
        Ok(indices.iter().map(|i| column[*i]).collect())
    }

    /// Project rows onto a named feature subset; features the frame lacks
    /// are zero-filled.
    pub fn project(&self, indices: &[usize], feature_names: &[String]) -> Vec<Vec<f64>> {
        let positions: Vec<Option<usize>> = feature_names
            .iter()
            .map(|name| self.feature_columns.iter().position(|f| f == name))
            .collect();
        indices
            .iter()
            .map(|i| {
                positions
                    .iter()
                    .map(|p| match p {
                        Some(idx) => {
                            let v = self.features[*i][*idx];
                            if v.is_finite() {
                                v
                            } else {
                                0.0
                            }
                        }
                        None => 0.0,
                    })
                    .collect()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn partitions_columns_and_excludes_side_predictions() {
        let file = write_csv(
            "Year,Month,Day,Home,Away,game_id,f1,pred_margin,pred_home_points,HomeWon,home_points,away_points\n\
             2023,11,1,BOS,NYK,g1,1.5,3.0,110.0,1,110,100\n\
             2024,2,1,NYK,BOS,g2,-0.5,-2.0,100.0,0,95,99\n",
        );
        let frame = DatasetFrame::load(file.path(), &LeagueConfig::nba()).unwrap();
        assert_eq!(frame.feature_columns, vec!["f1".to_string(), "pred_margin".to_string()]);
        assert_eq!(frame.len(), 2);
        assert_eq!(frame.features[0], vec![1.5, 3.0]);
        assert_eq!(frame.target("HomeWon").unwrap(), &vec![1.0, 0.0]);
        assert_eq!(frame.season_start_years, vec![2023, 2023]);
    }

    #[test]
    fn projection_zero_fills_missing_features() {
        let file = write_csv(
            "Year,Month,Day,Home,Away,game_id,f1,HomeWon,home_points,away_points\n\
             2023,11,1,BOS,NYK,g1,2.0,1,110,100\n",
        );
        let frame = DatasetFrame::load(file.path(), &LeagueConfig::nba()).unwrap();
        let projected = frame.project(&[0], &["ghost".to_string(), "f1".to_string()]);
        assert_eq!(projected, vec![vec![0.0, 2.0]]);
    }

    #[test]
    fn missing_target_column_is_reported() {
        let file = write_csv("Year,Month,Day,Home,Away,game_id,f1\n2023,11,1,BOS,NYK,g1,2.0\n");
        let frame = DatasetFrame::load(file.path(), &LeagueConfig::nba()).unwrap();
        assert!(frame.target("HomeWon").is_err());
    }
}
