//! Master metadata, point-prediction cache, prediction, and scenario
//! snapshot repositories

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use courtside_types::{CourtsideError, LeagueConfig, Result};

use crate::store::DocumentStore;

/// Singleton master-table metadata per league.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterMetadataDoc {
    pub file_path: String,
    pub feature_list: Vec<String>,
    pub feature_count: usize,
    /// Latest game date covered (`YYYY-MM-DD`); monotonic under
    /// incremental updates.
    pub last_date_updated: String,
    #[serde(default)]
    pub options: Value,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Clone)]
pub struct MasterMetadataRepository {
    store: Arc<DocumentStore>,
    collection: String,
}

impl MasterMetadataRepository {
    const DOC_ID: &'static str = "master";

    pub fn new(store: Arc<DocumentStore>, cfg: &LeagueConfig) -> Self {
        Self {
            store,
            collection: cfg.collection("master_training_metadata"),
        }
    }

    pub async fn get(&self) -> Result<Option<MasterMetadataDoc>> {
        self.store.get_doc(&self.collection, Self::DOC_ID).await
    }

    pub async fn upsert(
        &self,
        file_path: &str,
        feature_list: Vec<String>,
        last_date_updated: &str,
        options: Value,
    ) -> Result<MasterMetadataDoc> {
        let now = Utc::now().to_rfc3339();
        let existing = self.get().await?;
        let created_at = existing
            .as_ref()
            .map(|d| d.created_at.clone())
            .unwrap_or_else(|| now.clone());
        // last_date_updated never moves backwards.
        let last_date = match &existing {
            Some(doc) if doc.last_date_updated.as_str() > last_date_updated => {
                doc.last_date_updated.clone()
            }
            _ => last_date_updated.to_string(),
        };
        let doc = MasterMetadataDoc {
            file_path: file_path.to_string(),
            feature_count: feature_list.len(),
            feature_list,
            last_date_updated: last_date,
            options,
            created_at,
            updated_at: now,
        };
        self.store.put_doc(&self.collection, Self::DOC_ID, &doc).await?;
        Ok(doc)
    }
}

/// One cached point prediction for (model, game).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointPredictionDoc {
    pub model_id: String,
    pub game_id: String,
    #[serde(default)]
    pub pred_home_points: Option<f64>,
    #[serde(default)]
    pub pred_away_points: Option<f64>,
    #[serde(default)]
    pub pred_margin: Option<f64>,
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub home_team: String,
    pub away_team: String,
}

impl PointPredictionDoc {
    /// Margin, derived from the perspectives when not predicted directly.
    pub fn margin(&self) -> Option<f64> {
        self.pred_margin.or(match (self.pred_home_points, self.pred_away_points) {
            (Some(h), Some(a)) => Some(h - a),
            _ => None,
        })
    }
}

#[derive(Clone)]
pub struct PointPredictionCacheRepository {
    store: Arc<DocumentStore>,
    collection: String,
}

impl PointPredictionCacheRepository {
    pub fn new(store: Arc<DocumentStore>, cfg: &LeagueConfig) -> Self {
        Self {
            store,
            collection: cfg.collection("point_prediction_cache"),
        }
    }

    fn doc_id(doc: &PointPredictionDoc) -> String {
        if doc.game_id.is_empty() {
            format!(
                "{}:{}-{:02}-{:02}:{}:{}",
                doc.model_id, doc.year, doc.month, doc.day, doc.home_team, doc.away_team
            )
        } else {
            format!("{}:{}", doc.model_id, doc.game_id)
        }
    }

    /// Batch-insert predictions; returns the cached count.
    pub async fn cache_predictions(
        &self,
        predictions: &[PointPredictionDoc],
        metadata: Value,
    ) -> Result<usize> {
        for doc in predictions {
            self.store
                .put_doc(&self.collection, &Self::doc_id(doc), doc)
                .await?;
        }
        if let Some(model_id) = predictions.first().map(|p| p.model_id.clone()) {
            self.store
                .put(
                    &self.collection,
                    &format!("__meta:{}", model_id),
                    &serde_json::json!({ "model_id": model_id, "metadata": metadata, "count": predictions.len() }),
                )
                .await?;
        }
        Ok(predictions.len())
    }

    pub async fn list_for_model(&self, model_id: &str) -> Result<Vec<PointPredictionDoc>> {
        Ok(self
            .store
            .list_docs::<PointPredictionDoc>(&self.collection)
            .await?
            .into_iter()
            .filter(|d| d.model_id == model_id)
            .collect())
    }

    /// Margin per (Year, Month, Day, Home, Away) key, for dataset joins.
    pub async fn margins_by_row_key(&self, model_id: &str) -> Result<HashMap<String, f64>> {
        let docs = self.list_for_model(model_id).await?;
        if docs.is_empty() {
            return Err(CourtsideError::Config(format!(
                "no cached point predictions for model_id {}; run a points regression experiment first",
                model_id
            )));
        }
        let mut out = HashMap::new();
        for doc in docs {
            if let Some(margin) = doc.margin() {
                let key = format!(
                    "{}-{}-{}-{}-{}",
                    doc.year, doc.month, doc.day, doc.home_team, doc.away_team
                );
                out.insert(key, margin);
            }
        }
        Ok(out)
    }
}

/// Persisted model prediction for one game.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionDoc {
    pub game_id: String,
    /// Percent, 0..100.
    pub home_win_prob: f64,
    pub away_win_prob: f64,
    pub predicted_winner: String,
    #[serde(default)]
    pub features_dict: HashMap<String, f64>,
    /// Base-model probabilities keyed by their meta-column names.
    #[serde(default)]
    pub base_outputs: HashMap<String, f64>,
    /// The full meta-feature vector the ensemble consumed.
    #[serde(default)]
    pub meta_feature_values: HashMap<String, f64>,
    #[serde(default)]
    pub config_id: Option<String>,
    pub created_at: String,
}

#[derive(Clone)]
pub struct PredictionRepository {
    store: Arc<DocumentStore>,
    collection: String,
}

impl PredictionRepository {
    pub fn new(store: Arc<DocumentStore>, cfg: &LeagueConfig) -> Self {
        Self {
            store,
            collection: cfg.collection("model_predictions"),
        }
    }

    pub async fn upsert(&self, doc: &PredictionDoc) -> Result<()> {
        self.store.put_doc(&self.collection, &doc.game_id, doc).await
    }

    pub async fn get(&self, game_id: &str) -> Result<Option<PredictionDoc>> {
        self.store.get_doc(&self.collection, game_id).await
    }
}

/// Immutable snapshot of a prediction taken under a roster perturbation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotDoc {
    pub snapshot_id: String,
    pub game_id: String,
    pub prediction: PredictionDoc,
    #[serde(default)]
    pub note: Option<String>,
    pub created_at: String,
}

#[derive(Clone)]
pub struct SnapshotRepository {
    store: Arc<DocumentStore>,
    collection: String,
}

impl SnapshotRepository {
    pub fn new(store: Arc<DocumentStore>, cfg: &LeagueConfig) -> Self {
        Self {
            store,
            collection: cfg.collection("prediction_scenarios"),
        }
    }

    pub async fn snapshot(&self, prediction: &PredictionDoc, note: Option<String>) -> Result<SnapshotDoc> {
        let doc = SnapshotDoc {
            snapshot_id: Uuid::new_v4().to_string(),
            game_id: prediction.game_id.clone(),
            prediction: prediction.clone(),
            note,
            created_at: Utc::now().to_rfc3339(),
        };
        self.store
            .put_doc(&self.collection, &doc.snapshot_id, &doc)
            .await?;
        Ok(doc)
    }

    pub async fn get(&self, snapshot_id: &str) -> Result<Option<SnapshotDoc>> {
        self.store.get_doc(&self.collection, snapshot_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn master_metadata_last_date_is_monotonic() {
        let store = Arc::new(DocumentStore::in_memory().await.unwrap());
        let repo = MasterMetadataRepository::new(store, &LeagueConfig::nba());
        repo.upsert("/tmp/master.csv", vec!["f1".into()], "2024-02-01", json!({}))
            .await
            .unwrap();
        let doc = repo
            .upsert("/tmp/master.csv", vec!["f1".into()], "2024-01-15", json!({}))
            .await
            .unwrap();
        assert_eq!(doc.last_date_updated, "2024-02-01");
        let doc = repo
            .upsert("/tmp/master.csv", vec!["f1".into()], "2024-03-01", json!({}))
            .await
            .unwrap();
        assert_eq!(doc.last_date_updated, "2024-03-01");
    }

    #[tokio::test]
    async fn point_cache_joins_by_row_key() {
        let store = Arc::new(DocumentStore::in_memory().await.unwrap());
        let repo = PointPredictionCacheRepository::new(store, &LeagueConfig::nba());
        let docs = vec![PointPredictionDoc {
            model_id: "points_model_r1".into(),
            game_id: "g1".into(),
            pred_home_points: Some(112.0),
            pred_away_points: Some(105.0),
            pred_margin: None,
            year: 2024,
            month: 1,
            day: 5,
            home_team: "BOS".into(),
            away_team: "NYK".into(),
        }];
        assert_eq!(repo.cache_predictions(&docs, json!({})).await.unwrap(), 1);
        let margins = repo.margins_by_row_key("points_model_r1").await.unwrap();
        assert!((margins["2024-1-5-BOS-NYK"] - 7.0).abs() < 1e-9);
        assert!(repo.margins_by_row_key("missing").await.is_err());
    }

    #[tokio::test]
    async fn snapshots_are_immutable_copies() {
        let store = Arc::new(DocumentStore::in_memory().await.unwrap());
        let cfg = LeagueConfig::nba();
        let predictions = PredictionRepository::new(Arc::clone(&store), &cfg);
        let snapshots = SnapshotRepository::new(store, &cfg);
        let doc = PredictionDoc {
            game_id: "g1".into(),
            home_win_prob: 61.0,
            away_win_prob: 39.0,
            predicted_winner: "BOS".into(),
            features_dict: HashMap::new(),
            base_outputs: HashMap::new(),
            meta_feature_values: HashMap::new(),
            config_id: None,
            created_at: Utc::now().to_rfc3339(),
        };
        predictions.upsert(&doc).await.unwrap();
        let snap = snapshots.snapshot(&doc, Some("what-if".into())).await.unwrap();
        let loaded = snapshots.get(&snap.snapshot_id).await.unwrap().unwrap();
        assert_eq!(loaded.prediction.home_win_prob, 61.0);
        assert_eq!(loaded.game_id, "g1");
    }
}
