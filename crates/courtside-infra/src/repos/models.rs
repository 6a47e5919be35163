//! Run tracking and model-config repositories
//!
//! Configs are deduplicated by a stable hash over training-affecting
//! fields; runs transition at most once from `running` to a terminal
//! state.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use courtside_types::{CourtsideError, LeagueConfig, Result};

use crate::hashing::stable_hash;
use crate::store::DocumentStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Created,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

/// One training execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunDoc {
    pub run_id: String,
    pub config: Value,
    pub dataset_id: Option<String>,
    pub model_type: String,
    pub status: RunStatus,
    #[serde(default)]
    pub metrics: Value,
    #[serde(default)]
    pub diagnostics: Value,
    #[serde(default)]
    pub artifacts: Value,
    pub session_id: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Fields an update may change on a run.
#[derive(Debug, Default, Clone)]
pub struct RunUpdate {
    pub status: Option<RunStatus>,
    pub metrics: Option<Value>,
    pub diagnostics: Option<Value>,
    pub artifacts: Option<Value>,
}

/// Experiment-run persistence.
#[derive(Clone)]
pub struct RunRepository {
    store: Arc<DocumentStore>,
    collection: String,
}

impl RunRepository {
    pub fn new(store: Arc<DocumentStore>, cfg: &LeagueConfig) -> Self {
        Self {
            store,
            collection: cfg.collection("experiment_runs"),
        }
    }

    pub async fn create_run(
        &self,
        config: Value,
        dataset_id: Option<String>,
        model_type: &str,
        session_id: &str,
    ) -> Result<String> {
        let run_id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let doc = RunDoc {
            run_id: run_id.clone(),
            config,
            dataset_id,
            model_type: model_type.to_string(),
            status: RunStatus::Created,
            metrics: Value::Null,
            diagnostics: Value::Null,
            artifacts: Value::Null,
            session_id: session_id.to_string(),
            created_at: now.clone(),
            updated_at: now,
        };
        self.store.put_doc(&self.collection, &run_id, &doc).await?;
        Ok(run_id)
    }

    pub async fn get_run(&self, run_id: &str) -> Result<Option<RunDoc>> {
        self.store.get_doc(&self.collection, run_id).await
    }

    /// Apply an update. A run already in a terminal state rejects any
    /// further status change.
    pub async fn update_run(&self, run_id: &str, update: RunUpdate) -> Result<RunDoc> {
        let mut doc: RunDoc = self
            .get_run(run_id)
            .await?
            .ok_or_else(|| CourtsideError::NotFound(format!("run {}", run_id)))?;
        if let Some(status) = update.status {
            if doc.status.is_terminal() && status != doc.status {
                return Err(CourtsideError::Run(format!(
                    "run {} is already {:?} and cannot transition to {:?}",
                    run_id, doc.status, status
                )));
            }
            doc.status = status;
        }
        if let Some(metrics) = update.metrics {
            doc.metrics = metrics;
        }
        if let Some(diagnostics) = update.diagnostics {
            doc.diagnostics = diagnostics;
        }
        if let Some(artifacts) = update.artifacts {
            doc.artifacts = artifacts;
        }
        doc.updated_at = Utc::now().to_rfc3339();
        self.store.put_doc(&self.collection, run_id, &doc).await?;
        Ok(doc)
    }

    pub async fn list_for_session(&self, session_id: &str) -> Result<Vec<RunDoc>> {
        Ok(self
            .store
            .list_docs::<RunDoc>(&self.collection)
            .await?
            .into_iter()
            .filter(|r| r.session_id == session_id)
            .collect())
    }
}

/// A deduplicated, hashable description of a trainable model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfigDoc {
    /// Stable hash over training-affecting fields.
    pub config_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub selected: bool,
    #[serde(default)]
    pub ensemble: bool,
    /// Training-affecting configuration (hashed).
    pub config: Value,
    pub model_type: String,
    #[serde(default)]
    pub run_id: Option<String>,
    /// Ordered base config ids, for ensemble configs.
    #[serde(default)]
    pub base_config_ids: Vec<String>,
    #[serde(default)]
    pub model_artifact_path: Option<String>,
    #[serde(default)]
    pub scaler_artifact_path: Option<String>,
    #[serde(default)]
    pub features_path: Option<String>,
    #[serde(default)]
    pub ensemble_config_path: Option<String>,
    #[serde(default)]
    pub training_csv: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Config repository for one config collection (classifier or points).
#[derive(Clone)]
pub struct ConfigRepository {
    store: Arc<DocumentStore>,
    collection: String,
}

impl ConfigRepository {
    pub fn classifier(store: Arc<DocumentStore>, cfg: &LeagueConfig) -> Self {
        Self {
            store,
            collection: cfg.collection("model_config"),
        }
    }

    pub fn points(store: Arc<DocumentStore>, cfg: &LeagueConfig) -> Self {
        Self {
            store,
            collection: cfg.collection("model_config_points"),
        }
    }

    /// Stable id for a training-affecting config value.
    pub fn config_hash(config: &Value) -> String {
        stable_hash(config)
    }

    /// Insert or return the existing doc with the same hash. On a
    /// duplicate, the run id is re-linked and non-training fields update
    /// freely; the stored config itself never changes.
    pub async fn upsert(
        &self,
        config: Value,
        model_type: &str,
        name: Option<String>,
        run_id: Option<String>,
    ) -> Result<ModelConfigDoc> {
        let config_id = Self::config_hash(&config);
        let now = Utc::now().to_rfc3339();
        let mut doc = match self.get(&config_id).await? {
            Some(existing) => existing,
            None => ModelConfigDoc {
                config_id: config_id.clone(),
                name: None,
                selected: false,
                ensemble: false,
                config,
                model_type: model_type.to_string(),
                run_id: None,
                base_config_ids: Vec::new(),
                model_artifact_path: None,
                scaler_artifact_path: None,
                features_path: None,
                ensemble_config_path: None,
                training_csv: None,
                created_at: now.clone(),
                updated_at: now.clone(),
            },
        };
        if let Some(name) = name {
            doc.name = Some(name);
        }
        if run_id.is_some() {
            doc.run_id = run_id;
        }
        doc.updated_at = now;
        self.store.put_doc(&self.collection, &config_id, &doc).await?;
        Ok(doc)
    }

    pub async fn save(&self, doc: &ModelConfigDoc) -> Result<()> {
        self.store
            .put_doc(&self.collection, &doc.config_id, doc)
            .await
    }

    pub async fn get(&self, config_id: &str) -> Result<Option<ModelConfigDoc>> {
        self.store.get_doc(&self.collection, config_id).await
    }

    pub async fn require(&self, config_id: &str) -> Result<ModelConfigDoc> {
        self.get(config_id)
            .await?
            .ok_or_else(|| CourtsideError::NotFound(format!("model config {}", config_id)))
    }

    pub async fn list(&self) -> Result<Vec<ModelConfigDoc>> {
        self.store.list_docs(&self.collection).await
    }

    pub async fn selected(&self) -> Result<Option<ModelConfigDoc>> {
        Ok(self.list().await?.into_iter().find(|c| c.selected))
    }

    /// Mark one config selected, unsetting every other selected doc in the
    /// collection. Not transactional; a re-toggle repairs any partial
    /// state.
    pub async fn set_selected(&self, config_id: &str) -> Result<ModelConfigDoc> {
        let target = self.require(config_id).await?;
        for mut doc in self.list().await? {
            if doc.selected && doc.config_id != config_id {
                doc.selected = false;
                doc.updated_at = Utc::now().to_rfc3339();
                self.save(&doc).await?;
            }
        }
        let mut target = target;
        target.selected = true;
        target.updated_at = Utc::now().to_rfc3339();
        self.save(&target).await?;
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn repo() -> ConfigRepository {
        let store = Arc::new(DocumentStore::in_memory().await.unwrap());
        ConfigRepository::classifier(store, &LeagueConfig::nba())
    }

    #[tokio::test]
    async fn upsert_dedupes_by_hash() {
        let repo = repo().await;
        let a = repo
            .upsert(json!({"model": "LR", "begin_year": 2012}), "LogisticRegression", None, Some("r1".into()))
            .await
            .unwrap();
        let b = repo
            .upsert(json!({"begin_year": 2012, "model": "LR"}), "LogisticRegression", Some("my lr".into()), Some("r2".into()))
            .await
            .unwrap();
        assert_eq!(a.config_id, b.config_id);
        assert_eq!(repo.list().await.unwrap().len(), 1);
        // Run id re-linked, name updated freely.
        assert_eq!(b.run_id.as_deref(), Some("r2"));
        assert_eq!(b.name.as_deref(), Some("my lr"));
    }

    #[tokio::test]
    async fn exactly_one_selected() {
        let repo = repo().await;
        let a = repo
            .upsert(json!({"m": 1}), "LogisticRegression", None, None)
            .await
            .unwrap();
        let b = repo
            .upsert(json!({"m": 2}), "GradientBoosting", None, None)
            .await
            .unwrap();
        repo.set_selected(&a.config_id).await.unwrap();
        repo.set_selected(&b.config_id).await.unwrap();
        let selected: Vec<_> = repo
            .list()
            .await
            .unwrap()
            .into_iter()
            .filter(|c| c.selected)
            .collect();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].config_id, b.config_id);
        // Idempotent re-toggle.
        repo.set_selected(&b.config_id).await.unwrap();
        assert_eq!(
            repo.selected().await.unwrap().unwrap().config_id,
            b.config_id
        );
    }

    #[tokio::test]
    async fn run_terminal_transition_is_single() {
        let store = Arc::new(DocumentStore::in_memory().await.unwrap());
        let runs = RunRepository::new(store, &LeagueConfig::nba());
        let run_id = runs
            .create_run(json!({"task": "binary_home_win"}), Some("d1".into()), "LogisticRegression", "s1")
            .await
            .unwrap();
        runs.update_run(
            &run_id,
            RunUpdate {
                status: Some(RunStatus::Running),
                ..RunUpdate::default()
            },
        )
        .await
        .unwrap();
        runs.update_run(
            &run_id,
            RunUpdate {
                status: Some(RunStatus::Completed),
                metrics: Some(json!({"accuracy_mean": 61.0})),
                ..RunUpdate::default()
            },
        )
        .await
        .unwrap();
        // completed -> failed is rejected.
        let err = runs
            .update_run(
                &run_id,
                RunUpdate {
                    status: Some(RunStatus::Failed),
                    ..RunUpdate::default()
                },
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("cannot transition"));
    }
}
