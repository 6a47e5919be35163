//! Per-matchup shared context and TTL caches

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use courtside_types::{LeagueConfig, Result};

use crate::hashing::stable_hash;
use crate::store::DocumentStore;

/// One append-only entry in the shared-context history: an agent output or
/// a batch of tool calls, timestamped in workflow order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub agent: String,
    #[serde(default)]
    pub system: String,
    #[serde(default)]
    pub tools: Vec<Value>,
    #[serde(default)]
    pub output: Option<String>,
    pub timestamp: String,
}

/// Per-matchup shared context storage. The document keeps baseline fields
/// (game metadata, ensemble anchor, market snapshot) plus the history
/// stack and the latest output per agent.
#[derive(Clone)]
pub struct SharedContextRepository {
    store: Arc<DocumentStore>,
    collection: String,
}

impl SharedContextRepository {
    pub fn new(store: Arc<DocumentStore>, cfg: &LeagueConfig) -> Self {
        Self {
            store,
            collection: cfg.collection("matchup_shared_context"),
        }
    }

    pub async fn get(&self, game_id: &str) -> Result<Option<Value>> {
        self.store.get(&self.collection, game_id).await
    }

    /// Create the document with empty history if it does not exist.
    pub async fn ensure_initialized(&self, game_id: &str) -> Result<Value> {
        if let Some(existing) = self.get(game_id).await? {
            return Ok(existing);
        }
        let doc = json!({
            "game_id": game_id,
            "history": [],
            "latest_by_agent": {},
        });
        self.store.put(&self.collection, game_id, &doc).await?;
        Ok(doc)
    }

    /// Merge baseline fields into the document. Baseline fields are
    /// read-through; agents never rewrite them.
    pub async fn update_fields(&self, game_id: &str, fields: &Value) -> Result<()> {
        self.store.merge(&self.collection, game_id, fields).await
    }

    /// Append a history entry and refresh `latest_by_agent` when the entry
    /// carries an agent output.
    pub async fn append_history(&self, game_id: &str, entry: &HistoryEntry) -> Result<()> {
        let mut doc = self.ensure_initialized(game_id).await?;
        let entry_value = serde_json::to_value(entry)?;
        if let Some(obj) = doc.as_object_mut() {
            match obj.get_mut("history") {
                Some(Value::Array(history)) => history.push(entry_value),
                _ => {
                    obj.insert("history".to_string(), json!([entry_value]));
                }
            }
            if let Some(output) = &entry.output {
                let latest = obj
                    .entry("latest_by_agent")
                    .or_insert_with(|| json!({}));
                if let Some(map) = latest.as_object_mut() {
                    map.insert(entry.agent.clone(), json!(output));
                }
            }
        }
        self.store.put(&self.collection, game_id, &doc).await
    }
}

/// TTL'd cache over deterministic DB-backed tool calls, keyed by
/// (game, tool, canonical args).
#[derive(Clone)]
pub struct ToolCacheRepository {
    store: Arc<DocumentStore>,
    collection: String,
    ttl_seconds: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    value: Value,
    expires_at: i64,
}

impl ToolCacheRepository {
    pub fn new(store: Arc<DocumentStore>, cfg: &LeagueConfig, ttl_seconds: i64) -> Self {
        Self {
            store,
            collection: cfg.collection("tool_cache"),
            ttl_seconds,
        }
    }

    fn key(game_id: &str, tool: &str, args: &Value) -> String {
        stable_hash(&json!({ "game_id": game_id, "tool": tool, "args": args }))
    }

    pub async fn get(&self, game_id: &str, tool: &str, args: &Value) -> Result<Option<Value>> {
        let key = Self::key(game_id, tool, args);
        match self.store.get_doc::<CacheEntry>(&self.collection, &key).await? {
            Some(entry) if entry.expires_at > Utc::now().timestamp() => Ok(Some(entry.value)),
            Some(_) => {
                self.store.delete(&self.collection, &key).await?;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    pub async fn set(&self, game_id: &str, tool: &str, args: &Value, value: &Value) -> Result<()> {
        let key = Self::key(game_id, tool, args);
        let entry = CacheEntry {
            value: value.clone(),
            expires_at: Utc::now().timestamp() + self.ttl_seconds,
        };
        self.store.put_doc(&self.collection, &key, &entry).await
    }
}

/// TTL'd cache for news and web-search results, keyed by the normalized
/// query.
#[derive(Clone)]
pub struct NewsCacheRepository {
    store: Arc<DocumentStore>,
    collection: String,
    ttl_seconds: i64,
}

impl NewsCacheRepository {
    pub fn new(store: Arc<DocumentStore>, cfg: &LeagueConfig, ttl_seconds: i64) -> Self {
        Self {
            store,
            collection: cfg.collection("cached_news"),
            ttl_seconds,
        }
    }

    fn key(kind: &str, query: &str) -> String {
        stable_hash(&json!({ "kind": kind, "query": query.trim().to_lowercase() }))
    }

    pub async fn get(&self, kind: &str, query: &str) -> Result<Option<Value>> {
        let key = Self::key(kind, query);
        match self.store.get_doc::<CacheEntry>(&self.collection, &key).await? {
            Some(entry) if entry.expires_at > Utc::now().timestamp() => Ok(Some(entry.value)),
            _ => Ok(None),
        }
    }

    pub async fn set(&self, kind: &str, query: &str, value: &Value) -> Result<()> {
        let key = Self::key(kind, query);
        let entry = CacheEntry {
            value: value.clone(),
            expires_at: Utc::now().timestamp() + self.ttl_seconds,
        };
        self.store.put_doc(&self.collection, &key, &entry).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn history_appends_in_order_and_tracks_latest() {
        let store = Arc::new(DocumentStore::in_memory().await.unwrap());
        let repo = SharedContextRepository::new(store, &LeagueConfig::nba());
        repo.ensure_initialized("g1").await.unwrap();
        for (agent, output) in [("planner", "plan"), ("stats_agent", "stats v1"), ("stats_agent", "stats v2")] {
            repo.append_history(
                "g1",
                &HistoryEntry {
                    agent: agent.to_string(),
                    system: String::new(),
                    tools: Vec::new(),
                    output: Some(output.to_string()),
                    timestamp: Utc::now().to_rfc3339(),
                },
            )
            .await
            .unwrap();
        }
        let doc = repo.get("g1").await.unwrap().unwrap();
        assert_eq!(doc["history"].as_array().unwrap().len(), 3);
        assert_eq!(doc["latest_by_agent"]["stats_agent"], "stats v2");
        assert_eq!(doc["latest_by_agent"]["planner"], "plan");
    }

    #[tokio::test]
    async fn baseline_fields_merge_without_touching_history() {
        let store = Arc::new(DocumentStore::in_memory().await.unwrap());
        let repo = SharedContextRepository::new(store, &LeagueConfig::nba());
        repo.ensure_initialized("g1").await.unwrap();
        repo.append_history(
            "g1",
            &HistoryEntry {
                agent: "planner".into(),
                system: String::new(),
                tools: Vec::new(),
                output: Some("plan".into()),
                timestamp: Utc::now().to_rfc3339(),
            },
        )
        .await
        .unwrap();
        repo.update_fields("g1", &json!({"ensemble_model": {"p_home": 0.61}}))
            .await
            .unwrap();
        let doc = repo.get("g1").await.unwrap().unwrap();
        assert_eq!(doc["ensemble_model"]["p_home"], 0.61);
        assert_eq!(doc["history"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn tool_cache_hits_within_ttl() {
        let store = Arc::new(DocumentStore::in_memory().await.unwrap());
        let cache = ToolCacheRepository::new(store, &LeagueConfig::nba(), 3600);
        let args = json!({"team_id": "2", "window": "games10"});
        assert!(cache.get("g1", "get_team_stats", &args).await.unwrap().is_none());
        cache
            .set("g1", "get_team_stats", &args, &json!({"wins": 5}))
            .await
            .unwrap();
        let hit = cache.get("g1", "get_team_stats", &args).await.unwrap().unwrap();
        assert_eq!(hit["wins"], 5);
        // A different game misses.
        assert!(cache.get("g2", "get_team_stats", &args).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn tool_cache_expires() {
        let store = Arc::new(DocumentStore::in_memory().await.unwrap());
        let cache = ToolCacheRepository::new(store, &LeagueConfig::nba(), -1);
        let args = json!({});
        cache.set("g1", "t", &args, &json!(1)).await.unwrap();
        assert!(cache.get("g1", "t", &args).await.unwrap().is_none());
    }
}
