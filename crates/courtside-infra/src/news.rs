//! News and web-search client
//!
//! Deterministic given store state: every query goes through the TTL'd
//! news cache unless `force_refresh` is set; upstream failures degrade to
//! empty result lists.

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use courtside_types::{CourtsideError, LeagueConfig, Result};

use crate::repos::NewsCacheRepository;
use crate::store::DocumentStore;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_NEWS_TTL_SECONDS: i64 = 12 * 60 * 60;

/// Search backend configuration. When no endpoint is configured the client
/// serves cache hits only and returns empty results otherwise.
#[derive(Debug, Clone, Default)]
pub struct SearchBackend {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
}

pub struct NewsClient {
    http: reqwest::Client,
    cache: NewsCacheRepository,
    backend: SearchBackend,
    league_id: String,
}

impl NewsClient {
    pub fn new(store: Arc<DocumentStore>, cfg: &LeagueConfig, backend: SearchBackend) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| CourtsideError::Http(format!("client build failed: {}", e)))?;
        Ok(Self {
            http,
            cache: NewsCacheRepository::new(store, cfg, DEFAULT_NEWS_TTL_SECONDS),
            backend,
            league_id: cfg.league_id.clone(),
        })
    }

    async fn search_upstream(&self, query: &str, num_results: usize) -> Vec<Value> {
        let endpoint = match &self.backend.endpoint {
            Some(e) => e.clone(),
            None => return Vec::new(),
        };
        let mut request = self
            .http
            .get(&endpoint)
            .query(&[("q", query), ("num", &num_results.to_string())]);
        if let Some(key) = &self.backend.api_key {
            request = request.query(&[("api_key", key.as_str())]);
        }
        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(query, error = %e, "web search failed");
                return Vec::new();
            }
        };
        let body: Value = match response.json().await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(query, error = %e, "web search returned bad json");
                return Vec::new();
            }
        };
        body.get("organic_results")
            .or_else(|| body.get("results"))
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .take(num_results)
                    .map(|item| {
                        json!({
                            "title": item.get("title").cloned().unwrap_or(Value::Null),
                            "link": item.get("link").or_else(|| item.get("url")).cloned().unwrap_or(Value::Null),
                            "snippet": item.get("snippet").cloned().unwrap_or(Value::Null),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Cached search; `force_refresh` bypasses the TTL cache.
    pub async fn search(
        &self,
        kind: &str,
        query: &str,
        num_results: usize,
        force_refresh: bool,
    ) -> Result<Value> {
        if !force_refresh {
            if let Some(hit) = self.cache.get(kind, query).await? {
                return Ok(hit);
            }
        }
        let results = self.search_upstream(query, num_results).await;
        let payload = json!({
            "query": query,
            "results": results,
        });
        self.cache.set(kind, query, &payload).await?;
        Ok(payload)
    }

    pub async fn game_news(&self, matchup_label: &str, force_refresh: bool) -> Result<Value> {
        let query = format!("{} {} news injuries", self.league_id, matchup_label);
        self.search("game_news", &query, 5, force_refresh).await
    }

    pub async fn team_news(&self, team_name: &str, force_refresh: bool) -> Result<Value> {
        let query = format!("{} {} news injury report", self.league_id, team_name);
        self.search("team_news", &query, 5, force_refresh).await
    }

    pub async fn player_news(&self, player_name: &str, force_refresh: bool) -> Result<Value> {
        let query = format!("{} {} status news", self.league_id, player_name);
        self.search("player_news", &query, 5, force_refresh).await
    }

    pub async fn web_search(
        &self,
        query: &str,
        num_results: usize,
        force_refresh: bool,
    ) -> Result<Value> {
        self.search("web_search", query, num_results, force_refresh)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_backend_degrades_to_empty_results() {
        let store = Arc::new(DocumentStore::in_memory().await.unwrap());
        let cfg = LeagueConfig::nba();
        let client = NewsClient::new(store, &cfg, SearchBackend::default()).unwrap();
        let out = client.web_search("celtics injury", 5, false).await.unwrap();
        assert_eq!(out["results"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn second_call_is_served_from_cache() {
        let store = Arc::new(DocumentStore::in_memory().await.unwrap());
        let cfg = LeagueConfig::nba();
        let client = NewsClient::new(store, &cfg, SearchBackend::default()).unwrap();
        let first = client.team_news("Celtics", false).await.unwrap();
        let second = client.team_news("Celtics", false).await.unwrap();
        assert_eq!(first, second);
    }
}
