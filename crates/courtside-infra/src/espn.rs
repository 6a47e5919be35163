//! Upstream sports-data client
//!
//! Read-only HTTP access to scoreboard, game summary, and venue endpoints
//! resolved from the league's endpoint templates. Best-effort: failures
//! degrade to `None` and are logged, never propagated into the feature or
//! conversation paths.

use serde_json::Value;
use std::time::Duration;

use courtside_types::{CourtsideError, GameDate, LeagueConfig, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct EspnClient {
    http: reqwest::Client,
    cfg: LeagueConfig,
}

impl EspnClient {
    pub fn new(cfg: LeagueConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| CourtsideError::Http(format!("client build failed: {}", e)))?;
        Ok(Self { http, cfg })
    }

    async fn get_json(&self, url: &str) -> Result<Value> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| CourtsideError::Http(format!("GET {} failed: {}", url, e)))?;
        if !response.status().is_success() {
            return Err(CourtsideError::Http(format!(
                "GET {} returned {}",
                url,
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| CourtsideError::Http(format!("GET {} bad json: {}", url, e)))
    }

    pub async fn scoreboard(&self, date: &GameDate) -> Result<Value> {
        let compact = format!("{:04}{:02}{:02}", date.year, date.month, date.day);
        let url = self.cfg.espn.scoreboard_url.replace("{date}", &compact);
        self.get_json(&url).await
    }

    pub async fn game_summary(&self, game_id: &str) -> Result<Value> {
        let url = self.cfg.espn.summary_url.replace("{game_id}", game_id);
        self.get_json(&url).await
    }

    pub async fn venue(&self, venue_id: &str) -> Result<Value> {
        let url = self.cfg.espn.venue_url.replace("{venue_id}", venue_id);
        self.get_json(&url).await
    }

    /// Best-effort summary fetch for serving paths: logs and returns None
    /// on any failure.
    pub async fn try_game_summary(&self, game_id: &str) -> Option<Value> {
        match self.game_summary(game_id).await {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(game_id, error = %e, "game summary fetch failed");
                None
            }
        }
    }
}
