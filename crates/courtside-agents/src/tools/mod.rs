//! Agent tool contracts
//!
//! Every tool is declared with a name, description, and JSON argument
//! schema, and returns JSON-serializable output deterministic given store
//! state. Tool errors serialize as JSON error objects delivered to the
//! agent as a normal tool result.

pub mod experimenter;
pub mod inspector;
pub mod news;
pub mod stats;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

use courtside_core::games::{Game, GameIndex};
use courtside_core::per::PerCalculator;
use courtside_infra::espn::EspnClient;
use courtside_infra::news::{NewsClient, SearchBackend};
use courtside_infra::repos::{
    ConfigRepository, GameRepository, PlayerStatRepository, PredictionRepository, RosterRepository,
    SnapshotRepository, TeamRepository,
};
use courtside_infra::store::DocumentStore;
use courtside_train::{LineupService, PredictionService};
use courtside_types::{CourtsideError, LeagueConfig, Result};

use crate::llm::ToolSpec;

/// A callable matchup tool.
#[async_trait]
pub trait MatchupTool: Send + Sync {
    fn spec(&self) -> &ToolSpec;
    async fn invoke(&self, args: Value) -> Result<Value>;
}

type ToolHandler = Box<dyn Fn(Value) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Tool built from a name, schema, and async closure.
pub struct FnTool {
    spec: ToolSpec,
    handler: ToolHandler,
}

impl FnTool {
    pub fn new(
        name: &str,
        description: &str,
        parameters: Value,
        handler: ToolHandler,
    ) -> Arc<dyn MatchupTool> {
        Arc::new(Self {
            spec: ToolSpec {
                name: name.to_string(),
                description: description.to_string(),
                parameters,
            },
            handler,
        })
    }
}

#[async_trait]
impl MatchupTool for FnTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn invoke(&self, args: Value) -> Result<Value> {
        (self.handler)(args).await
    }
}

/// Required string argument.
pub(crate) fn arg_str(args: &Value, name: &str) -> Result<String> {
    args.get(name)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| CourtsideError::Tool(format!("missing required argument '{}'", name)))
}

pub(crate) fn arg_str_opt(args: &Value, name: &str) -> Option<String> {
    args.get(name).and_then(|v| v.as_str()).map(|s| s.to_string())
}

pub(crate) fn arg_bool(args: &Value, name: &str) -> bool {
    args.get(name).and_then(|v| v.as_bool()).unwrap_or(false)
}

/// Shared per-matchup dependencies every tool closes over. Bound to one
/// game and one database.
pub struct ToolContext {
    pub store: Arc<DocumentStore>,
    pub cfg: LeagueConfig,
    pub game_id: String,
    pub game: Game,
    pub games: GameRepository,
    pub teams: TeamRepository,
    pub rosters: RosterRepository,
    pub player_stats: PlayerStatRepository,
    pub configs: ConfigRepository,
    pub points_configs: ConfigRepository,
    pub predictions: PredictionRepository,
    pub snapshots: SnapshotRepository,
    pub news: NewsClient,
    pub prediction_service: PredictionService,
    pub lineup_service: LineupService,
    pub artifact_root: PathBuf,
    /// Lazily built player-rating state for rotation/advanced tools.
    per_state: Mutex<Option<Arc<PerCalculator>>>,
}

impl ToolContext {
    pub async fn new(
        store: Arc<DocumentStore>,
        cfg: LeagueConfig,
        game_id: &str,
        artifact_root: PathBuf,
        search_backend: SearchBackend,
        espn: Option<EspnClient>,
    ) -> Result<Arc<Self>> {
        let games = GameRepository::new(Arc::clone(&store), &cfg);
        let game = games.require(game_id).await?;
        let news = NewsClient::new(Arc::clone(&store), &cfg, search_backend)?;
        let prediction_service =
            PredictionService::new(Arc::clone(&store), cfg.clone(), artifact_root.clone());
        let lineup_service = LineupService::new(Arc::clone(&store), &cfg, espn);
        Ok(Arc::new(Self {
            games,
            teams: TeamRepository::new(Arc::clone(&store), &cfg),
            rosters: RosterRepository::new(Arc::clone(&store), &cfg),
            player_stats: PlayerStatRepository::new(Arc::clone(&store), &cfg),
            configs: ConfigRepository::classifier(Arc::clone(&store), &cfg),
            points_configs: ConfigRepository::points(Arc::clone(&store), &cfg),
            predictions: PredictionRepository::new(Arc::clone(&store), &cfg),
            snapshots: SnapshotRepository::new(Arc::clone(&store), &cfg),
            news,
            prediction_service,
            lineup_service,
            artifact_root,
            per_state: Mutex::new(None),
            game_id: game_id.to_string(),
            game,
            store,
            cfg,
        }))
    }

    /// Player-rating state for the matchup's corpus, built once per
    /// context on first use.
    pub async fn per_calculator(&self) -> Result<Arc<PerCalculator>> {
        let mut guard = self.per_state.lock().await;
        if let Some(per) = guard.as_ref() {
            return Ok(Arc::clone(per));
        }
        let games = self.games.list_all().await?;
        let lines = self.player_stats.list_all().await?;
        let index = GameIndex::build(games, &self.cfg);
        let per = Arc::new(PerCalculator::build(index.all_games(), lines, None));
        *guard = Some(Arc::clone(&per));
        Ok(per)
    }

    /// The identifiers this team may appear under in game documents.
    pub async fn team_keys(&self, team_id: &str) -> Result<Vec<String>> {
        self.teams.team_keys(team_id).await
    }
}
