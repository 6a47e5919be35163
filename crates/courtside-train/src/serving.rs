//! Serving services
//!
//! `PredictionService` runs the selected ensemble for one game through the
//! same feature catalog used during training and persists the prediction;
//! `LineupService` reconstructs starting lineups (live when upstream data
//! is available, projected from recent games otherwise) and can sync them
//! back into the roster collection.

use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use courtside_core::ml::{Classifier, StandardScaler};
use courtside_infra::artifacts::{ArtifactStore, EnsembleConfigFile};
use courtside_infra::espn::EspnClient;
use courtside_infra::loader::ContextLoader;
use courtside_infra::repos::{
    ConfigRepository, GameRepository, PlayerStatRepository, PredictionDoc, PredictionRepository,
    RosterRepository, SnapshotDoc, SnapshotRepository,
};
use courtside_infra::store::DocumentStore;
use courtside_types::{CourtsideError, LeagueConfig, Result};

use courtside_core::games::Game;

const PROJECTED_WINDOW_GAMES: usize = 10;

/// One side's reconstructed lineup.
#[derive(Debug, Clone, Default)]
pub struct TeamLineups {
    pub starters: Vec<String>,
    pub bench: Vec<String>,
    pub inactive: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct GameLineups {
    pub home: TeamLineups,
    pub away: TeamLineups,
    /// "live" or "projected".
    pub source: String,
}

pub struct LineupService {
    games: GameRepository,
    rosters: RosterRepository,
    player_stats: PlayerStatRepository,
    espn: Option<EspnClient>,
}

impl LineupService {
    pub fn new(store: Arc<DocumentStore>, cfg: &LeagueConfig, espn: Option<EspnClient>) -> Self {
        Self {
            games: GameRepository::new(Arc::clone(&store), cfg),
            rosters: RosterRepository::new(Arc::clone(&store), cfg),
            player_stats: PlayerStatRepository::new(store, cfg),
            espn,
        }
    }

    pub async fn get_game_lineups(&self, game_id: &str) -> Result<GameLineups> {
        let game = self.games.require(game_id).await?;
        if let Some(espn) = &self.espn {
            if let Some(summary) = espn.try_game_summary(game_id).await {
                if let Some(live) = Self::parse_live_lineups(&summary) {
                    return Ok(live);
                }
            }
        }
        self.projected_lineups(&game).await
    }

    /// Parse an upstream summary document: `rosters[].homeAway` plus
    /// athlete entries with `starter` / `didNotPlay` flags.
    fn parse_live_lineups(summary: &Value) -> Option<GameLineups> {
        let rosters = summary.get("rosters")?.as_array()?;
        let mut home = TeamLineups::default();
        let mut away = TeamLineups::default();
        for roster in rosters {
            let side = roster.get("homeAway")?.as_str()?;
            let target = if side == "home" { &mut home } else { &mut away };
            let athletes = roster.get("roster").or_else(|| roster.get("athletes"))?.as_array()?;
            for athlete in athletes {
                let id = athlete
                    .get("athlete")
                    .and_then(|a| a.get("id"))
                    .or_else(|| athlete.get("id"))?
                    .as_str()
                    .map(|s| s.to_string())
                    .or_else(|| athlete.get("id").and_then(|v| v.as_i64()).map(|v| v.to_string()))?;
                let starter = athlete.get("starter").and_then(|v| v.as_bool()).unwrap_or(false);
                let dnp = athlete.get("didNotPlay").and_then(|v| v.as_bool()).unwrap_or(false);
                if starter {
                    target.starters.push(id);
                } else if dnp {
                    target.inactive.push(id);
                } else {
                    target.bench.push(id);
                }
            }
        }
        if home.starters.is_empty() && away.starters.is_empty() {
            return None;
        }
        Some(GameLineups {
            home,
            away,
            source: "live".to_string(),
        })
    }

    /// Projected lineup from the last N games: the five most frequent
    /// starters start, everyone else who played recently sits on the
    /// bench, roster-flagged injuries are inactive.
    async fn projected_lineups(&self, game: &Game) -> Result<GameLineups> {
        let all_lines = self.player_stats.list_all().await?;
        let mut out = GameLineups {
            home: TeamLineups::default(),
            away: TeamLineups::default(),
            source: "projected".to_string(),
        };

        for (team, target) in [
            (game.home.name.clone(), &mut out.home),
            (game.away.name.clone(), &mut out.away),
        ] {
            let mut team_lines: Vec<_> = all_lines
                .iter()
                .filter(|l| l.team == team && l.season == game.season && l.date < game.date && l.played())
                .collect();
            team_lines.sort_by_key(|l| std::cmp::Reverse(l.date.key()));

            // Restrict to the trailing window of distinct game dates.
            let mut dates: Vec<i64> = team_lines.iter().map(|l| l.date.key()).collect();
            dates.dedup();
            let cutoff = dates
                .get(PROJECTED_WINDOW_GAMES.saturating_sub(1))
                .copied()
                .unwrap_or(i64::MIN);

            let mut starter_counts: HashMap<&str, (usize, f64)> = HashMap::new();
            let mut seen: Vec<&str> = Vec::new();
            for line in team_lines.iter().filter(|l| l.date.key() >= cutoff) {
                let entry = starter_counts.entry(&line.player_id).or_insert((0, 0.0));
                if line.starter {
                    entry.0 += 1;
                }
                entry.1 += line.minutes;
                if !seen.contains(&line.player_id.as_str()) {
                    seen.push(line.player_id.as_str());
                }
            }
            let mut ranked: Vec<&str> = seen.clone();
            ranked.sort_by(|a, b| {
                let (sa, ma) = starter_counts[*a];
                let (sb, mb) = starter_counts[*b];
                sb.cmp(&sa).then(
                    mb.partial_cmp(&ma).unwrap_or(std::cmp::Ordering::Equal),
                )
            });

            let injured: Vec<String> = match self.rosters.get(&team, &game.season).await? {
                Some(roster) => roster.injured_player_ids(),
                None => Vec::new(),
            };

            for player in ranked {
                let id = player.to_string();
                if injured.contains(&id) {
                    target.inactive.push(id);
                } else if target.starters.len() < 5 {
                    target.starters.push(id);
                } else {
                    target.bench.push(id);
                }
            }
        }
        Ok(out)
    }

    /// Write the lineup back into the roster collection, updating each
    /// entry's starter/injured flags.
    pub async fn sync_to_rosters(&self, game_id: &str, lineups: &GameLineups) -> Result<()> {
        let game = self.games.require(game_id).await?;
        self.rosters
            .sync_lineup(
                &game.home.name,
                &game.season,
                &lineups.home.starters,
                &lineups.home.inactive,
            )
            .await?;
        self.rosters
            .sync_lineup(
                &game.away.name,
                &game.season,
                &lineups.away.starters,
                &lineups.away.inactive,
            )
            .await
    }
}

/// Runs the selected ensemble for a single game.
pub struct PredictionService {
    store: Arc<DocumentStore>,
    cfg: LeagueConfig,
    configs: ConfigRepository,
    artifacts: ArtifactStore,
    games: GameRepository,
    rosters: RosterRepository,
    predictions: PredictionRepository,
    snapshots: SnapshotRepository,
}

impl PredictionService {
    pub fn new(store: Arc<DocumentStore>, cfg: LeagueConfig, artifact_root: std::path::PathBuf) -> Self {
        Self {
            configs: ConfigRepository::classifier(Arc::clone(&store), &cfg),
            artifacts: ArtifactStore::new(artifact_root),
            games: GameRepository::new(Arc::clone(&store), &cfg),
            rosters: RosterRepository::new(Arc::clone(&store), &cfg),
            predictions: PredictionRepository::new(Arc::clone(&store), &cfg),
            snapshots: SnapshotRepository::new(Arc::clone(&store), &cfg),
            store,
            cfg,
        }
    }

    async fn load_base(
        &self,
        config_id: &str,
    ) -> Result<(Classifier, Option<StandardScaler>, Vec<String>)> {
        let doc = self.configs.require(config_id).await?;
        if let (Some(model), Some(scaler), Some(features)) = (
            doc.model_artifact_path.as_ref(),
            doc.scaler_artifact_path.as_ref(),
            doc.features_path.as_ref(),
        ) {
            return ArtifactStore::load_classifier_from_paths(
                std::path::Path::new(model),
                std::path::Path::new(scaler),
                std::path::Path::new(features),
            );
        }
        match &doc.run_id {
            Some(run_id) => self.artifacts.load_classifier(run_id),
            None => Err(CourtsideError::DataMissing(format!(
                "base model {} has no artifacts recorded",
                config_id
            ))),
        }
    }

    /// Regenerate the expected meta-column list from the base short names
    /// and ensemble flags; it must match the persisted column list.
    fn expected_meta_columns(shorts: &[String], config: &EnsembleConfigFile) -> Vec<String> {
        let mut cols: Vec<String> = shorts.iter().map(|s| format!("p_{}", s)).collect();
        if config.stacking_mode == "informed" {
            if config.use_disagree {
                for i in 0..shorts.len() {
                    for j in (i + 1)..shorts.len() {
                        cols.push(format!("disagree_{}_{}", shorts[i], shorts[j]));
                    }
                }
            }
            if config.use_conf {
                for short in shorts {
                    cols.push(format!("conf_{}", short));
                }
            }
            cols.extend(config.meta_features.iter().cloned());
        }
        cols
    }

    /// Run the selected ensemble for `game_id` and upsert the prediction
    /// document.
    pub async fn predict_game(&self, game_id: &str) -> Result<PredictionDoc> {
        let selected = self.configs.selected().await?.ok_or_else(|| {
            CourtsideError::Config("no selected classifier config; select an ensemble first".to_string())
        })?;
        if !selected.ensemble {
            return Err(CourtsideError::Config(format!(
                "selected config {} is not an ensemble",
                selected.config_id
            )));
        }
        let ensemble_run_id = selected.run_id.clone().ok_or_else(|| {
            CourtsideError::Config(format!(
                "selected ensemble {} has no training run recorded",
                selected.config_id
            ))
        })?;
        let (meta_model, ensemble_config) = self.artifacts.load_ensemble(&ensemble_run_id)?;

        let mut bases = Vec::new();
        for config_id in &ensemble_config.base_model_ids {
            bases.push(self.load_base(config_id).await?);
        }

        // The persisted p_* columns carry the base short names in base
        // order.
        let shorts: Vec<String> = ensemble_config
            .meta_feature_cols
            .iter()
            .filter(|c| c.starts_with("p_"))
            .map(|c| c.trim_start_matches("p_").to_string())
            .collect();
        if shorts.len() != bases.len() {
            return Err(CourtsideError::Config(format!(
                "ensemble {} lists {} base columns but {} base models",
                ensemble_run_id,
                shorts.len(),
                bases.len()
            )));
        }
        let expected = Self::expected_meta_columns(&shorts, &ensemble_config);
        if expected != ensemble_config.meta_feature_cols {
            return Err(CourtsideError::Config(format!(
                "ensemble {} meta columns do not match its flags (expected {:?})",
                ensemble_run_id, expected
            )));
        }

        let game = self.games.require(game_id).await?;

        // The feature vector is assembled through the training catalog:
        // the union of every base's feature subset.
        let mut union: std::collections::BTreeSet<String> = bases
            .iter()
            .flat_map(|(_, _, names)| names.iter().cloned())
            .collect();
        union.extend(ensemble_config.meta_features.iter().cloned());
        let feature_names: Vec<String> = union.into_iter().collect();

        let loader = ContextLoader::new(Arc::clone(&self.store), self.cfg.clone());
        let ctx = loader.load(feature_names.clone(), None).await?;

        // Serving-time injuries come from the roster flags.
        let mut injured: HashMap<String, Vec<String>> = HashMap::new();
        for team in [&game.home.name, &game.away.name] {
            if let Some(roster) = self.rosters.get(team, &game.season).await? {
                injured.insert(team.clone(), roster.injured_player_ids());
            }
        }
        let features = ctx.calculate_features_with_injuries(
            &game.home.name,
            &game.away.name,
            &game.season,
            &game.date,
            Some(game_id),
            game.venue_guid.as_deref(),
            None,
            Some(&injured),
        );

        let mut base_outputs: HashMap<String, f64> = HashMap::new();
        let mut probs: Vec<f64> = Vec::new();
        for ((model, scaler, names), short) in bases.iter().zip(&shorts) {
            let row: Vec<f64> = names
                .iter()
                .map(|n| features.get(n).copied().unwrap_or(0.0))
                .collect();
            let scaled = match scaler {
                Some(scaler) => {
                    if scaler.n_features() != row.len() {
                        return Err(CourtsideError::Config(format!(
                            "base {} scaler expects {} features but got {}",
                            short,
                            scaler.n_features(),
                            row.len()
                        )));
                    }
                    vec![scaler.transform_row(&row)]
                }
                None => vec![row],
            };
            let p = model.predict_proba(&scaled)[0];
            base_outputs.insert(format!("p_{}", short), p);
            probs.push(p);
        }

        // Meta vector in persisted column order.
        let mut meta_values: HashMap<String, f64> = base_outputs.clone();
        if ensemble_config.stacking_mode == "informed" {
            if ensemble_config.use_disagree {
                for i in 0..shorts.len() {
                    for j in (i + 1)..shorts.len() {
                        meta_values.insert(
                            format!("disagree_{}_{}", shorts[i], shorts[j]),
                            (probs[i] - probs[j]).abs(),
                        );
                    }
                }
            }
            if ensemble_config.use_conf {
                for (short, p) in shorts.iter().zip(&probs) {
                    meta_values.insert(format!("conf_{}", short), (p - 0.5).abs());
                }
            }
            for feature in &ensemble_config.meta_features {
                meta_values.insert(
                    feature.clone(),
                    features.get(feature).copied().unwrap_or(0.0),
                );
            }
        }
        let meta_row: Vec<f64> = ensemble_config
            .meta_feature_cols
            .iter()
            .map(|c| meta_values.get(c).copied().unwrap_or(0.0))
            .collect();
        let p_home = meta_model.predict_proba(&[meta_row])[0];

        let home_win_prob = (p_home * 1000.0).round() / 10.0;
        let away_win_prob = ((1.0 - p_home) * 1000.0).round() / 10.0;
        let doc = PredictionDoc {
            game_id: game_id.to_string(),
            home_win_prob,
            away_win_prob,
            predicted_winner: if p_home >= 0.5 {
                game.home.name.clone()
            } else {
                game.away.name.clone()
            },
            features_dict: features,
            base_outputs,
            meta_feature_values: meta_values,
            config_id: Some(selected.config_id.clone()),
            created_at: Utc::now().to_rfc3339(),
        };
        self.predictions.upsert(&doc).await?;
        tracing::info!(game_id, home_win_prob, "prediction persisted");
        Ok(doc)
    }

    /// Predict and capture an immutable scenario snapshot (used after a
    /// roster perturbation).
    pub async fn predict_and_snapshot(
        &self,
        game_id: &str,
        note: Option<String>,
    ) -> Result<(PredictionDoc, SnapshotDoc)> {
        let prediction = self.predict_game(game_id).await?;
        let snapshot = self.snapshots.snapshot(&prediction, note).await?;
        Ok((prediction, snapshot))
    }

    pub async fn get_prediction(&self, game_id: &str) -> Result<Option<PredictionDoc>> {
        self.predictions.get(game_id).await
    }
}
