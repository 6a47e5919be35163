//! Training-engine integration tests: classifier runs, stacking
//! compatibility, ensemble evaluation, and prediction serving.

use std::path::PathBuf;
use std::sync::Arc;

use courtside_core::catalog::CatalogOptions;
use courtside_core::games::{Game, TeamBox};
use courtside_core::ml::ClassifierKind;
use courtside_infra::master::{MasterOptions, MasterTableBuilder};
use courtside_infra::repos::{ConfigRepository, GameRepository, RunStatus};
use courtside_infra::store::DocumentStore;
use courtside_train::{
    ExperimentConfig, ExperimentRunner, PointsTarget, PredictionService, ScalerKind, SplitKind,
    SplitSpec, StackingMode, StackingParams, StackingTrainer, TaskKind,
};
use courtside_types::{GameDate, LeagueConfig};

const TEAMS: [&str; 4] = ["BOS", "NYK", "MIA", "PHI"];

fn team_box(name: &str, points: f64) -> TeamBox {
    TeamBox {
        name: name.to_string(),
        points,
        fg_made: points / 2.4,
        fg_att: points / 1.15,
        three_made: 10.0,
        three_att: 29.0,
        ft_made: 14.0,
        ft_att: 19.0,
        off_reb: 9.0,
        def_reb: 31.0,
        rebounds: 40.0,
        assists: 23.0,
        turnovers: 12.0,
        steals: 6.0,
        blocks: 4.0,
        fouls: 17.0,
        ..TeamBox::default()
    }
}

/// Four seasons of games (season start years 2021..=2024), winner
/// alternating so every season carries both classes.
fn corpus() -> Vec<Game> {
    let mut games = Vec::new();
    for season_start in 2021..=2024 {
        for day in 1..=20u32 {
            let home = TEAMS[(day as usize) % 4];
            let away = TEAMS[(day as usize + 1) % 4];
            let home_wins = (day + season_start as u32) % 2 == 0;
            let (hp, ap) = if home_wins { (112.0, 101.0) } else { (98.0, 109.0) };
            games.push(Game {
                game_id: format!("g{}-{}", season_start, day),
                date: GameDate::new(season_start, 11, day),
                season: format!("{}-{}", season_start, season_start + 1),
                home: team_box(home, hp),
                away: team_box(away, ap),
                home_won: Some(hp > ap),
                game_type: None,
                venue_guid: None,
            });
        }
    }
    games
}

struct Harness {
    store: Arc<DocumentStore>,
    cfg: LeagueConfig,
    _dir: tempfile::TempDir,
    dataset_cache: PathBuf,
    artifact_root: PathBuf,
}

async fn harness() -> Harness {
    let store = Arc::new(DocumentStore::in_memory().await.unwrap());
    let cfg = LeagueConfig::nba();
    let repo = GameRepository::new(Arc::clone(&store), &cfg);
    for game in corpus() {
        repo.upsert(&game).await.unwrap();
    }
    let dir = tempfile::tempdir().unwrap();
    MasterTableBuilder::new(Arc::clone(&store), cfg.clone())
        .generate_full(&MasterOptions {
            catalog: CatalogOptions {
                game_windows: vec![5],
                day_windows: vec![],
                no_player: true,
            },
            seasons: None,
            output_path: dir.path().join("MASTER_TRAINING.csv"),
        })
        .await
        .unwrap();
    let dataset_cache = dir.path().join("dataset_cache");
    let artifact_root = dir.path().join("model_output");
    Harness {
        store,
        cfg,
        _dir: dir,
        dataset_cache,
        artifact_root,
    }
}

fn classifier_config(blocks: Vec<&str>, eval_year: i32) -> ExperimentConfig {
    ExperimentConfig {
        task: TaskKind::BinaryHomeWin,
        model: Some(ClassifierKind::LogisticRegression { c: 1.0 }),
        points_model: None,
        points_target: PointsTarget::default(),
        features: courtside_train::config::FeatureSelection {
            blocks: Some(blocks.into_iter().map(|b| b.to_string()).collect()),
            ..courtside_train::config::FeatureSelection::default()
        },
        splits: SplitSpec {
            kind: SplitKind::YearBasedCalibration,
            begin_year: Some(2021),
            calibration_years: vec![2023],
            evaluation_year: Some(eval_year),
            n_splits: None,
            min_games_played: None,
        },
        calibration_method: Default::default(),
        scaler: ScalerKind::Standard,
    }
}

#[tokio::test]
async fn classifier_run_completes_with_metrics_and_artifacts() {
    let h = harness().await;
    let runner = ExperimentRunner::new(
        Arc::clone(&h.store),
        h.cfg.clone(),
        h.dataset_cache.clone(),
        h.artifact_root.clone(),
    );
    let outcome = runner
        .run_experiment(&classifier_config(vec!["outcome_strength"], 2024), "session-1")
        .await
        .unwrap();

    for key in ["accuracy_mean", "log_loss_mean", "brier_mean", "auc_mean"] {
        assert!(outcome.metrics.get(key).is_some(), "missing metric {}", key);
    }
    assert_eq!(outcome.metrics["split_type"], "year_based_calibration");

    let f_scores = outcome.diagnostics["f_scores"].as_array().unwrap();
    let importances = outcome.diagnostics["feature_importances"].as_array().unwrap();
    assert!(!f_scores.is_empty());
    assert!(!importances.is_empty());
    // Rankings come sorted descending.
    let scores: Vec<f64> = f_scores.iter().map(|p| p[1].as_f64().unwrap()).collect();
    assert!(scores.windows(2).all(|w| w[0] >= w[1]));

    // Artifacts on disk, and feature_names.json equals the dataset schema.
    let model_dir = h.artifact_root.join("classifier_models").join(&outcome.run_id);
    assert!(model_dir.join("model.json").exists());
    assert!(model_dir.join("scaler.json").exists());
    let names: Vec<String> =
        serde_json::from_str(&std::fs::read_to_string(model_dir.join("feature_names.json")).unwrap())
            .unwrap();
    let schema = outcome.diagnostics["feature_names"].as_array().unwrap();
    assert_eq!(names.len(), schema.len());

    // Run doc reached completed exactly once.
    let run = runner
        .run_repository()
        .get_run(&outcome.run_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.dataset_id.as_deref(), Some(outcome.dataset_id.as_str()));
}

#[tokio::test]
async fn evaluation_year_inside_calibration_years_is_rejected() {
    let h = harness().await;
    let runner = ExperimentRunner::new(
        Arc::clone(&h.store),
        h.cfg.clone(),
        h.dataset_cache.clone(),
        h.artifact_root.clone(),
    );
    let err = runner
        .run_experiment(&classifier_config(vec!["outcome_strength"], 2023), "session-1")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("overlap"));
}

async fn register_base(
    h: &Harness,
    runner: &ExperimentRunner,
    blocks: Vec<&str>,
    name: &str,
    eval_year: i32,
) -> String {
    let config = classifier_config(blocks, eval_year);
    let outcome = runner.run_experiment(&config, "session-s").await.unwrap();
    let repo = ConfigRepository::classifier(Arc::clone(&h.store), &h.cfg);
    let mut doc = repo
        .upsert(
            serde_json::to_value(&config).unwrap(),
            config.model_type_name(),
            Some(name.to_string()),
            Some(outcome.run_id.clone()),
        )
        .await
        .unwrap();
    doc.model_artifact_path = outcome.artifacts["model_path"].as_str().map(|s| s.to_string());
    doc.scaler_artifact_path = outcome.artifacts["scaler_path"].as_str().map(|s| s.to_string());
    doc.features_path = outcome.artifacts["feature_names_path"]
        .as_str()
        .map(|s| s.to_string());
    repo.save(&doc).await.unwrap();
    doc.config_id
}

#[tokio::test]
async fn stacking_rejects_incompatible_temporal_splits() {
    let h = harness().await;
    let runner = ExperimentRunner::new(
        Arc::clone(&h.store),
        h.cfg.clone(),
        h.dataset_cache.clone(),
        h.artifact_root.clone(),
    );
    let a = register_base(&h, &runner, vec!["outcome_strength"], "base a", 2024).await;
    // Same blocks, different evaluation year -> incompatible triple.
    let mut mismatched = classifier_config(vec!["shooting_efficiency"], 2024);
    mismatched.splits.calibration_years = vec![2022];
    let outcome = runner.run_experiment(&mismatched, "session-s").await.unwrap();
    let repo = ConfigRepository::classifier(Arc::clone(&h.store), &h.cfg);
    let b = repo
        .upsert(
            serde_json::to_value(&mismatched).unwrap(),
            "LogisticRegression",
            Some("base b".to_string()),
            Some(outcome.run_id.clone()),
        )
        .await
        .unwrap()
        .config_id;

    let trainer = StackingTrainer::new(
        Arc::clone(&h.store),
        h.cfg.clone(),
        h.dataset_cache.clone(),
        h.artifact_root.clone(),
    );
    let err = trainer
        .train_stacked_model(
            &StackingParams {
                base_config_ids: vec![a, b],
                meta_model: ClassifierKind::LogisticRegression { c: 0.1 },
                mode: StackingMode::Naive,
                meta_features: Vec::new(),
                use_disagree: false,
                use_conf: false,
            },
            "session-s",
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains("incompatible"));
}

#[tokio::test]
async fn stacking_requires_two_bases() {
    let h = harness().await;
    let trainer = StackingTrainer::new(
        Arc::clone(&h.store),
        h.cfg.clone(),
        h.dataset_cache.clone(),
        h.artifact_root.clone(),
    );
    let err = trainer
        .train_stacked_model(
            &StackingParams {
                base_config_ids: vec!["solo".to_string()],
                meta_model: ClassifierKind::LogisticRegression { c: 0.1 },
                mode: StackingMode::Naive,
                meta_features: Vec::new(),
                use_disagree: false,
                use_conf: false,
            },
            "session-s",
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains("at least 2"));
}

#[tokio::test]
async fn informed_ensemble_evaluates_on_the_evaluation_year_and_serves_predictions() {
    let h = harness().await;
    let runner = ExperimentRunner::new(
        Arc::clone(&h.store),
        h.cfg.clone(),
        h.dataset_cache.clone(),
        h.artifact_root.clone(),
    );
    let a = register_base(&h, &runner, vec!["outcome_strength"], "lr outcome", 2024).await;
    let b = register_base(&h, &runner, vec!["shooting_efficiency"], "lr shooting", 2024).await;

    let trainer = StackingTrainer::new(
        Arc::clone(&h.store),
        h.cfg.clone(),
        h.dataset_cache.clone(),
        h.artifact_root.clone(),
    );
    let outcome = trainer
        .train_stacked_model(
            &StackingParams {
                base_config_ids: vec![a.clone(), b.clone()],
                meta_model: ClassifierKind::LogisticRegression { c: 0.5 },
                mode: StackingMode::Informed,
                meta_features: Vec::new(),
                use_disagree: true,
                use_conf: true,
            },
            "session-s",
        )
        .await
        .unwrap();

    assert_eq!(outcome.metrics["evaluation_year"], 2024);
    let summaries = outcome.diagnostics["base_models_summary"].as_array().unwrap();
    assert_eq!(summaries.len(), 2);
    for summary in summaries {
        assert!(summary["metrics"]["accuracy_mean"].as_f64().is_some());
        assert_eq!(
            summary["metrics"]["n_samples_evaluation"],
            outcome.diagnostics["n_samples_evaluation"]
        );
    }
    // Informed mode produced derived columns.
    let cols: Vec<String> = outcome.diagnostics["meta_feature_cols"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect();
    assert!(cols.iter().any(|c| c.starts_with("disagree_")));
    assert!(cols.iter().any(|c| c.starts_with("conf_")));

    // Select the ensemble and serve a prediction for a 2024 game.
    let ensemble_config_id = outcome.diagnostics["ensemble_config_id"]
        .as_str()
        .unwrap()
        .to_string();
    let repo = ConfigRepository::classifier(Arc::clone(&h.store), &h.cfg);
    repo.set_selected(&ensemble_config_id).await.unwrap();

    let service = PredictionService::new(
        Arc::clone(&h.store),
        h.cfg.clone(),
        h.artifact_root.clone(),
    );
    let prediction = service.predict_game("g2024-15").await.unwrap();
    assert!((prediction.home_win_prob + prediction.away_win_prob - 100.0).abs() < 0.11);
    let expected_winner = if prediction.home_win_prob >= prediction.away_win_prob {
        "PHI"
    } else {
        "BOS"
    };
    // g2024-15: home is TEAMS[15 % 4] = PHI, away is TEAMS[16 % 4] = BOS.
    assert_eq!(prediction.predicted_winner, expected_winner);
    assert!(!prediction.base_outputs.is_empty());
    assert!(!prediction.features_dict.is_empty());
}
