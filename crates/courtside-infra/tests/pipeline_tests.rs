//! End-to-end pipeline tests: master generation, the incremental-update
//! law, and dataset caching semantics.

use std::collections::HashSet;
use std::sync::Arc;

use courtside_core::catalog::CatalogOptions;
use courtside_core::games::{Game, TeamBox};
use courtside_infra::dataset::{DatasetBuilder, DatasetSpec};
use courtside_infra::master::{MasterOptions, MasterTableBuilder, META_COLUMNS, TARGET_COLUMNS};
use courtside_infra::repos::GameRepository;
use courtside_infra::store::DocumentStore;
use courtside_types::{GameDate, LeagueConfig};

const TEAMS: [&str; 4] = ["BOS", "NYK", "MIA", "PHI"];

fn team_box(name: &str, points: f64) -> TeamBox {
    TeamBox {
        name: name.to_string(),
        points,
        fg_made: points / 2.4,
        fg_att: points / 1.15,
        three_made: 11.0,
        three_att: 30.0,
        ft_made: 15.0,
        ft_att: 20.0,
        off_reb: 10.0,
        def_reb: 32.0,
        rebounds: 42.0,
        assists: 24.0,
        turnovers: 13.0,
        steals: 7.0,
        blocks: 4.0,
        fouls: 18.0,
        ..TeamBox::default()
    }
}

/// Two games per day between rotating team pairs, one season.
fn corpus(days: u32) -> Vec<Game> {
    let mut games = Vec::new();
    for day in 1..=days {
        let home = TEAMS[(day as usize) % 4];
        let away = TEAMS[(day as usize + 1) % 4];
        let home2 = TEAMS[(day as usize + 2) % 4];
        let away2 = TEAMS[(day as usize + 3) % 4];
        let hp = 100.0 + (day % 7) as f64 * 2.0;
        let ap = 96.0 + (day % 5) as f64 * 3.0;
        for (i, (h, a)) in [(home, away), (home2, away2)].iter().enumerate() {
            games.push(Game {
                game_id: format!("g{}-{}", day, i),
                date: GameDate::new(2023, 11, day),
                season: "2023-2024".to_string(),
                home: team_box(h, hp),
                away: team_box(a, ap),
                home_won: Some(hp > ap),
                game_type: None,
                venue_guid: None,
            });
        }
    }
    games
}

fn tiny_catalog() -> CatalogOptions {
    CatalogOptions {
        game_windows: vec![3],
        day_windows: vec![5],
        no_player: true,
    }
}

async fn seeded_store(games: &[Game]) -> Arc<DocumentStore> {
    let store = Arc::new(DocumentStore::in_memory().await.unwrap());
    let repo = GameRepository::new(Arc::clone(&store), &LeagueConfig::nba());
    for game in games {
        repo.upsert(game).await.unwrap();
    }
    store
}

fn read_rows(path: &std::path::Path) -> (Vec<String>, Vec<Vec<String>>) {
    MasterTableBuilder::read_master(path).unwrap()
}

#[tokio::test]
async fn full_generation_produces_ordered_master() {
    let games = corpus(10);
    let store = seeded_store(&games).await;
    let dir = tempfile::tempdir().unwrap();
    let builder = MasterTableBuilder::new(Arc::clone(&store), LeagueConfig::nba());

    let summary = builder
        .generate_full(&MasterOptions {
            catalog: tiny_catalog(),
            seasons: None,
            output_path: dir.path().join("MASTER_TRAINING.csv"),
        })
        .await
        .unwrap();

    assert_eq!(summary.row_count, games.len());
    assert_eq!(summary.last_date_updated.as_deref(), Some("2023-11-10"));

    let (header, rows) = read_rows(&summary.csv_path);
    assert_eq!(rows.len(), games.len());

    // Column order: metadata, sorted features, targets.
    assert_eq!(&header[..6], &META_COLUMNS.map(|c| c.to_string()));
    let n = header.len();
    assert_eq!(&header[n - 3..], &TARGET_COLUMNS.map(|c| c.to_string()));
    let features = &header[6..n - 3];
    let mut sorted = features.to_vec();
    sorted.sort();
    assert_eq!(features, sorted.as_slice());

    // No blanks anywhere.
    for row in &rows {
        assert!(row.iter().all(|v| !v.is_empty()));
    }
}

#[tokio::test]
async fn incremental_update_matches_full_regeneration() {
    let games = corpus(10);
    let cutoff = GameDate::new(2023, 11, 8);

    // Reference: full generation over everything.
    let full_store = seeded_store(&games).await;
    let dir_full = tempfile::tempdir().unwrap();
    let full_builder = MasterTableBuilder::new(Arc::clone(&full_store), LeagueConfig::nba());
    let full = full_builder
        .generate_full(&MasterOptions {
            catalog: tiny_catalog(),
            seasons: None,
            output_path: dir_full.path().join("MASTER_TRAINING.csv"),
        })
        .await
        .unwrap();

    // Partial generation, then incremental append of the tail window.
    let head: Vec<Game> = games
        .iter()
        .filter(|g| g.date.key() <= cutoff.key())
        .cloned()
        .collect();
    let partial_store = seeded_store(&head).await;
    let dir_partial = tempfile::tempdir().unwrap();
    let partial_builder = MasterTableBuilder::new(Arc::clone(&partial_store), LeagueConfig::nba());
    partial_builder
        .generate_full(&MasterOptions {
            catalog: tiny_catalog(),
            seasons: None,
            output_path: dir_partial.path().join("MASTER_TRAINING.csv"),
        })
        .await
        .unwrap();

    let repo = GameRepository::new(Arc::clone(&partial_store), &LeagueConfig::nba());
    for game in games.iter().filter(|g| g.date.key() > cutoff.key()) {
        repo.upsert(game).await.unwrap();
    }
    let incremental = partial_builder
        .update_incremental(&cutoff, &GameDate::new(2023, 11, 10))
        .await
        .unwrap();
    assert_eq!(incremental.rows_changed, 4);
    assert_eq!(incremental.last_date_updated.as_deref(), Some("2023-11-10"));

    let (full_header, mut full_rows) = read_rows(&full.csv_path);
    let (inc_header, mut inc_rows) = read_rows(&incremental.csv_path);
    assert_eq!(full_header, inc_header);
    full_rows.sort();
    inc_rows.sort();
    assert_eq!(full_rows, inc_rows);
}

#[tokio::test]
async fn date_range_regeneration_preserves_rows_outside_window() {
    let games = corpus(10);
    let store = seeded_store(&games).await;
    let dir = tempfile::tempdir().unwrap();
    let builder = MasterTableBuilder::new(Arc::clone(&store), LeagueConfig::nba());
    let full = builder
        .generate_full(&MasterOptions {
            catalog: tiny_catalog(),
            seasons: None,
            output_path: dir.path().join("MASTER_TRAINING.csv"),
        })
        .await
        .unwrap();
    let (_, before_rows) = read_rows(&full.csv_path);

    let regen = builder
        .regenerate_range(&GameDate::new(2023, 11, 4), &GameDate::new(2023, 11, 6))
        .await
        .unwrap();
    assert_eq!(regen.rows_changed, 6);
    assert_eq!(regen.row_count, games.len());

    let (_, after_rows) = read_rows(&full.csv_path);
    let mut sorted_before = before_rows;
    let mut sorted_after = after_rows;
    sorted_before.sort();
    sorted_after.sort();
    assert_eq!(sorted_before, sorted_after);
}

#[tokio::test]
async fn dataset_build_is_idempotent_and_cached() {
    let games = corpus(12);
    let store = seeded_store(&games).await;
    let dir = tempfile::tempdir().unwrap();
    let builder = MasterTableBuilder::new(Arc::clone(&store), LeagueConfig::nba());
    builder
        .generate_full(&MasterOptions {
            catalog: tiny_catalog(),
            seasons: None,
            output_path: dir.path().join("MASTER_TRAINING.csv"),
        })
        .await
        .unwrap();

    let datasets = DatasetBuilder::new(
        Arc::clone(&store),
        LeagueConfig::nba(),
        dir.path().join("dataset_cache"),
    );
    let spec = DatasetSpec {
        feature_blocks: Some(vec![
            "outcome_strength".to_string(),
            "era_normalization".to_string(),
        ]),
        begin_year: Some(2023),
        ..DatasetSpec::default()
    };

    let first = datasets.build_dataset(&spec).await.unwrap();
    assert!(!first.cached);
    assert!(first.row_count > 0);
    assert!(first.dropped_features.is_empty());
    let first_bytes = std::fs::read(&first.csv_path).unwrap();

    let second = datasets.build_dataset(&spec).await.unwrap();
    assert!(second.cached);
    assert_eq!(first.dataset_id, second.dataset_id);
    assert_eq!(first.schema, second.schema);
    assert_eq!(first.row_count, second.row_count);
    assert_eq!(first_bytes, std::fs::read(&second.csv_path).unwrap());
}

#[tokio::test]
async fn min_games_filter_is_monotone_in_k() {
    let games = corpus(14);
    let store = seeded_store(&games).await;
    let dir = tempfile::tempdir().unwrap();
    MasterTableBuilder::new(Arc::clone(&store), LeagueConfig::nba())
        .generate_full(&MasterOptions {
            catalog: tiny_catalog(),
            seasons: None,
            output_path: dir.path().join("MASTER_TRAINING.csv"),
        })
        .await
        .unwrap();

    let datasets = DatasetBuilder::new(
        Arc::clone(&store),
        LeagueConfig::nba(),
        dir.path().join("dataset_cache"),
    );
    let mut previous = usize::MAX;
    for k in [0u32, 2, 4] {
        let result = datasets
            .build_dataset(&DatasetSpec {
                feature_blocks: Some(vec!["outcome_strength".to_string()]),
                min_games_played: if k == 0 { None } else { Some(k) },
                ..DatasetSpec::default()
            })
            .await
            .unwrap();
        assert!(result.row_count <= previous);
        previous = result.row_count;
    }
}

#[tokio::test]
async fn unknown_feature_block_is_a_config_error() {
    let games = corpus(8);
    let store = seeded_store(&games).await;
    let dir = tempfile::tempdir().unwrap();
    MasterTableBuilder::new(Arc::clone(&store), LeagueConfig::nba())
        .generate_full(&MasterOptions {
            catalog: tiny_catalog(),
            seasons: None,
            output_path: dir.path().join("MASTER_TRAINING.csv"),
        })
        .await
        .unwrap();

    let datasets = DatasetBuilder::new(
        Arc::clone(&store),
        LeagueConfig::nba(),
        dir.path().join("dataset_cache"),
    );
    let err = datasets
        .build_dataset(&DatasetSpec {
            feature_blocks: Some(vec!["quantum_vibes".to_string()]),
            ..DatasetSpec::default()
        })
        .await
        .unwrap_err();
    let message = err.to_string();
    assert!(message.contains("valid") || message.contains("blocks"));
}

#[tokio::test]
async fn dataset_without_master_is_data_missing() {
    let store = Arc::new(DocumentStore::in_memory().await.unwrap());
    let dir = tempfile::tempdir().unwrap();
    let datasets = DatasetBuilder::new(store, LeagueConfig::nba(), dir.path().join("cache"));
    let err = datasets.build_dataset(&DatasetSpec::default()).await.unwrap_err();
    assert!(err.to_string().to_lowercase().contains("master"));
}

#[tokio::test]
async fn master_covers_every_distinct_game_once() {
    let games = corpus(9);
    let expected: HashSet<String> = games.iter().map(|g| g.game_id.clone()).collect();
    let store = seeded_store(&games).await;
    let dir = tempfile::tempdir().unwrap();
    let summary = MasterTableBuilder::new(Arc::clone(&store), LeagueConfig::nba())
        .generate_full(&MasterOptions {
            catalog: tiny_catalog(),
            seasons: None,
            output_path: dir.path().join("MASTER_TRAINING.csv"),
        })
        .await
        .unwrap();
    let (header, rows) = read_rows(&summary.csv_path);
    let id_idx = header.iter().position(|h| h == "game_id").unwrap();
    let seen: HashSet<String> = rows.iter().map(|r| r[id_idx].clone()).collect();
    assert_eq!(seen, expected);
    assert_eq!(rows.len(), expected.len());
}
