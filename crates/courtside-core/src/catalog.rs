//! Feature catalog
//!
//! Deterministic enumeration of every feature key the master table carries
//! (each base stat × each time period × each weight × each side), plus the
//! block mapping dataset specs use to request feature families.

use std::collections::BTreeSet;

use crate::feature::{FeatureKey, Side, TimePeriod};

/// Windowed team stats. `_net` stats are opponent-symmetric: the team value
/// minus the same stat aggregated over the opponents it faced.
pub const TEAM_STATS: &[&str] = &[
    "points",
    "points_against",
    "points_net",
    "wins",
    "off_rtg",
    "off_rtg_net",
    "def_rtg",
    "efg",
    "efg_net",
    "ts_pct",
    "ts_net",
    "pace",
    "ast_ratio",
    "to_metric",
    "reb_total",
    "reb_net",
    "fg_pct",
    "three_pct",
    "ft_pct",
    "blocks",
    "steals",
    "turnovers",
    "fouls",
];

/// Weights enumerated for every windowed team stat.
const TEAM_WEIGHTS: &[&str] = &["raw", "avg", "std", "rel"];

/// Stats whose `none`-period single value is well defined.
pub const STATS_ALLOWING_NONE: &[&str] = &["elo", "rest", "b2b", "player_per_1"];

/// Blend recipes applied to the blend stats below.
const BLEND_RECIPES: &[&str] = &[
    "blend:season:0.80/games_20:0.10/games_12:0.10",
    "blend:season:0.70/games_20:0.20/games_12:0.10",
    "blend:season:0.60/games_20:0.20/games_12:0.20",
    "blend:season:0.80/games_12:0.20",
];

const BLEND_STATS: &[&str] = &["points_net_blend", "off_rtg_net_blend", "efg_net_blend", "wins_blend"];

/// Player-talent and injury feature stems (period/weight already fixed).
const PLAYER_FEATURES: &[&str] = &[
    "player_team_per|season|weighted_MPG",
    "player_starters_per|season|avg",
    "player_per_1|none|weighted_MIN_REC",
    "player_per_1|season|raw",
    "player_per_2|season|raw",
    "player_per_3|season|raw",
    "player_per|season|top1_avg",
    "player_per|season|top2_avg",
    "player_per|season|top3_avg",
    "player_per|season|top1_weighted_MPG",
    "player_per|season|top2_weighted_MPG",
    "player_per|season|top3_weighted_MPG",
    "per_available|none|raw",
];

const INJURY_FEATURES: &[&str] = &[
    "inj_severity|none|raw",
    "inj_per|none|top1_avg",
    "inj_per|none|top3_sum",
    "inj_per|none|weighted_MIN",
    "inj_min_lost|none|raw",
    "inj_rotation_per|none|raw",
    "inj_per_share|none|top3_sum",
    "inj_per_weighted_share|none|weighted_MIN",
    "inj_impact|none|blend:severity:0.45/top1_per:0.35/rotation:0.20",
];

/// Options governing catalog enumeration.
#[derive(Debug, Clone)]
pub struct CatalogOptions {
    /// Game-count windows enumerated as `games_N`.
    pub game_windows: Vec<u32>,
    /// Day windows enumerated as `days_N`.
    pub day_windows: Vec<u32>,
    /// Omit player and injury features.
    pub no_player: bool,
}

impl Default for CatalogOptions {
    fn default() -> Self {
        Self {
            game_windows: vec![10, 20],
            day_windows: vec![5, 10, 12],
            no_player: false,
        }
    }
}

fn expand_sides(stem: &str, out: &mut BTreeSet<String>) {
    for side in ["diff", "home", "away"] {
        out.insert(format!("{}|{}", stem, side));
    }
}

/// Enumerate every feature key for the master table, expanded to all three
/// sides and sorted lexicographically. Combinations that are all-zero by
/// construction (`none` period with an aggregating weight for a windowed
/// stat) never appear.
pub fn all_feature_keys(opts: &CatalogOptions) -> Vec<String> {
    let mut keys: BTreeSet<String> = BTreeSet::new();

    let mut periods: Vec<String> = vec!["season".to_string()];
    for n in &opts.game_windows {
        periods.push(format!("games_{}", n));
    }
    for n in &opts.day_windows {
        periods.push(format!("days_{}", n));
    }

    for stat in TEAM_STATS {
        for period in &periods {
            for weight in TEAM_WEIGHTS {
                expand_sides(&format!("{}|{}|{}", stat, period, weight), &mut keys);
            }
        }
    }

    // Single-state features.
    expand_sides("elo|none|raw", &mut keys);
    expand_sides("rest|none|raw", &mut keys);
    expand_sides("b2b|none|raw", &mut keys);
    expand_sides("games_played|season|raw", &mut keys);
    for n in &opts.day_windows {
        expand_sides(&format!("games_played|days_{}|raw", n), &mut keys);
        expand_sides(&format!("travel|days_{}|avg", n), &mut keys);
    }

    for stat in BLEND_STATS {
        for recipe in BLEND_RECIPES {
            expand_sides(&format!("{}|none|{}", stat, recipe), &mut keys);
        }
    }

    if !opts.no_player {
        for stem in PLAYER_FEATURES {
            expand_sides(stem, &mut keys);
        }
        for stem in INJURY_FEATURES {
            expand_sides(stem, &mut keys);
        }
        // Derived diff-only share features are produced alongside home/away.
        keys.insert("inj_per_share|none|top3_sum|diff".to_string());
        keys.insert("inj_per_weighted_share|none|weighted_MIN|diff".to_string());
    }

    // Drop anything the grammar itself rejects and anything that is
    // all-zero by construction.
    keys.into_iter()
        .filter(|k| match FeatureKey::parse(k) {
            Ok(parsed) => {
                if parsed.period == TimePeriod::None
                    && parsed.weight.is_aggregating()
                    && !STATS_ALLOWING_NONE.contains(&parsed.stat.as_str())
                {
                    return false;
                }
                true
            }
            Err(_) => false,
        })
        .collect()
}

/// Map a master feature key to its feature block.
pub fn feature_block(key: &str) -> &'static str {
    let lower = key.to_lowercase();
    let stat = lower.split('|').next().unwrap_or("");
    if stat.contains("inj") {
        return "injuries";
    }
    if stat.contains("player_per")
        || stat.contains("team_per")
        || stat.contains("starters_per")
        || lower.contains("per_available")
    {
        return "player_talent";
    }
    if stat.contains("elo") {
        return "elo_strength";
    }
    if lower.contains("rel") {
        return "era_normalization";
    }
    if stat.contains("off_rtg") || stat.contains("ast_ratio") {
        return "offensive_engine";
    }
    if stat.contains("def_rtg")
        || stat.contains("blocks")
        || stat.contains("reb_")
        || stat.contains("turnovers")
        || stat.contains("to_metric")
    {
        return "defensive_engine";
    }
    if stat.contains("efg") || stat.contains("ts") || stat.contains("three") {
        return "shooting_efficiency";
    }
    if stat.contains("points") || stat.contains("wins") {
        return "outcome_strength";
    }
    if stat.contains("pace") || lower.contains("std") {
        return "pace_volatility";
    }
    if stat.contains("b2b") || stat.contains("travel") || lower.contains("rest") {
        return "schedule_fatigue";
    }
    if stat.contains("games_played") {
        if lower.contains("days") || lower.contains("diff") {
            return "schedule_fatigue";
        }
        return "sample_size";
    }
    "absolute_magnitude"
}

/// Resolve requested blocks against the master's feature columns. Returns
/// the matching features in master order and the blocks that matched
/// nothing.
pub fn features_for_blocks<'a>(
    master_features: &'a [String],
    blocks: &[String],
) -> (Vec<String>, Vec<String>) {
    let mut selected = Vec::new();
    let mut matched: BTreeSet<&str> = BTreeSet::new();
    for feature in master_features {
        let block = feature_block(feature);
        if blocks.iter().any(|b| b == block) {
            selected.push(feature.clone());
            matched.insert(block);
        }
    }
    let missing = blocks
        .iter()
        .filter(|b| !matched.contains(b.as_str()))
        .cloned()
        .collect();
    (selected, missing)
}

/// The blocks that have at least one feature in the given master columns.
pub fn available_blocks(master_features: &[String]) -> Vec<String> {
    let mut blocks: BTreeSet<&str> = BTreeSet::new();
    for feature in master_features {
        blocks.insert(feature_block(feature));
    }
    blocks.into_iter().map(|b| b.to_string()).collect()
}

/// Filter a feature's side against a dataset diff mode. `mixed` keeps all
/// sides; unparseable features survive only when they are prediction
/// columns (`pred_*`).
pub fn side_allowed(key: &str, mode: &str) -> bool {
    match FeatureKey::parse(key) {
        Ok(parsed) => match mode {
            "home_minus_away" | "away_minus_home" => parsed.side == Side::Diff,
            "absolute" => parsed.side != Side::Diff,
            _ => true,
        },
        Err(_) => key.starts_with("pred_"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_expands_all_sides_and_sorts() {
        let keys = all_feature_keys(&CatalogOptions::default());
        assert!(keys.contains(&"points|season|avg|diff".to_string()));
        assert!(keys.contains(&"points|season|avg|home".to_string()));
        assert!(keys.contains(&"points|season|avg|away".to_string()));
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn catalog_excludes_none_period_aggregates() {
        let keys = all_feature_keys(&CatalogOptions::default());
        assert!(!keys.iter().any(|k| k.contains("|none|avg|")));
        assert!(!keys.iter().any(|k| k.contains("|none|std|")));
        // But singles with raw survive.
        assert!(keys.contains(&"elo|none|raw|diff".to_string()));
    }

    #[test]
    fn no_player_omits_player_and_injury_features() {
        let keys = all_feature_keys(&CatalogOptions {
            no_player: true,
            ..CatalogOptions::default()
        });
        assert!(!keys.iter().any(|k| k.starts_with("player_")));
        assert!(!keys.iter().any(|k| k.starts_with("inj_")));
        assert!(!keys.iter().any(|k| k.starts_with("per_available")));
    }

    #[test]
    fn block_mapping_matches_known_families() {
        assert_eq!(feature_block("elo|none|raw|diff"), "elo_strength");
        assert_eq!(feature_block("points|season|rel|diff"), "era_normalization");
        assert_eq!(feature_block("points|season|avg|diff"), "outcome_strength");
        assert_eq!(feature_block("efg_net|games_10|avg|home"), "shooting_efficiency");
        assert_eq!(feature_block("inj_severity|none|raw|home"), "injuries");
        assert_eq!(feature_block("travel|days_5|avg|away"), "schedule_fatigue");
        assert_eq!(feature_block("games_played|season|raw|home"), "sample_size");
    }

    #[test]
    fn diff_mode_filters_sides() {
        assert!(side_allowed("points|season|avg|diff", "home_minus_away"));
        assert!(!side_allowed("points|season|avg|home", "home_minus_away"));
        assert!(side_allowed("points|season|avg|home", "absolute"));
        assert!(!side_allowed("points|season|avg|diff", "absolute"));
        assert!(side_allowed("points|season|avg|home", "mixed"));
        assert!(side_allowed("pred_margin", "home_minus_away"));
    }
}
