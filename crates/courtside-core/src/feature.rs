//! Feature-key grammar
//!
//! A feature name is a 4-field pipe-delimited key:
//! `stat_name|time_period|calc_weight|home_away_diff` with an optional
//! `|side` suffix. Time periods and weights are tagged variants; blends are
//! values, not subclasses.

use serde::{Deserialize, Serialize};

use courtside_types::{CourtsideError, Result};

const BLEND_TOLERANCE: f64 = 1e-6;

/// Which game window a feature aggregates over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimePeriod {
    /// All team games in the current season strictly before the date.
    Season,
    /// The most recent N team games before the date, season-bounded.
    Games(u32),
    /// Team games within the trailing N-day window, season-bounded.
    Days(u32),
    /// Single-state features (Elo, rest days, back-to-back).
    None,
}

impl TimePeriod {
    pub fn parse(s: &str) -> Result<Self> {
        if s == "season" {
            return Ok(TimePeriod::Season);
        }
        if s == "none" {
            return Ok(TimePeriod::None);
        }
        if let Some(n) = s.strip_prefix("games_") {
            let n: u32 = n
                .parse()
                .map_err(|_| CourtsideError::Feature(format!("invalid time period: {}", s)))?;
            return Ok(TimePeriod::Games(n));
        }
        if let Some(n) = s.strip_prefix("days_") {
            let n: u32 = n
                .parse()
                .map_err(|_| CourtsideError::Feature(format!("invalid time period: {}", s)))?;
            return Ok(TimePeriod::Days(n));
        }
        Err(CourtsideError::Feature(format!(
            "invalid time period: {}",
            s
        )))
    }

    pub fn as_token(&self) -> String {
        match self {
            TimePeriod::Season => "season".to_string(),
            TimePeriod::Games(n) => format!("games_{}", n),
            TimePeriod::Days(n) => format!("days_{}", n),
            TimePeriod::None => "none".to_string(),
        }
    }
}

/// One component of a blend weight: a sub-period token and its convex
/// weight. For team-stat blends the token is itself a time period
/// (`season`, `games_20`); for injury blends it names a sub-feature
/// (`severity`, `top1_per`, `rotation`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlendTerm {
    pub token: String,
    pub weight: f64,
}

/// How the windowed values are combined into one number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CalcWeight {
    /// Per-game sum / identity.
    Raw,
    /// Mean across the window.
    Avg,
    /// Sample standard deviation across the window.
    Std,
    /// Value normalized against the league-season mean (era adjustment).
    Rel,
    /// Convex combination of sub-period values; weights sum to one.
    Blend(Vec<BlendTerm>),
    /// Named aggregations owned by the player/injury calculators
    /// (`weighted_MPG`, `top3_sum`, `weighted_MIN`, ...).
    Custom(String),
}

impl CalcWeight {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "raw" => return Ok(CalcWeight::Raw),
            "avg" => return Ok(CalcWeight::Avg),
            "std" => return Ok(CalcWeight::Std),
            "rel" => return Ok(CalcWeight::Rel),
            _ => {}
        }
        if let Some(body) = s.strip_prefix("blend:") {
            let mut terms = Vec::new();
            for part in body.split('/') {
                let (token, weight) = part.rsplit_once(':').ok_or_else(|| {
                    CourtsideError::Feature(format!("invalid blend component: {}", part))
                })?;
                let weight: f64 = weight.parse().map_err(|_| {
                    CourtsideError::Feature(format!("invalid blend weight: {}", part))
                })?;
                if token.is_empty() {
                    return Err(CourtsideError::Feature(format!(
                        "invalid blend component: {}",
                        part
                    )));
                }
                terms.push(BlendTerm {
                    token: token.to_string(),
                    weight,
                });
            }
            if terms.is_empty() {
                return Err(CourtsideError::Feature(format!("empty blend: {}", s)));
            }
            let total: f64 = terms.iter().map(|t| t.weight).sum();
            if (total - 1.0).abs() > BLEND_TOLERANCE {
                return Err(CourtsideError::Feature(format!(
                    "blend weights must sum to 1.0 (got {}): {}",
                    total, s
                )));
            }
            return Ok(CalcWeight::Blend(terms));
        }
        if s.is_empty() || s.contains('|') {
            return Err(CourtsideError::Feature(format!("invalid calc weight: {}", s)));
        }
        Ok(CalcWeight::Custom(s.to_string()))
    }

    pub fn as_token(&self) -> String {
        match self {
            CalcWeight::Raw => "raw".to_string(),
            CalcWeight::Avg => "avg".to_string(),
            CalcWeight::Std => "std".to_string(),
            CalcWeight::Rel => "rel".to_string(),
            CalcWeight::Blend(terms) => {
                let body: Vec<String> = terms
                    .iter()
                    .map(|t| format!("{}:{:.2}", t.token, t.weight))
                    .collect();
                format!("blend:{}", body.join("/"))
            }
            CalcWeight::Custom(name) => name.clone(),
        }
    }

    /// Whether this weight aggregates over a window (and therefore cannot
    /// combine with the `none` time period for windowed stats).
    pub fn is_aggregating(&self) -> bool {
        matches!(self, CalcWeight::Avg | CalcWeight::Std | CalcWeight::Rel)
    }
}

/// Which perspective the value is reported from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Home,
    Away,
    /// `value(home) - value(away)`.
    Diff,
}

impl Side {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "home" => Ok(Side::Home),
            "away" => Ok(Side::Away),
            "diff" => Ok(Side::Diff),
            _ => Err(CourtsideError::Feature(format!("invalid side: {}", s))),
        }
    }

    pub fn as_token(&self) -> &'static str {
        match self {
            Side::Home => "home",
            Side::Away => "away",
            Side::Diff => "diff",
        }
    }
}

/// Parsed feature key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureKey {
    pub stat: String,
    pub period: TimePeriod,
    pub weight: CalcWeight,
    pub side: Side,
    /// The optional trailing `|side` marker carried by some keys.
    pub side_suffix: bool,
}

impl FeatureKey {
    pub fn parse(key: &str) -> Result<Self> {
        let mut parts: Vec<&str> = key.split('|').collect();
        let side_suffix = parts.last() == Some(&"side");
        if side_suffix {
            parts.pop();
        }
        if parts.len() != 4 {
            return Err(CourtsideError::Feature(format!(
                "malformed feature key (expected 4 pipe-delimited fields): {}",
                key
            )));
        }
        if parts[0].is_empty() {
            return Err(CourtsideError::Feature(format!(
                "malformed feature key (empty stat name): {}",
                key
            )));
        }
        // The weight field may itself contain ':' and '/' (blends); it never
        // contains '|' because we already split on it.
        Ok(Self {
            stat: parts[0].to_string(),
            period: TimePeriod::parse(parts[1])?,
            weight: CalcWeight::parse(parts[2])?,
            side: Side::parse(parts[3])?,
            side_suffix,
        })
    }

    pub fn encode(&self) -> String {
        let mut out = format!(
            "{}|{}|{}|{}",
            self.stat,
            self.period.as_token(),
            self.weight.as_token(),
            self.side.as_token()
        );
        if self.side_suffix {
            out.push_str("|side");
        }
        out
    }

    /// Keys in the `player_*` / `per_available` namespace are computed by
    /// the PER calculator rather than the stat handler.
    pub fn is_player_feature(&self) -> bool {
        self.stat.starts_with("player_") || self.stat.starts_with("per_available")
    }

    /// Keys in the `inj_*` namespace.
    pub fn is_injury_feature(&self) -> bool {
        self.stat.starts_with("inj_")
    }
}
