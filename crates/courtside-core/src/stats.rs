//! Windowed team-stat computation
//!
//! The stat handler computes a single named feature for a matchup from the
//! preloaded game index: raw/averaged/volatility/era-relative weightings
//! over season, game-count, or day windows; derived ratings; opponent-
//! symmetric `_net` stats; schedule singles; and venue travel distances.
//!
//! Missing data yields `0.0`; only malformed feature keys raise.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use courtside_types::{CourtsideError, GameDate, Result};

use crate::elo::EloCache;
use crate::feature::{BlendTerm, CalcWeight, FeatureKey, Side, TimePeriod};
use crate::games::{Game, GameIndex, TeamBox};
use crate::per::PerCalculator;

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance between two (lat, lon) points, in kilometers.
pub fn haversine_km(a: (f64, f64), b: (f64, f64)) -> f64 {
    let (lat1, lon1) = (a.0.to_radians(), a.1.to_radians());
    let (lat2, lon2) = (b.0.to_radians(), b.1.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

/// Window totals used for rate stats computed at the aggregate level.
#[derive(Debug, Default, Clone)]
struct WindowTotals {
    games: f64,
    points: f64,
    fg_made: f64,
    fg_att: f64,
    three_made: f64,
    three_att: f64,
    ft_made: f64,
    ft_att: f64,
    assists: f64,
    turnovers: f64,
    rebounds: f64,
    possessions: f64,
    opp_points: f64,
    opp_possessions: f64,
}

impl WindowTotals {
    fn add(&mut self, team: &TeamBox, opp: &TeamBox) {
        self.games += 1.0;
        self.points += team.points;
        self.fg_made += team.fg_made;
        self.fg_att += team.fg_att;
        self.three_made += team.three_made;
        self.three_att += team.three_att;
        self.ft_made += team.ft_made;
        self.ft_att += team.ft_att;
        self.assists += team.assists;
        self.turnovers += team.turnovers;
        self.rebounds += team.rebounds;
        self.possessions += team.possessions();
        self.opp_points += opp.points;
        self.opp_possessions += opp.possessions();
    }
}

fn ratio(n: f64, d: f64) -> f64 {
    if d > 0.0 {
        n / d
    } else {
        0.0
    }
}

/// Per-game value of a stat from one side of a game. The opponent box is
/// the same game record's other side, which is what makes `_net` stats
/// opponent-symmetric rather than a relabeling.
fn game_stat_value(stat: &str, game: &Game, team: &TeamBox, opp: &TeamBox) -> Option<f64> {
    let off_rtg = |b: &TeamBox| 100.0 * ratio(b.points, b.possessions());
    let efg = |b: &TeamBox| ratio(b.fg_made + 0.5 * b.three_made, b.fg_att);
    let ts = |b: &TeamBox| ratio(b.points, 2.0 * (b.fg_att + 0.44 * b.ft_att));
    let usage_denom = |b: &TeamBox| b.fg_att + 0.44 * b.ft_att + b.assists + b.turnovers;
    let value = match stat {
        "points" => team.points,
        "points_against" => opp.points,
        "points_net" => team.points - opp.points,
        "wins" => {
            let won = game.home_won_resolved()?;
            let team_won = if game.is_home(&team.name) { won } else { !won };
            if team_won {
                1.0
            } else {
                0.0
            }
        }
        "off_rtg" => off_rtg(team),
        "off_rtg_net" => off_rtg(team) - off_rtg(opp),
        "def_rtg" => 100.0 * ratio(opp.points, opp.possessions()),
        "efg" => efg(team),
        "efg_net" => efg(team) - efg(opp),
        "ts_pct" => ts(team),
        "ts_net" => ts(team) - ts(opp),
        "pace" => team.possessions(),
        "ast_ratio" => 100.0 * ratio(team.assists, usage_denom(team)),
        "to_metric" => 100.0 * ratio(team.turnovers, usage_denom(team)),
        "reb_total" => team.rebounds,
        "reb_net" => team.rebounds - opp.rebounds,
        "fg_pct" => ratio(team.fg_made, team.fg_att),
        "three_pct" => ratio(team.three_made, team.three_att),
        "ft_pct" => ratio(team.ft_made, team.ft_att),
        "blocks" => team.blocks,
        "steals" => team.steals,
        "turnovers" => team.turnovers,
        "fouls" => team.fouls,
        _ => return None,
    };
    Some(value)
}

/// Rate stats whose `raw` weighting is computed from window totals rather
/// than a per-game sum.
fn is_rate_stat(stat: &str) -> bool {
    matches!(
        stat,
        "off_rtg"
            | "off_rtg_net"
            | "def_rtg"
            | "efg"
            | "efg_net"
            | "ts_pct"
            | "ts_net"
            | "pace"
            | "ast_ratio"
            | "to_metric"
            | "fg_pct"
            | "three_pct"
            | "ft_pct"
    )
}

fn rate_from_totals(stat: &str, team: &WindowTotals, opp: &WindowTotals) -> f64 {
    let usage = team.fg_att + 0.44 * team.ft_att + team.assists + team.turnovers;
    match stat {
        "off_rtg" => 100.0 * ratio(team.points, team.possessions),
        "off_rtg_net" => {
            100.0 * ratio(team.points, team.possessions) - 100.0 * ratio(opp.points, opp.possessions)
        }
        "def_rtg" => 100.0 * ratio(team.opp_points, team.opp_possessions),
        "efg" => ratio(team.fg_made + 0.5 * team.three_made, team.fg_att),
        "efg_net" => {
            ratio(team.fg_made + 0.5 * team.three_made, team.fg_att)
                - ratio(opp.fg_made + 0.5 * opp.three_made, opp.fg_att)
        }
        "ts_pct" => ratio(team.points, 2.0 * (team.fg_att + 0.44 * team.ft_att)),
        "ts_net" => {
            ratio(team.points, 2.0 * (team.fg_att + 0.44 * team.ft_att))
                - ratio(opp.points, 2.0 * (opp.fg_att + 0.44 * opp.ft_att))
        }
        "pace" => ratio(team.possessions, team.games),
        "ast_ratio" => 100.0 * ratio(team.assists, usage),
        "to_metric" => 100.0 * ratio(team.turnovers, usage),
        "fg_pct" => ratio(team.fg_made, team.fg_att),
        "three_pct" => ratio(team.three_made, team.three_att),
        "ft_pct" => ratio(team.ft_made, team.ft_att),
        _ => 0.0,
    }
}

/// Computes single named features from the preloaded game index.
pub struct StatHandler {
    index: Arc<GameIndex>,
    elo: Option<Arc<EloCache>>,
    /// venue_guid -> (lat, lon)
    venue_coords: HashMap<String, (f64, f64)>,
    /// game_id -> venue_guid
    game_venues: HashMap<String, String>,
    /// (season, stat, date key) -> league mean per-game value over games
    /// strictly before the date, extended under lock.
    league_means: Mutex<HashMap<(String, String, i64), f64>>,
}

impl StatHandler {
    pub fn new(index: Arc<GameIndex>) -> Self {
        Self {
            index,
            elo: None,
            venue_coords: HashMap::new(),
            game_venues: HashMap::new(),
            league_means: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_elo(&mut self, elo: Arc<EloCache>) {
        self.elo = Some(elo);
    }

    pub fn elo(&self) -> Option<&Arc<EloCache>> {
        self.elo.as_ref()
    }

    pub fn set_venues(
        &mut self,
        venue_coords: HashMap<String, (f64, f64)>,
        game_venues: HashMap<String, String>,
    ) {
        self.venue_coords = venue_coords;
        self.game_venues = game_venues;
    }

    pub fn index(&self) -> &GameIndex {
        &self.index
    }

    /// Compute one feature for a matchup. `per_calc` is consulted only for
    /// the few team-stat keys that embed player context; player/injury
    /// namespaces are dispatched by the shared context, not here.
    pub fn calculate_feature(
        &self,
        key: &str,
        home: &str,
        away: &str,
        season: &str,
        date: &GameDate,
        _per_calc: Option<&PerCalculator>,
        _venue_guid: Option<&str>,
    ) -> Result<f64> {
        let parsed = FeatureKey::parse(key)?;
        if parsed.is_player_feature() || parsed.is_injury_feature() {
            return Ok(0.0);
        }
        let value = match parsed.side {
            Side::Home => self.team_value(&parsed, home, season, date),
            Side::Away => self.team_value(&parsed, away, season, date),
            Side::Diff => {
                self.team_value(&parsed, home, season, date)
                    - self.team_value(&parsed, away, season, date)
            }
        };
        Ok(value)
    }

    /// Single-team value of a parsed key; 0.0 for anything the preloaded
    /// data cannot answer.
    fn team_value(&self, key: &FeatureKey, team: &str, season: &str, date: &GameDate) -> f64 {
        match key.stat.as_str() {
            "elo" => {
                return self
                    .elo
                    .as_ref()
                    .map(|e| e.rating_before(team, date))
                    .unwrap_or(0.0)
            }
            "rest" => return self.rest_days(team, season, date),
            "b2b" => {
                let rest = self.rest_days(team, season, date);
                return if rest == 1.0 { 1.0 } else { 0.0 };
            }
            "games_played" => {
                return self.window_games(team, season, date, &key.period).len() as f64
            }
            "travel" => return self.travel_mean(team, season, date, &key.period),
            _ => {}
        }

        if let CalcWeight::Blend(terms) = &key.weight {
            return self.blend_value(&key.stat, terms, team, season, date);
        }

        if key.period == TimePeriod::None {
            // Aggregating weights over no window are all-zero by
            // construction; the catalog rejects them, the handler degrades.
            return 0.0;
        }

        let window = self.window_games(team, season, date, &key.period);
        if window.is_empty() {
            return 0.0;
        }
        self.weighted_value(&key.stat, &key.weight, &window, team, season, date)
    }

    fn window_games(
        &self,
        team: &str,
        season: &str,
        date: &GameDate,
        period: &TimePeriod,
    ) -> Vec<Arc<Game>> {
        let before = self.index.team_games_before(team, season, date);
        match period {
            TimePeriod::Season => before.to_vec(),
            TimePeriod::Games(n) => {
                let n = *n as usize;
                if before.len() > n {
                    before[before.len() - n..].to_vec()
                } else {
                    before.to_vec()
                }
            }
            TimePeriod::Days(n) => {
                let start = date.minus_days(*n as i64).key();
                before
                    .iter()
                    .filter(|g| g.date.key() >= start)
                    .cloned()
                    .collect()
            }
            TimePeriod::None => Vec::new(),
        }
    }

    fn series(&self, stat: &str, window: &[Arc<Game>], team: &str) -> Vec<f64> {
        window
            .iter()
            .filter_map(|g| {
                let team_box = g.box_for(team)?;
                let opp_box = g.opponent_box_for(team)?;
                game_stat_value(stat, g, team_box, opp_box)
            })
            .collect()
    }

    fn weighted_value(
        &self,
        stat: &str,
        weight: &CalcWeight,
        window: &[Arc<Game>],
        team: &str,
        season: &str,
        date: &GameDate,
    ) -> f64 {
        match weight {
            CalcWeight::Raw => {
                if is_rate_stat(stat) {
                    let mut team_totals = WindowTotals::default();
                    let mut opp_totals = WindowTotals::default();
                    for g in window {
                        if let (Some(t), Some(o)) = (g.box_for(team), g.opponent_box_for(team)) {
                            team_totals.add(t, o);
                            opp_totals.add(o, t);
                        }
                    }
                    rate_from_totals(stat, &team_totals, &opp_totals)
                } else {
                    self.series(stat, window, team).iter().sum()
                }
            }
            CalcWeight::Avg => {
                let series = self.series(stat, window, team);
                if series.is_empty() {
                    0.0
                } else {
                    series.iter().sum::<f64>() / series.len() as f64
                }
            }
            CalcWeight::Std => {
                let series = self.series(stat, window, team);
                if series.len() < 2 {
                    return 0.0;
                }
                let mean = series.iter().sum::<f64>() / series.len() as f64;
                let var = series.iter().map(|v| (v - mean).powi(2)).sum::<f64>()
                    / (series.len() - 1) as f64;
                var.sqrt()
            }
            CalcWeight::Rel => {
                let series = self.series(stat, window, team);
                if series.is_empty() {
                    return 0.0;
                }
                let mean = series.iter().sum::<f64>() / series.len() as f64;
                let league = self.league_mean(stat, season, date);
                if league.abs() < 1e-12 {
                    0.0
                } else {
                    mean / league
                }
            }
            CalcWeight::Blend(_) | CalcWeight::Custom(_) => 0.0,
        }
    }

    /// Convex combination of sub-period averages of the underlying stat.
    fn blend_value(
        &self,
        stat: &str,
        terms: &[BlendTerm],
        team: &str,
        season: &str,
        date: &GameDate,
    ) -> f64 {
        let underlying = stat.strip_suffix("_blend").unwrap_or(stat);
        let mut total = 0.0;
        for term in terms {
            let period = match TimePeriod::parse(&term.token) {
                Ok(p) => p,
                Err(_) => return 0.0,
            };
            let window = self.window_games(team, season, date, &period);
            if window.is_empty() {
                continue;
            }
            let value =
                self.weighted_value(underlying, &CalcWeight::Avg, &window, team, season, date);
            total += term.weight * value;
        }
        total
    }

    /// League-season mean per-game value of a stat over games strictly
    /// before the date (no leakage), cached under the extension lock.
    fn league_mean(&self, stat: &str, season: &str, date: &GameDate) -> f64 {
        let key = (season.to_string(), stat.to_string(), date.key());
        {
            let cache = self.league_means.lock().expect("league mean lock poisoned");
            if let Some(v) = cache.get(&key) {
                return *v;
            }
        }
        let mut total = 0.0;
        let mut count = 0.0;
        for game in self
            .index
            .all_games()
            .iter()
            .filter(|g| g.season == season && g.date.key() < date.key())
        {
            for (team_box, opp_box) in [(&game.home, &game.away), (&game.away, &game.home)] {
                if let Some(v) = game_stat_value(stat, game, team_box, opp_box) {
                    total += v;
                    count += 1.0;
                }
            }
        }
        let mean = if count > 0.0 { total / count } else { 0.0 };
        let mut cache = self.league_means.lock().expect("league mean lock poisoned");
        cache.insert(key, mean);
        mean
    }

    fn rest_days(&self, team: &str, season: &str, date: &GameDate) -> f64 {
        let before = self.index.team_games_before(team, season, date);
        match before.last() {
            Some(last) => date.days_since(&last.date) as f64,
            None => 0.0,
        }
    }

    fn venue_for(&self, game: &Game) -> Option<(f64, f64)> {
        let guid = game
            .venue_guid
            .clone()
            .or_else(|| self.game_venues.get(&game.game_id).cloned())?;
        self.venue_coords.get(&guid).copied()
    }

    /// Mean great-circle distance between consecutive game venues in the
    /// trailing day window.
    fn travel_mean(&self, team: &str, season: &str, date: &GameDate, period: &TimePeriod) -> f64 {
        let window = match period {
            TimePeriod::Days(_) => self.window_games(team, season, date, period),
            _ => return 0.0,
        };
        let coords: Vec<(f64, f64)> = window.iter().filter_map(|g| self.venue_for(g)).collect();
        if coords.len() < 2 {
            return 0.0;
        }
        let legs: Vec<f64> = coords.windows(2).map(|w| haversine_km(w[0], w[1])).collect();
        legs.iter().sum::<f64>() / legs.len() as f64
    }
}

impl StatHandler {
    /// Convenience used by tests and serving to reject unparseable keys
    /// early without computing anything.
    pub fn validate_key(key: &str) -> Result<FeatureKey> {
        FeatureKey::parse(key).map_err(|e| CourtsideError::Feature(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courtside_types::LeagueConfig;

    fn team_box(name: &str, points: f64, assists: f64) -> TeamBox {
        TeamBox {
            name: name.to_string(),
            points,
            fg_made: points / 2.4,
            fg_att: points / 1.1,
            three_made: 10.0,
            three_att: 30.0,
            ft_made: 15.0,
            ft_att: 20.0,
            off_reb: 10.0,
            def_reb: 32.0,
            rebounds: 42.0,
            assists,
            turnovers: 14.0,
            steals: 7.0,
            blocks: 5.0,
            fouls: 18.0,
            ..TeamBox::default()
        }
    }

    fn game(id: &str, date: GameDate, home: &str, away: &str, hp: f64, ap: f64) -> Game {
        Game {
            game_id: id.to_string(),
            date,
            season: "2023-2024".to_string(),
            home: team_box(home, hp, 24.0),
            away: team_box(away, ap, 21.0),
            home_won: Some(hp > ap),
            game_type: None,
            venue_guid: Some(format!("venue-{}", home)),
        }
    }

    fn handler(games: Vec<Game>) -> StatHandler {
        let cfg = LeagueConfig::nba();
        StatHandler::new(Arc::new(GameIndex::build(games, &cfg)))
    }

    fn fixture() -> Vec<Game> {
        // BOS alternates big and small scoring nights; NYK is flat.
        let mut games = Vec::new();
        for day in 1..=10u32 {
            let hp = if day % 2 == 0 { 120.0 } else { 100.0 };
            games.push(game(
                &format!("g{}", day),
                GameDate::new(2023, 11, day),
                "BOS",
                "NYK",
                hp,
                95.0,
            ));
        }
        games
    }

    #[test]
    fn season_avg_points() {
        let h = handler(fixture());
        let v = h
            .calculate_feature(
                "points|season|avg|home",
                "BOS",
                "NYK",
                "2023-2024",
                &GameDate::new(2023, 11, 11),
                None,
                None,
            )
            .unwrap();
        assert!((v - 110.0).abs() < 1e-9);
    }

    #[test]
    fn games_window_bounds_the_sample() {
        let h = handler(fixture());
        let v = h
            .calculate_feature(
                "wins|games_3|raw|home",
                "BOS",
                "NYK",
                "2023-2024",
                &GameDate::new(2023, 11, 11),
                None,
                None,
            )
            .unwrap();
        assert_eq!(v, 3.0); // BOS won every game
    }

    #[test]
    fn days_window_is_season_bounded_and_trailing() {
        let h = handler(fixture());
        let v = h
            .calculate_feature(
                "games_played|days_5|raw|home",
                "BOS",
                "NYK",
                "2023-2024",
                &GameDate::new(2023, 11, 11),
                None,
                None,
            )
            .unwrap();
        assert_eq!(v, 5.0);
    }

    #[test]
    fn diff_is_home_minus_away() {
        let h = handler(fixture());
        let home = h
            .calculate_feature("points|season|avg|home", "BOS", "NYK", "2023-2024", &GameDate::new(2023, 11, 11), None, None)
            .unwrap();
        let away = h
            .calculate_feature("points|season|avg|away", "BOS", "NYK", "2023-2024", &GameDate::new(2023, 11, 11), None, None)
            .unwrap();
        let diff = h
            .calculate_feature("points|season|avg|diff", "BOS", "NYK", "2023-2024", &GameDate::new(2023, 11, 11), None, None)
            .unwrap();
        assert!((diff - (home - away)).abs() < 1e-9);
    }

    #[test]
    fn std_captures_volatility() {
        let h = handler(fixture());
        let vol = h
            .calculate_feature("points|season|std|home", "BOS", "NYK", "2023-2024", &GameDate::new(2023, 11, 11), None, None)
            .unwrap();
        let flat = h
            .calculate_feature("points|season|std|away", "BOS", "NYK", "2023-2024", &GameDate::new(2023, 11, 11), None, None)
            .unwrap();
        assert!(vol > 5.0);
        assert!(flat.abs() < 1e-9);
    }

    #[test]
    fn net_stat_differs_from_regular_counterpart() {
        // The test property from the design: across the sample,
        // Var(X_net - X) > 0 -- the net construction is not a relabeling.
        let h = handler(fixture());
        let mut deltas = Vec::new();
        for day in 3..=10u32 {
            let date = GameDate::new(2023, 11, day);
            let regular = h
                .calculate_feature("points|season|avg|home", "BOS", "NYK", "2023-2024", &date, None, None)
                .unwrap();
            let net = h
                .calculate_feature("points_net|season|avg|home", "BOS", "NYK", "2023-2024", &date, None, None)
                .unwrap();
            deltas.push(net - regular);
        }
        let mean = deltas.iter().sum::<f64>() / deltas.len() as f64;
        let var = deltas.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / deltas.len() as f64;
        assert!(var > 0.0 || mean.abs() > 1.0, "net must not be a relabeling");
    }

    #[test]
    fn rel_normalizes_against_league_mean() {
        let h = handler(fixture());
        // League mean points = (110 + 95) / 2 = 102.5; BOS avg = 110.
        let v = h
            .calculate_feature("points|season|rel|home", "BOS", "NYK", "2023-2024", &GameDate::new(2023, 11, 11), None, None)
            .unwrap();
        assert!((v - 110.0 / 102.5).abs() < 1e-9);
    }

    #[test]
    fn rest_and_back_to_back() {
        let h = handler(fixture());
        let rest = h
            .calculate_feature("rest|none|raw|home", "BOS", "NYK", "2023-2024", &GameDate::new(2023, 11, 11), None, None)
            .unwrap();
        assert_eq!(rest, 1.0);
        let b2b = h
            .calculate_feature("b2b|none|raw|home", "BOS", "NYK", "2023-2024", &GameDate::new(2023, 11, 11), None, None)
            .unwrap();
        assert_eq!(b2b, 1.0);
        let b2b_later = h
            .calculate_feature("b2b|none|raw|home", "BOS", "NYK", "2023-2024", &GameDate::new(2023, 11, 14), None, None)
            .unwrap();
        assert_eq!(b2b_later, 0.0);
    }

    #[test]
    fn blend_combines_sub_period_averages() {
        let h = handler(fixture());
        let date = GameDate::new(2023, 11, 11);
        let season = h
            .calculate_feature("points|season|avg|home", "BOS", "NYK", "2023-2024", &date, None, None)
            .unwrap();
        let games4 = h
            .calculate_feature("points|games_4|avg|home", "BOS", "NYK", "2023-2024", &date, None, None)
            .unwrap();
        let blended = h
            .calculate_feature(
                "points_blend|none|blend:season:0.75/games_4:0.25|home",
                "BOS",
                "NYK",
                "2023-2024",
                &date,
                None,
                None,
            )
            .unwrap();
        assert!((blended - (0.75 * season + 0.25 * games4)).abs() < 1e-9);
    }

    #[test]
    fn travel_uses_consecutive_venue_distances() {
        let mut games = vec![
            game("t1", GameDate::new(2023, 11, 1), "BOS", "NYK", 100.0, 90.0),
            game("t2", GameDate::new(2023, 11, 3), "LAL", "BOS", 90.0, 100.0),
            game("t3", GameDate::new(2023, 11, 5), "BOS", "LAL", 100.0, 90.0),
        ];
        for g in &mut games {
            g.venue_guid = Some(format!("venue-{}", g.home.name));
        }
        let mut h = handler(games);
        let mut coords = HashMap::new();
        coords.insert("venue-BOS".to_string(), (42.3662, -71.0621));
        coords.insert("venue-LAL".to_string(), (34.0430, -118.2673));
        h.set_venues(coords, HashMap::new());

        let v = h
            .calculate_feature("travel|days_12|avg|home", "BOS", "NYK", "2023-2024", &GameDate::new(2023, 11, 7), None, None)
            .unwrap();
        // Boston -> LA -> Boston: both legs are ~4,170 km.
        assert!(v > 4000.0 && v < 4400.0);
    }

    #[test]
    fn missing_data_yields_zero_and_malformed_keys_raise() {
        let h = handler(fixture());
        let v = h
            .calculate_feature("points|season|avg|home", "MIA", "ORL", "2019-2020", &GameDate::new(2020, 1, 1), None, None)
            .unwrap();
        assert_eq!(v, 0.0);
        assert!(h
            .calculate_feature("points|banana|avg|home", "BOS", "NYK", "2023-2024", &GameDate::new(2023, 11, 2), None, None)
            .is_err());
    }
}
