//! Player efficiency ratings
//!
//! Computes pace-adjusted PER strictly before a cutoff date and aggregates
//! it into the team-level talent and injury features of the master table.
//! League-season constants (factor, VOP, DRB%) and per-team pace are
//! materialized once per season at build time; per-player aggregation is
//! cutoff-aware so no game on or after the feature date leaks in.

use std::collections::HashMap;
use std::sync::Arc;

use courtside_types::GameDate;

use crate::games::{Game, PlayerGameLine};

const MIN_QUALIFIED_PLAYERS: usize = 5;
const QUALIFIED_MPG: f64 = 10.0;
const ROTATION_MPG: f64 = 15.0;
const TEAM_MINUTES: f64 = 240.0;
const SHARE_CLAMP: f64 = 1.5;
const SHARE_EPS: f64 = 1e-6;

/// League-wide constants for one season.
#[derive(Debug, Clone)]
pub struct LeagueSeasonStats {
    pub factor: f64,
    pub vop: f64,
    pub drbp: f64,
    pub pace: f64,
    pub ft_per_pf: f64,
    pub fta_per_pf: f64,
    /// League-average unadjusted PER, used to normalize to the 15.0 scale.
    pub avg_uper: f64,
}

/// Season totals a team accumulated, used for the team context terms of the
/// PER formula and for pace adjustment.
#[derive(Debug, Clone, Default)]
struct TeamSeasonTotals {
    games: f64,
    fg_made: f64,
    assists: f64,
    possessions: f64,
}

/// One player's rating snapshot before a cutoff.
#[derive(Debug, Clone)]
pub struct PlayerPer {
    pub player_id: String,
    pub per: f64,
    pub mpg: f64,
    pub recent_mpg: f64,
    pub games: usize,
    pub starter: bool,
}

/// Team-level aggregation of player ratings.
#[derive(Debug, Clone, Default)]
pub struct TeamPerSummary {
    pub players: Vec<PlayerPer>,
    pub per_mean: f64,
    pub per_weighted_mpg: f64,
    pub starters_mean: f64,
    pub weighted_min_total: f64,
    pub top3_sum: f64,
    pub available: bool,
}

/// Injury-aware aggregates against a list of unavailable players.
#[derive(Debug, Clone, Default)]
pub struct InjuryImpact {
    pub severity: f64,
    pub top1_per: f64,
    pub top3_sum: f64,
    pub weighted_min: f64,
    pub min_lost: f64,
    pub rotation_per: f64,
    pub impact: f64,
}

/// Computes PER and team aggregates from preloaded player lines.
pub struct PerCalculator {
    lines_by_player: HashMap<(String, String), Vec<Arc<PlayerGameLine>>>,
    lines_by_team: HashMap<(String, String), Vec<Arc<PlayerGameLine>>>,
    league: HashMap<String, LeagueSeasonStats>,
    team_totals: HashMap<(String, String), TeamSeasonTotals>,
}

impl PerCalculator {
    /// Build from the game corpus (league constants, team pace) and player
    /// lines. `preload_seasons` bounds memory by dropping everything else.
    pub fn build(
        games: &[Arc<Game>],
        lines: Vec<PlayerGameLine>,
        preload_seasons: Option<&[String]>,
    ) -> Self {
        let season_ok = |season: &str| match preload_seasons {
            Some(list) => list.iter().any(|s| s == season),
            None => true,
        };

        let mut team_totals: HashMap<(String, String), TeamSeasonTotals> = HashMap::new();
        struct LeagueTotals {
            fg: f64,
            fga: f64,
            ft: f64,
            fta: f64,
            ast: f64,
            orb: f64,
            trb: f64,
            tov: f64,
            pts: f64,
            pf: f64,
            possessions: f64,
            team_games: f64,
        }
        let mut league_raw: HashMap<String, LeagueTotals> = HashMap::new();

        for game in games.iter().filter(|g| g.is_completed()) {
            if !season_ok(&game.season) {
                continue;
            }
            for team_box in [&game.home, &game.away] {
                let entry = team_totals
                    .entry((game.season.clone(), team_box.name.clone()))
                    .or_default();
                entry.games += 1.0;
                entry.fg_made += team_box.fg_made;
                entry.assists += team_box.assists;
                entry.possessions += team_box.possessions();

                let league = league_raw.entry(game.season.clone()).or_insert(LeagueTotals {
                    fg: 0.0,
                    fga: 0.0,
                    ft: 0.0,
                    fta: 0.0,
                    ast: 0.0,
                    orb: 0.0,
                    trb: 0.0,
                    tov: 0.0,
                    pts: 0.0,
                    pf: 0.0,
                    possessions: 0.0,
                    team_games: 0.0,
                });
                league.fg += team_box.fg_made;
                league.fga += team_box.fg_att;
                league.ft += team_box.ft_made;
                league.fta += team_box.ft_att;
                league.ast += team_box.assists;
                league.orb += team_box.off_reb;
                league.trb += team_box.rebounds;
                league.tov += team_box.turnovers;
                league.pts += team_box.points;
                league.pf += team_box.fouls;
                league.possessions += team_box.possessions();
                league.team_games += 1.0;
            }
        }

        let mut lines_by_player: HashMap<(String, String), Vec<Arc<PlayerGameLine>>> = HashMap::new();
        let mut lines_by_team: HashMap<(String, String), Vec<Arc<PlayerGameLine>>> = HashMap::new();
        for line in lines {
            if !season_ok(&line.season) || !line.played() {
                continue;
            }
            let line = Arc::new(line);
            lines_by_player
                .entry((line.season.clone(), line.player_id.clone()))
                .or_default()
                .push(Arc::clone(&line));
            lines_by_team
                .entry((line.season.clone(), line.team.clone()))
                .or_default()
                .push(line);
        }
        for list in lines_by_player.values_mut() {
            list.sort_by_key(|l| l.date.key());
        }
        for list in lines_by_team.values_mut() {
            list.sort_by_key(|l| l.date.key());
        }

        let mut league: HashMap<String, LeagueSeasonStats> = HashMap::new();
        for (season, raw) in &league_raw {
            if raw.fg <= 0.0 || raw.ft <= 0.0 || raw.trb <= 0.0 || raw.pf <= 0.0 {
                continue;
            }
            let factor = (2.0 / 3.0) - (0.5 * (raw.ast / raw.fg)) / (2.0 * (raw.fg / raw.ft));
            let vop = raw.pts / (raw.fga - raw.orb + raw.tov + 0.44 * raw.fta);
            let drbp = (raw.trb - raw.orb) / raw.trb;
            let pace = if raw.team_games > 0.0 {
                raw.possessions / raw.team_games
            } else {
                0.0
            };
            league.insert(
                season.clone(),
                LeagueSeasonStats {
                    factor,
                    vop,
                    drbp,
                    pace,
                    ft_per_pf: raw.ft / raw.pf,
                    fta_per_pf: raw.fta / raw.pf,
                    avg_uper: 0.0,
                },
            );
        }

        let mut calc = Self {
            lines_by_player,
            lines_by_team,
            league,
            team_totals,
        };

        // League-average uPER per season, for normalization to 15.0.
        let seasons: Vec<String> = calc.league.keys().cloned().collect();
        for season in seasons {
            let mut total = 0.0;
            let mut count = 0.0;
            let players: Vec<(String, String)> = calc
                .lines_by_player
                .keys()
                .filter(|(s, _)| *s == season)
                .cloned()
                .collect();
            for (s, player_id) in players {
                let lines = calc.lines_by_player.get(&(s.clone(), player_id.clone()));
                if let Some(lines) = lines {
                    let minutes: f64 = lines.iter().map(|l| l.minutes).sum();
                    if minutes < 100.0 {
                        continue;
                    }
                    let team = lines.last().map(|l| l.team.clone()).unwrap_or_default();
                    if let Some(uper) = calc.uper_from_lines(lines, &team, &s) {
                        total += uper;
                        count += 1.0;
                    }
                }
            }
            if count > 0.0 {
                if let Some(stats) = calc.league.get_mut(&season) {
                    stats.avg_uper = total / count;
                }
            }
        }

        calc
    }

    pub fn league_stats(&self, season: &str) -> Option<&LeagueSeasonStats> {
        self.league.get(season)
    }

    pub fn seasons(&self) -> Vec<String> {
        let mut out: Vec<String> = self.league.keys().cloned().collect();
        out.sort();
        out
    }

    fn team_pace(&self, team: &str, season: &str) -> Option<f64> {
        let totals = self
            .team_totals
            .get(&(season.to_string(), team.to_string()))?;
        if totals.games > 0.0 {
            Some(totals.possessions / totals.games)
        } else {
            None
        }
    }

    /// Unadjusted PER from a set of lines, using season-level team and
    /// league context.
    fn uper_from_lines(&self, lines: &[Arc<PlayerGameLine>], team: &str, season: &str) -> Option<f64> {
        let lg = self.league.get(season)?;
        let totals = self
            .team_totals
            .get(&(season.to_string(), team.to_string()))?;
        if totals.fg_made <= 0.0 {
            return None;
        }
        let tm_ast_fg = totals.assists / totals.fg_made;

        let mut mp = 0.0;
        let mut fg = 0.0;
        let mut fga = 0.0;
        let mut ft = 0.0;
        let mut fta = 0.0;
        let mut three = 0.0;
        let mut ast = 0.0;
        let mut trb = 0.0;
        let mut orb = 0.0;
        let mut stl = 0.0;
        let mut blk = 0.0;
        let mut tov = 0.0;
        let mut pf = 0.0;
        for line in lines {
            mp += line.minutes;
            fg += line.fg_made;
            fga += line.fg_att;
            ft += line.ft_made;
            fta += line.ft_att;
            three += line.three_made;
            ast += line.assists;
            trb += line.rebounds;
            orb += line.off_reb;
            stl += line.steals;
            blk += line.blocks;
            tov += line.turnovers;
            pf += line.fouls;
        }
        if mp <= 0.0 {
            return None;
        }

        let uper = (1.0 / mp)
            * (three
                + (2.0 / 3.0) * ast
                + (2.0 - lg.factor * tm_ast_fg) * fg
                + ft * 0.5 * (1.0 + (1.0 - tm_ast_fg) + (2.0 / 3.0) * tm_ast_fg)
                - lg.vop * tov
                - lg.vop * lg.drbp * (fga - fg)
                - lg.vop * 0.44 * (0.44 + 0.56 * lg.drbp) * (fta - ft)
                + lg.vop * (1.0 - lg.drbp) * (trb - orb)
                + lg.vop * lg.drbp * orb
                + lg.vop * stl
                + lg.vop * lg.drbp * blk
                - pf * (lg.ft_per_pf - 0.44 * lg.fta_per_pf * lg.vop));
        Some(uper)
    }

    /// Pace-adjusted, league-normalized PER for a player, using only games
    /// strictly before `before_date`.
    pub fn get_player_per_before_date(
        &self,
        player_id: &str,
        team: &str,
        season: &str,
        before_date: &GameDate,
    ) -> Option<f64> {
        let lines = self
            .lines_by_player
            .get(&(season.to_string(), player_id.to_string()))?;
        let cutoff = before_date.key();
        let end = lines.partition_point(|l| l.date.key() < cutoff);
        let window = &lines[..end];
        if window.is_empty() {
            return None;
        }
        let uper = self.uper_from_lines(window, team, season)?;
        let lg = self.league.get(season)?;
        let pace_adj = match self.team_pace(team, season) {
            Some(team_pace) if team_pace > 0.0 && lg.pace > 0.0 => lg.pace / team_pace,
            _ => 1.0,
        };
        let norm = if lg.avg_uper.abs() > 1e-9 {
            15.0 / lg.avg_uper
        } else {
            1.0
        };
        Some(uper * pace_adj * norm)
    }

    /// Per-player ratings for a team before a cutoff, with minutes context.
    pub fn team_summary(&self, team: &str, season: &str, before_date: &GameDate) -> TeamPerSummary {
        let mut summary = TeamPerSummary::default();
        let lines = match self
            .lines_by_team
            .get(&(season.to_string(), team.to_string()))
        {
            Some(lines) => lines,
            None => return summary,
        };
        let cutoff = before_date.key();

        let mut per_player: HashMap<&str, Vec<&Arc<PlayerGameLine>>> = HashMap::new();
        for line in lines.iter().filter(|l| l.date.key() < cutoff) {
            per_player.entry(&line.player_id).or_default().push(line);
        }

        for (player_id, player_lines) in per_player {
            let games = player_lines.len();
            let minutes: f64 = player_lines.iter().map(|l| l.minutes).sum();
            let mpg = minutes / games as f64;
            let recent: Vec<&&Arc<PlayerGameLine>> =
                player_lines.iter().rev().take(5).collect();
            let recent_mpg =
                recent.iter().map(|l| l.minutes).sum::<f64>() / recent.len().max(1) as f64;
            let starter_games = player_lines.iter().filter(|l| l.starter).count();
            let per = match self.get_player_per_before_date(player_id, team, season, before_date) {
                Some(v) => v,
                None => continue,
            };
            summary.players.push(PlayerPer {
                player_id: player_id.to_string(),
                per,
                mpg,
                recent_mpg,
                games,
                starter: starter_games * 2 >= games,
            });
        }

        if summary.players.is_empty() {
            return summary;
        }
        summary
            .players
            .sort_by(|a, b| b.per.partial_cmp(&a.per).unwrap_or(std::cmp::Ordering::Equal));

        let n = summary.players.len() as f64;
        summary.per_mean = summary.players.iter().map(|p| p.per).sum::<f64>() / n;
        let minute_total: f64 = summary.players.iter().map(|p| p.mpg).sum();
        if minute_total > 0.0 {
            summary.per_weighted_mpg = summary
                .players
                .iter()
                .map(|p| p.per * p.mpg)
                .sum::<f64>()
                / minute_total;
        }
        let starters: Vec<&PlayerPer> = summary.players.iter().filter(|p| p.starter).collect();
        if !starters.is_empty() {
            summary.starters_mean =
                starters.iter().map(|p| p.per).sum::<f64>() / starters.len() as f64;
        }
        summary.weighted_min_total = summary
            .players
            .iter()
            .map(|p| p.per * p.mpg / 48.0)
            .sum();
        summary.top3_sum = summary.players.iter().take(3).map(|p| p.per).sum();
        summary.available = summary
            .players
            .iter()
            .filter(|p| p.mpg >= QUALIFIED_MPG)
            .count()
            >= MIN_QUALIFIED_PLAYERS;
        summary
    }

    fn top_avg(summary: &TeamPerSummary, n: usize) -> f64 {
        let top: Vec<&PlayerPer> = summary.players.iter().take(n).collect();
        if top.is_empty() {
            return 0.0;
        }
        top.iter().map(|p| p.per).sum::<f64>() / top.len() as f64
    }

    fn top_weighted_mpg(summary: &TeamPerSummary, n: usize) -> f64 {
        let top: Vec<&PlayerPer> = summary.players.iter().take(n).collect();
        let minute_total: f64 = top.iter().map(|p| p.mpg).sum();
        if minute_total <= 0.0 {
            return 0.0;
        }
        top.iter().map(|p| p.per * p.mpg).sum::<f64>() / minute_total
    }

    fn nth_per(summary: &TeamPerSummary, n: usize) -> f64 {
        summary.players.get(n).map(|p| p.per).unwrap_or(0.0)
    }

    /// Injury aggregates for a team against a list of unavailable players.
    pub fn injury_impact(&self, summary: &TeamPerSummary, injured: &[String]) -> InjuryImpact {
        let mut out = InjuryImpact::default();
        let injured_players: Vec<&PlayerPer> = summary
            .players
            .iter()
            .filter(|p| injured.iter().any(|id| *id == p.player_id))
            .collect();
        if injured_players.is_empty() {
            return out;
        }

        let mut pers: Vec<f64> = injured_players.iter().map(|p| p.per).collect();
        pers.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
        out.top1_per = pers.first().copied().unwrap_or(0.0);
        out.top3_sum = pers.iter().take(3).sum();
        out.weighted_min = injured_players.iter().map(|p| p.per * p.mpg / 48.0).sum();
        out.min_lost = injured_players.iter().map(|p| p.mpg).sum();
        out.severity = (out.min_lost / TEAM_MINUTES).clamp(0.0, 1.0);
        let rotation: Vec<&&PlayerPer> = injured_players
            .iter()
            .filter(|p| p.mpg >= ROTATION_MPG)
            .collect();
        if !rotation.is_empty() {
            out.rotation_per = rotation.iter().map(|p| p.per).sum::<f64>() / rotation.len() as f64;
        }
        // Blended impact: severity:0.45 / top1_per:0.35 / rotation:0.20,
        // with PER terms scaled into the unit range.
        out.impact =
            0.45 * out.severity + 0.35 * (out.top1_per / 25.0) + 0.20 * (out.rotation_per / 25.0);
        out
    }

    /// Clamped share of an injured aggregate against the team denominator.
    pub fn share(numerator: f64, denominator: f64) -> f64 {
        if denominator <= 0.0 {
            return 0.0;
        }
        (numerator / (denominator + SHARE_EPS)).clamp(0.0, SHARE_CLAMP)
    }

    /// The full block of player-talent and injury features for a matchup.
    /// Injured players come from the game document at training time and
    /// from roster flags at serving time.
    pub fn get_game_per_features(
        &self,
        home: &str,
        away: &str,
        season: &str,
        game_date: &GameDate,
        injured_players: Option<&HashMap<String, Vec<String>>>,
    ) -> HashMap<String, f64> {
        let mut out = HashMap::new();
        let home_summary = self.team_summary(home, season, game_date);
        let away_summary = self.team_summary(away, season, game_date);

        let mut put = |stem: &str, home_v: f64, away_v: f64| {
            out.insert(format!("{}|home", stem), home_v);
            out.insert(format!("{}|away", stem), away_v);
            out.insert(format!("{}|diff", stem), home_v - away_v);
        };

        put(
            "player_team_per|season|weighted_MPG",
            home_summary.per_weighted_mpg,
            away_summary.per_weighted_mpg,
        );
        put(
            "player_starters_per|season|avg",
            home_summary.starters_mean,
            away_summary.starters_mean,
        );
        let recency = |s: &TeamPerSummary| {
            s.players
                .first()
                .map(|p| p.per * (p.recent_mpg / 36.0))
                .unwrap_or(0.0)
        };
        put(
            "player_per_1|none|weighted_MIN_REC",
            recency(&home_summary),
            recency(&away_summary),
        );
        for n in 0..3 {
            put(
                &format!("player_per_{}|season|raw", n + 1),
                Self::nth_per(&home_summary, n),
                Self::nth_per(&away_summary, n),
            );
        }
        for n in 1..=3 {
            put(
                &format!("player_per|season|top{}_avg", n),
                Self::top_avg(&home_summary, n),
                Self::top_avg(&away_summary, n),
            );
            put(
                &format!("player_per|season|top{}_weighted_MPG", n),
                Self::top_weighted_mpg(&home_summary, n),
                Self::top_weighted_mpg(&away_summary, n),
            );
        }
        put(
            "per_available|none|raw",
            if home_summary.available { 1.0 } else { 0.0 },
            if away_summary.available { 1.0 } else { 0.0 },
        );

        if let Some(injured) = injured_players {
            let empty = Vec::new();
            let home_injured = injured.get(home).unwrap_or(&empty);
            let away_injured = injured.get(away).unwrap_or(&empty);
            let home_impact = self.injury_impact(&home_summary, home_injured);
            let away_impact = self.injury_impact(&away_summary, away_injured);

            put("inj_severity|none|raw", home_impact.severity, away_impact.severity);
            put("inj_per|none|top1_avg", home_impact.top1_per, away_impact.top1_per);
            put("inj_per|none|top3_sum", home_impact.top3_sum, away_impact.top3_sum);
            put(
                "inj_per|none|weighted_MIN",
                home_impact.weighted_min,
                away_impact.weighted_min,
            );
            put("inj_min_lost|none|raw", home_impact.min_lost, away_impact.min_lost);
            put(
                "inj_rotation_per|none|raw",
                home_impact.rotation_per,
                away_impact.rotation_per,
            );
            put(
                "inj_impact|none|blend:severity:0.45/top1_per:0.35/rotation:0.20",
                home_impact.impact,
                away_impact.impact,
            );
            put(
                "inj_per_share|none|top3_sum",
                Self::share(home_impact.top3_sum, home_summary.top3_sum),
                Self::share(away_impact.top3_sum, away_summary.top3_sum),
            );
            put(
                "inj_per_weighted_share|none|weighted_MIN",
                Self::share(home_impact.weighted_min, home_summary.weighted_min_total),
                Self::share(away_impact.weighted_min, away_summary.weighted_min_total),
            );
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::games::TeamBox;

    fn team_box(name: &str, points: f64) -> TeamBox {
        TeamBox {
            name: name.to_string(),
            points,
            fg_made: 40.0,
            fg_att: 85.0,
            three_made: 12.0,
            three_att: 32.0,
            ft_made: 18.0,
            ft_att: 22.0,
            off_reb: 10.0,
            def_reb: 33.0,
            rebounds: 43.0,
            assists: 25.0,
            turnovers: 13.0,
            steals: 7.0,
            blocks: 5.0,
            fouls: 19.0,
            ..TeamBox::default()
        }
    }

    fn game(id: &str, date: GameDate, home: &str, away: &str) -> Arc<Game> {
        Arc::new(Game {
            game_id: id.to_string(),
            date,
            season: "2023-2024".to_string(),
            home: team_box(home, 110.0),
            away: team_box(away, 102.0),
            home_won: Some(true),
            game_type: None,
            venue_guid: None,
        })
    }

    fn line(player: &str, team: &str, game_id: &str, date: GameDate, minutes: f64, points: f64) -> PlayerGameLine {
        PlayerGameLine {
            player_id: player.to_string(),
            game_id: game_id.to_string(),
            team: team.to_string(),
            opponent: "OPP".to_string(),
            date,
            season: "2023-2024".to_string(),
            minutes,
            points,
            rebounds: 6.0,
            off_reb: 1.0,
            assists: 4.0,
            turnovers: 2.0,
            steals: 1.0,
            blocks: 0.5,
            fouls: 2.0,
            fg_made: points / 2.5,
            fg_att: points / 1.2,
            three_made: 1.0,
            three_att: 4.0,
            ft_made: 3.0,
            ft_att: 4.0,
            plus_minus: 3.0,
            starter: minutes >= 30.0,
            did_not_play: false,
        }
    }

    fn fixture() -> (Vec<Arc<Game>>, Vec<PlayerGameLine>) {
        let mut games = Vec::new();
        let mut lines = Vec::new();
        for day in 1..=12 {
            let date = GameDate::new(2023, 11, day);
            let id = format!("g{}", day);
            games.push(game(&id, date, "BOS", "NYK"));
            lines.push(line("star", "BOS", &id, date, 36.0, 30.0));
            lines.push(line("role", "BOS", &id, date, 24.0, 10.0));
            lines.push(line("bench", "BOS", &id, date, 12.0, 4.0));
            lines.push(line("nyk1", "NYK", &id, date, 34.0, 22.0));
            lines.push(line("nyk2", "NYK", &id, date, 20.0, 8.0));
        }
        (games, lines)
    }

    #[test]
    fn per_uses_only_games_before_cutoff() {
        let (games, lines) = fixture();
        let calc = PerCalculator::build(&games, lines, None);
        let early = GameDate::new(2023, 11, 2);
        let late = GameDate::new(2023, 12, 1);
        // Only one game before Nov 2; none before Nov 1.
        assert!(calc
            .get_player_per_before_date("star", "BOS", "2023-2024", &GameDate::new(2023, 11, 1))
            .is_none());
        assert!(calc
            .get_player_per_before_date("star", "BOS", "2023-2024", &early)
            .is_some());
        assert!(calc
            .get_player_per_before_date("star", "BOS", "2023-2024", &late)
            .is_some());
    }

    #[test]
    fn better_player_rates_higher() {
        let (games, lines) = fixture();
        let calc = PerCalculator::build(&games, lines, None);
        let date = GameDate::new(2023, 12, 1);
        let star = calc
            .get_player_per_before_date("star", "BOS", "2023-2024", &date)
            .unwrap();
        let bench = calc
            .get_player_per_before_date("bench", "BOS", "2023-2024", &date)
            .unwrap();
        assert!(star > bench);
    }

    #[test]
    fn team_summary_orders_players_by_per() {
        let (games, lines) = fixture();
        let calc = PerCalculator::build(&games, lines, None);
        let summary = calc.team_summary("BOS", "2023-2024", &GameDate::new(2023, 12, 1));
        assert_eq!(summary.players.len(), 3);
        assert_eq!(summary.players[0].player_id, "star");
        assert!(summary.per_weighted_mpg > 0.0);
        assert!(!summary.available); // only 3 qualified players
    }

    #[test]
    fn injury_impact_counts_only_listed_players() {
        let (games, lines) = fixture();
        let calc = PerCalculator::build(&games, lines, None);
        let summary = calc.team_summary("BOS", "2023-2024", &GameDate::new(2023, 12, 1));
        let impact = calc.injury_impact(&summary, &["star".to_string()]);
        assert!(impact.top1_per > 0.0);
        assert!((impact.min_lost - 36.0).abs() < 1e-9);
        assert!(impact.severity > 0.0 && impact.severity <= 1.0);

        let none = calc.injury_impact(&summary, &["unknown".to_string()]);
        assert_eq!(none.min_lost, 0.0);
    }

    #[test]
    fn share_is_clamped() {
        assert_eq!(PerCalculator::share(10.0, 0.0), 0.0);
        assert!(PerCalculator::share(100.0, 10.0) <= 1.5);
        assert!(PerCalculator::share(5.0, 10.0) > 0.0);
    }

    #[test]
    fn game_features_include_all_sides() {
        let (games, lines) = fixture();
        let calc = PerCalculator::build(&games, lines, None);
        let features = calc.get_game_per_features(
            "BOS",
            "NYK",
            "2023-2024",
            &GameDate::new(2023, 12, 1),
            None,
        );
        assert!(features.contains_key("player_per|season|top1_avg|home"));
        assert!(features.contains_key("player_per|season|top1_avg|away"));
        let diff = features["player_per|season|top1_avg|diff"];
        let home = features["player_per|season|top1_avg|home"];
        let away = features["player_per|season|top1_avg|away"];
        assert!((diff - (home - away)).abs() < 1e-9);
    }
}
