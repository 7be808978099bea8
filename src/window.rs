use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::config::WindowConfig;
use crate::games::{ResolvedGame, TeamId, Venue};

/// A game from one team's side after windowing and margin clipping.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowedGame {
    pub match_id: String,
    pub date: NaiveDate,
    pub age_days: i64,
    pub opponent: TeamId,
    pub goals_for: f64,
    pub goals_against: f64,
    pub venue: Venue,
}

impl WindowedGame {
    pub fn margin(&self) -> f64 {
        self.goals_for - self.goals_against
    }
}

#[derive(Debug, Clone, Default)]
pub struct WindowOutcome {
    /// Every team seen in the cohort, most recent game first. Empty means unranked.
    pub teams: BTreeMap<TeamId, Vec<WindowedGame>>,
    pub dropped_stale: usize,
    pub dropped_outliers: usize,
    pub dropped_over_cap: usize,
}

impl WindowOutcome {
    pub fn total_games(&self) -> usize {
        self.teams.values().map(Vec::len).sum()
    }
}

pub fn apply_window(
    games: &[ResolvedGame],
    reference: NaiveDate,
    cfg: &WindowConfig,
) -> WindowOutcome {
    let mut out = WindowOutcome::default();

    for g in games {
        let slot = out.teams.entry(g.team.clone()).or_default();
        let age_days = (reference - g.date).num_days();
        if age_days < 0 || age_days > cfg.window_days {
            out.dropped_stale += 1;
            continue;
        }
        let (gf, ga) = clip_score(g.goals_for, g.goals_against, cfg.goal_diff_cap);
        slot.push(WindowedGame {
            match_id: g.match_id.clone(),
            date: g.date,
            age_days,
            opponent: g.opponent.clone(),
            goals_for: gf,
            goals_against: ga,
            venue: g.venue,
        });
    }

    for team_games in out.teams.values_mut() {
        out.dropped_outliers += drop_margin_outliers(team_games, cfg);
        team_games
            .sort_by(|a, b| b.date.cmp(&a.date).then_with(|| a.match_id.cmp(&b.match_id)));
        if team_games.len() > cfg.max_games {
            out.dropped_over_cap += team_games.len() - cfg.max_games;
            team_games.truncate(cfg.max_games);
        }
    }
    out
}

/// Lower the winner's goals so the margin never exceeds `cap`.
///
/// Both perspective rows of a match clip to the same mirrored pair.
pub fn clip_score(goals_for: u32, goals_against: u32, cap: i32) -> (f64, f64) {
    let cap = cap.max(0) as u32;
    let (mut gf, mut ga) = (goals_for, goals_against);
    if gf > ga + cap {
        gf = ga + cap;
    } else if ga > gf + cap {
        ga = gf + cap;
    }
    (gf as f64, ga as f64)
}

/// Each game is scored against the team's other games, so a lone blowout
/// cannot inflate the spread it is measured by.
fn drop_margin_outliers(games: &mut Vec<WindowedGame>, cfg: &WindowConfig) -> usize {
    if games.len() < cfg.outlier_min_games.max(3) {
        return 0;
    }
    let margins: Vec<f64> = games.iter().map(WindowedGame::margin).collect();
    let total: f64 = margins.iter().sum();
    let total_sq: f64 = margins.iter().map(|m| m * m).sum();
    let rest = (margins.len() - 1) as f64;

    let keep: Vec<bool> = margins
        .iter()
        .map(|&m| {
            let mean = (total - m) / rest;
            let var = ((total_sq - m * m) / rest - mean * mean).max(0.0);
            let std = var.sqrt().max(cfg.outlier_min_std);
            ((m - mean) / std).abs() <= cfg.outlier_z_threshold
        })
        .collect();

    let before = games.len();
    let mut flags = keep.into_iter();
    games.retain(|_| flags.next().unwrap_or(true));
    before - games.len()
}
