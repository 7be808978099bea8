use std::cmp::Ordering;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::config::{CombinerConfig, ProvisionalConfig};
use crate::games::Cohort;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TeamStatus {
    Active,
    #[serde(rename = "Not Enough Ranked Games")]
    NotEnoughRankedGames,
}

impl TeamStatus {
    pub fn label(self) -> &'static str {
        match self {
            TeamStatus::Active => "Active",
            TeamStatus::NotEnoughRankedGames => "Not Enough Ranked Games",
        }
    }
}

/// Every layer's value for one ranked team, in pipeline order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamRanking {
    pub team_id: String,
    pub cohort: Cohort,
    pub status: TeamStatus,
    pub rank_in_cohort: Option<usize>,
    pub games_played: usize,
    pub last_game: Option<NaiveDate>,
    pub off_raw: f64,
    pub def_raw: f64,
    pub off_norm: f64,
    pub def_norm: f64,
    pub metric_outlier: bool,
    pub abs_strength: f64,
    pub sos: f64,
    pub sos_adj: f64,
    pub sos_norm: f64,
    pub bridge_count: usize,
    pub connectivity_factor: f64,
    pub perf_raw: f64,
    pub perf_centered: f64,
    pub powerscore_core: f64,
    pub provisional_mult: f64,
    pub powerscore_adj: f64,
    pub ml_residual: Option<f64>,
    pub ml_norm: f64,
    pub ml_scale: f64,
    pub ml_delta: f64,
    pub powerscore_blended: f64,
    pub power_score_final: f64,
}

/// A team seen in the cohort whose every game fell out of the window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnrankedTeam {
    pub team_id: String,
    pub status: TeamStatus,
    pub games_seen: usize,
}

/// The per-team inputs of the weighted blend, all on a [0, 1] or centred basis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Components {
    pub off_norm: f64,
    pub def_norm: f64,
    pub sos_norm: f64,
    pub perf_centered: f64,
}

pub fn combine(c: Components, cfg: &CombinerConfig) -> f64 {
    let weighted = cfg.w_off * c.off_norm
        + cfg.w_def * c.def_norm
        + cfg.w_sos * c.sos_norm
        + cfg.w_perf * c.perf_centered;
    (weighted / cfg.resolved_norm_const()).clamp(0.0, 1.0)
}

/// Linear ramp from `floor` at zero games up to 1 at `min_games`.
pub fn provisional_multiplier(games_played: usize, cfg: &ProvisionalConfig) -> f64 {
    if cfg.min_games == 0 || games_played >= cfg.min_games {
        return 1.0;
    }
    cfg.floor + (1.0 - cfg.floor) * games_played as f64 / cfg.min_games as f64
}

pub fn status_for(games_played: usize, cfg: &ProvisionalConfig) -> TeamStatus {
    if games_played == 0 || games_played < cfg.min_games {
        TeamStatus::NotEnoughRankedGames
    } else {
        TeamStatus::Active
    }
}

pub fn anchor_scale(blended: f64, anchor: f64) -> f64 {
    blended.clamp(0.0, 1.0) * anchor
}

/// Blended score descending, then games played descending, then team id.
pub fn cohort_order(a: &TeamRanking, b: &TeamRanking) -> Ordering {
    b.powerscore_blended
        .total_cmp(&a.powerscore_blended)
        .then_with(|| b.games_played.cmp(&a.games_played))
        .then_with(|| a.team_id.cmp(&b.team_id))
}

/// Sorts in place and assigns 1-based ranks.
pub fn assign_ranks(teams: &mut [TeamRanking]) {
    teams.sort_by(cohort_order);
    for (idx, t) in teams.iter_mut().enumerate() {
        t.rank_in_cohort = Some(idx + 1);
    }
}
