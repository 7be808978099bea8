use std::collections::BTreeMap;

use crate::config::{AggregateConfig, CombinerConfig};
use crate::games::TeamId;
use crate::normalize::{winsorize, zscore_sigmoid};
use crate::shrinkage::shrink_all;
use crate::sos::StrengthLookup;
use crate::window::WindowedGame;

/// A ranked team's surviving games with their recency weights (same order).
#[derive(Debug, Clone, PartialEq)]
pub struct TeamGames {
    pub games: Vec<WindowedGame>,
    pub recency: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OffDef {
    pub games_played: usize,
    /// Weighted goals for.
    pub off_raw: f64,
    /// Ridge-regularized weighted goals against (lower is better).
    pub def_raw: f64,
    pub metric_outlier: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Strength {
    pub off_shrunk: f64,
    pub def_shrunk: f64,
    pub off_norm: f64,
    pub def_norm: f64,
    /// Blend of normalized offense and defense, in [0, 1].
    pub abs_strength: f64,
}

#[derive(Debug, Clone, Default)]
pub struct Aggregation {
    pub off_def: BTreeMap<TeamId, OffDef>,
    pub strength: BTreeMap<TeamId, Strength>,
    /// Effective per-game weights after adaptive K, summing to 1 per team.
    pub weights: BTreeMap<TeamId, Vec<f64>>,
    pub passes: usize,
}

impl Aggregation {
    pub fn abs_strengths(&self) -> BTreeMap<TeamId, f64> {
        self.strength
            .iter()
            .map(|(id, s)| (id.clone(), s.abs_strength))
            .collect()
    }
}

/// Offense/defense aggregation refined by adaptive-K passes.
///
/// Pass 0 uses plain recency weights; each later pass reweights games by the
/// strength gap measured on the previous pass.
pub fn aggregate(
    teams: &BTreeMap<TeamId, TeamGames>,
    cfg: &AggregateConfig,
    combiner: &CombinerConfig,
    lookup: &StrengthLookup<'_>,
) -> Aggregation {
    let passes = cfg.adaptive_k_passes.max(1);
    let mut weights: BTreeMap<TeamId, Vec<f64>> = teams
        .iter()
        .map(|(id, t)| (id.clone(), t.recency.clone()))
        .collect();
    let mut out = Aggregation::default();

    for pass in 0..passes {
        if pass > 0 {
            let prior = out.abs_strengths();
            let scoped = lookup.with_in_cohort(&prior);
            weights = adaptive_k_weights(teams, &prior, &scoped, cfg.adaptive_k_beta);
        }
        let mut off_def = offense_defense(teams, &weights, cfg.ridge_lambda);
        dampen_metric_outliers(&mut off_def, cfg.team_outlier_z);
        let strength = strengths(&off_def, cfg.shrink_tau, combiner);
        out = Aggregation {
            off_def,
            strength,
            weights: weights.clone(),
            passes: pass + 1,
        };
    }
    out
}

pub fn offense_defense(
    teams: &BTreeMap<TeamId, TeamGames>,
    weights: &BTreeMap<TeamId, Vec<f64>>,
    ridge_lambda: f64,
) -> BTreeMap<TeamId, OffDef> {
    let mut raw: BTreeMap<TeamId, (usize, f64, f64)> = BTreeMap::new();
    for (id, t) in teams {
        let Some(w) = weights.get(id) else { continue };
        let mut gf = 0.0;
        let mut ga = 0.0;
        for (g, wi) in t.games.iter().zip(w) {
            gf += wi * g.goals_for;
            ga += wi * g.goals_against;
        }
        raw.insert(id.clone(), (t.games.len(), gf, ga));
    }
    if raw.is_empty() {
        return BTreeMap::new();
    }
    let mean_ga = raw.values().map(|(_, _, ga)| ga).sum::<f64>() / raw.len() as f64;

    raw.into_iter()
        .map(|(id, (n, gf, ga))| {
            let n_f = n as f64;
            let def = if n_f + ridge_lambda > 0.0 {
                (n_f * ga + ridge_lambda * mean_ga) / (n_f + ridge_lambda)
            } else {
                mean_ga
            };
            (
                id,
                OffDef {
                    games_played: n,
                    off_raw: gf,
                    def_raw: def,
                    metric_outlier: false,
                },
            )
        })
        .collect()
}

/// Winsorize cohort-level outliers in offense or defense and flag them.
pub fn dampen_metric_outliers(off_def: &mut BTreeMap<TeamId, OffDef>, z_cap: f64) {
    let mut off: Vec<f64> = off_def.values().map(|t| t.off_raw).collect();
    let mut def: Vec<f64> = off_def.values().map(|t| t.def_raw).collect();
    let off_flags = winsorize(&mut off, z_cap);
    let def_flags = winsorize(&mut def, z_cap);
    for (idx, t) in off_def.values_mut().enumerate() {
        let flagged_off = off_flags.get(idx).copied().unwrap_or(false);
        let flagged_def = def_flags.get(idx).copied().unwrap_or(false);
        if flagged_off || flagged_def {
            t.off_raw = off[idx];
            t.def_raw = def[idx];
            t.metric_outlier = true;
        }
    }
}

/// Shrink, normalize and blend offense/defense into a per-team strength.
pub fn strengths(
    off_def: &BTreeMap<TeamId, OffDef>,
    tau: f64,
    combiner: &CombinerConfig,
) -> BTreeMap<TeamId, Strength> {
    let games: BTreeMap<TeamId, usize> = off_def
        .iter()
        .map(|(id, t)| (id.clone(), t.games_played))
        .collect();
    let off: BTreeMap<TeamId, f64> =
        off_def.iter().map(|(id, t)| (id.clone(), t.off_raw)).collect();
    let def: BTreeMap<TeamId, f64> =
        off_def.iter().map(|(id, t)| (id.clone(), t.def_raw)).collect();
    let off_shrunk = shrink_all(&off, &games, tau);
    let def_shrunk = shrink_all(&def, &games, tau);

    let off_vals: Vec<f64> = off_shrunk.values().copied().collect();
    // Fewer goals against is better, so defense is normalized on its negation.
    let def_vals: Vec<f64> = def_shrunk.values().map(|v| -v).collect();
    let off_norm = zscore_sigmoid(&off_vals, combiner.norm_slope);
    let def_norm = zscore_sigmoid(&def_vals, combiner.norm_slope);

    let w_sum = combiner.w_off + combiner.w_def;
    off_shrunk
        .iter()
        .zip(def_shrunk.values())
        .enumerate()
        .map(|(idx, ((id, o), d))| {
            let on = off_norm[idx];
            let dn = def_norm[idx];
            let abs_strength = if w_sum > 0.0 {
                (combiner.w_off * on + combiner.w_def * dn) / w_sum
            } else {
                0.5 * (on + dn)
            };
            (
                id.clone(),
                Strength {
                    off_shrunk: *o,
                    def_shrunk: *d,
                    off_norm: on,
                    def_norm: dn,
                    abs_strength,
                },
            )
        })
        .collect()
}

/// Closer contests carry more signal: weight each game by `1 / (1 + beta * gap)`.
pub fn adaptive_k_weights(
    teams: &BTreeMap<TeamId, TeamGames>,
    prior: &BTreeMap<TeamId, f64>,
    lookup: &StrengthLookup<'_>,
    beta: f64,
) -> BTreeMap<TeamId, Vec<f64>> {
    teams
        .iter()
        .map(|(id, t)| {
            let own = prior.get(id).copied().unwrap_or(0.5);
            let mut w: Vec<f64> = t
                .games
                .iter()
                .zip(&t.recency)
                .map(|(g, r)| {
                    let opp = lookup.strength(&g.opponent).value;
                    r / (1.0 + beta * (own - opp).abs())
                })
                .collect();
            let total: f64 = w.iter().sum();
            if total > 0.0 {
                for x in &mut w {
                    *x /= total;
                }
            }
            (id.clone(), w)
        })
        .collect()
}
