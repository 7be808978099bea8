use std::collections::BTreeMap;

use crate::aggregate::TeamGames;
use crate::config::PerformanceConfig;
use crate::games::TeamId;
use crate::normalize::percentile_ranks;
use crate::sos::StrengthLookup;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Performance {
    /// Recency-weighted sum of (actual − expected) goal margin.
    pub perf_raw: f64,
    /// Cohort percentile of `perf_raw` minus 0.5.
    pub perf_centered: f64,
}

/// Over/under-performance against the margin the strength gap predicts.
pub fn performance(
    teams: &BTreeMap<TeamId, TeamGames>,
    lookup: &StrengthLookup<'_>,
    cfg: &PerformanceConfig,
) -> BTreeMap<TeamId, Performance> {
    let raw: Vec<(TeamId, f64)> = teams
        .iter()
        .map(|(id, t)| {
            let own = lookup.strength(id).value;
            let sum = t
                .games
                .iter()
                .zip(&t.recency)
                .map(|(g, w)| {
                    let expected = cfg.goal_scale * (own - lookup.strength(&g.opponent).value);
                    w * (g.margin() - expected)
                })
                .sum::<f64>();
            (id.clone(), sum)
        })
        .collect();

    let values: Vec<f64> = raw.iter().map(|(_, v)| *v).collect();
    let pct = percentile_ranks(&values);
    raw.into_iter()
        .zip(pct)
        .map(|((id, perf_raw), p)| {
            (
                id,
                Performance {
                    perf_raw,
                    perf_centered: p - 0.5,
                },
            )
        })
        .collect()
}
