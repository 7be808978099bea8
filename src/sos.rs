//! Strength of schedule.
//!
//! Opponent strength always resolves through one fallback chain:
//! in-cohort ranked strength, then the cross-age global lookup (converted to
//! this cohort's anchor scale), then a floor constant. Every value is clipped
//! to `[0, clip_max]`; `clip_max` sits above 1.0 because older opponents can
//! legitimately out-rate this cohort's own scale.
//!
//! Iteration is functional: each step reads an immutable [`SosSnapshot`] and
//! returns a fresh one.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::aggregate::TeamGames;
use crate::config::SosConfig;
use crate::games::TeamId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrengthSource {
    InCohort,
    CrossAge,
    Floor,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OpponentStrength {
    pub value: f64,
    pub source: StrengthSource,
}

/// Read-only cross-age lookup built by the first pass, on the absolute
/// (anchor-scaled) axis shared by every cohort.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GlobalStrengths {
    by_team: BTreeMap<TeamId, f64>,
}

impl GlobalStrengths {
    /// Keeps the larger value when a team shows up in several cohorts.
    pub fn insert_max(&mut self, id: &TeamId, value: f64) {
        let slot = self.by_team.entry(id.clone()).or_insert(value);
        if value > *slot {
            *slot = value;
        }
    }

    pub fn get(&self, id: &TeamId) -> Option<f64> {
        self.by_team.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.by_team.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_team.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StrengthLookup<'a> {
    in_cohort: Option<&'a BTreeMap<TeamId, f64>>,
    global: &'a GlobalStrengths,
    anchor: f64,
    floor: f64,
    clip_max: f64,
}

impl<'a> StrengthLookup<'a> {
    pub fn new(global: &'a GlobalStrengths, anchor: f64, cfg: &SosConfig) -> Self {
        Self {
            in_cohort: None,
            global,
            anchor,
            floor: cfg.floor,
            clip_max: cfg.clip_max,
        }
    }

    pub fn with_in_cohort<'b>(&self, ranked: &'b BTreeMap<TeamId, f64>) -> StrengthLookup<'b>
    where
        'a: 'b,
    {
        StrengthLookup {
            in_cohort: Some(ranked),
            global: self.global,
            anchor: self.anchor,
            floor: self.floor,
            clip_max: self.clip_max,
        }
    }

    pub fn is_ranked(&self, id: &TeamId) -> bool {
        self.in_cohort.is_some_and(|m| m.contains_key(id))
    }

    pub fn strength(&self, id: &TeamId) -> OpponentStrength {
        if let Some(v) = self.in_cohort.and_then(|m| m.get(id)) {
            return OpponentStrength {
                value: self.clip(*v),
                source: StrengthSource::InCohort,
            };
        }
        self.fallback(id)
    }

    /// The chain minus its in-cohort step.
    pub fn fallback(&self, id: &TeamId) -> OpponentStrength {
        if let Some(v) = self.global.get(id)
            && self.anchor > 0.0
        {
            return OpponentStrength {
                value: self.clip(v / self.anchor),
                source: StrengthSource::CrossAge,
            };
        }
        OpponentStrength {
            value: self.clip(self.floor),
            source: StrengthSource::Floor,
        }
    }

    fn clip(&self, v: f64) -> f64 {
        v.clamp(0.0, self.clip_max)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SosSnapshot {
    pub iteration: usize,
    pub values: BTreeMap<TeamId, f64>,
}

/// SOS₀: recency-weighted mean opponent strength.
pub fn direct_sos(teams: &BTreeMap<TeamId, TeamGames>, lookup: &StrengthLookup<'_>) -> SosSnapshot {
    let values = teams
        .iter()
        .map(|(id, t)| {
            let v = weighted_mean(t, |opp| lookup.strength(opp).value);
            (id.clone(), v)
        })
        .collect();
    SosSnapshot {
        iteration: 0,
        values,
    }
}

/// One transitivity step: `(1 − λ)·SOS₀ + λ·avg(opponent SOSᵢ)`.
///
/// Opponents outside the ranked set contribute their fallback strength.
pub fn sos_step(
    base: &SosSnapshot,
    prev: &SosSnapshot,
    teams: &BTreeMap<TeamId, TeamGames>,
    lookup: &StrengthLookup<'_>,
    lambda: f64,
) -> SosSnapshot {
    let values = teams
        .iter()
        .map(|(id, t)| {
            let direct = base.values.get(id).copied().unwrap_or(lookup.floor);
            let transitive = weighted_mean(t, |opp| match prev.values.get(opp) {
                Some(v) => *v,
                None => lookup.fallback(opp).value,
            });
            (id.clone(), (1.0 - lambda) * direct + lambda * transitive)
        })
        .collect();
    SosSnapshot {
        iteration: prev.iteration + 1,
        values,
    }
}

/// Up to `cfg.iterations` steps, stopping early once the largest change
/// drops below `cfg.convergence_tol`.
pub fn iterate_sos(
    teams: &BTreeMap<TeamId, TeamGames>,
    lookup: &StrengthLookup<'_>,
    cfg: &SosConfig,
) -> SosSnapshot {
    let base = direct_sos(teams, lookup);
    let mut current = base.clone();
    for _ in 0..cfg.iterations {
        let next = sos_step(&base, &current, teams, lookup, cfg.transitivity_lambda);
        let delta = max_abs_change(&current, &next);
        debug!(iteration = next.iteration, delta, "sos step");
        current = next;
        if delta < cfg.convergence_tol {
            break;
        }
    }
    current
}

pub fn max_abs_change(a: &SosSnapshot, b: &SosSnapshot) -> f64 {
    a.values
        .iter()
        .filter_map(|(id, v)| b.values.get(id).map(|w| (v - w).abs()))
        .fold(0.0, f64::max)
}

/// Distinct opponents that also played someone outside the team's local
/// cluster (the team plus its direct opponents). A cluster that already
/// spans every ranked team has nothing left to reach, so all of its
/// opponents count.
pub fn bridge_counts(teams: &BTreeMap<TeamId, TeamGames>) -> BTreeMap<TeamId, usize> {
    let adjacency: BTreeMap<&TeamId, BTreeSet<&TeamId>> = teams
        .iter()
        .map(|(id, t)| (id, t.games.iter().map(|g| &g.opponent).collect()))
        .collect();

    adjacency
        .iter()
        .map(|(id, opps)| {
            let spans_cohort = adjacency.keys().all(|t| t == id || opps.contains(t));
            if spans_cohort {
                return ((*id).clone(), opps.len());
            }
            let bridges = opps
                .iter()
                .filter(|opp| {
                    adjacency.get(**opp).is_some_and(|theirs| {
                        theirs.iter().any(|o| *o != *id && !opps.contains(o))
                    })
                })
                .count();
            ((*id).clone(), bridges)
        })
        .collect()
}

/// Multiplier in `[floor, 1]`; never zero so a sparse schedule still counts.
pub fn connectivity_factor(bridges: usize, cfg: &SosConfig) -> f64 {
    if cfg.min_bridges == 0 || bridges >= cfg.min_bridges {
        return 1.0;
    }
    (bridges as f64 / cfg.min_bridges as f64).max(cfg.connectivity_floor)
}

fn weighted_mean(team: &TeamGames, value_of: impl Fn(&TeamId) -> f64) -> f64 {
    let mut sum = 0.0;
    let mut wsum = 0.0;
    for (g, w) in team.games.iter().zip(&team.recency) {
        sum += w * value_of(&g.opponent);
        wsum += w;
    }
    if wsum > 0.0 { sum / wsum } else { 0.0 }
}
