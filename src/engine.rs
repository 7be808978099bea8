//! Two-pass orchestration.
//!
//! Pass 1 ranks every cohort on its own and publishes a read-only
//! [`GlobalStrengths`] table. Pass 2 re-runs each cohort with that table
//! available for cross-age opponents and applies the residual model.
//! Cohorts run as independent rayon tasks and are joined in cohort order.

use std::collections::BTreeMap;
use std::env;

use chrono::NaiveDate;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::aggregate::{TeamGames, aggregate};
use crate::cache::ResultCache;
use crate::config::RankingConfig;
use crate::error::{CohortError, RankError};
use crate::fingerprint::{CacheKey, cache_key};
use crate::games::{Cohort, IdentityResolver, RawGame, RejectCounts, ResolvedGame, TeamId, ingest};
use crate::ml_blend::{MlReport, MlSample, blend, ml_scale, residual_model};
use crate::normalize::normalize;
use crate::performance::performance;
use crate::powerscore::{
    Components, TeamRanking, TeamStatus, UnrankedTeam, anchor_scale, assign_ranks, combine,
    provisional_multiplier, status_for,
};
use crate::recency::recency_weights;
use crate::shrinkage::shrink_all;
use crate::sos::{GlobalStrengths, StrengthLookup, bridge_counts, connectivity_factor, iterate_sos};
use crate::window::apply_window;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingRun {
    pub cache_key: CacheKey,
    pub reference_date: NaiveDate,
    pub rejected: RejectCounts,
    pub cohorts: Vec<CohortReport>,
}

impl RankingRun {
    pub fn cohort(&self, cohort: Cohort) -> Option<&CohortReport> {
        self.cohorts.iter().find(|c| c.cohort == cohort)
    }

    pub fn team(&self, cohort: Cohort, team_id: &str) -> Option<&TeamRanking> {
        self.cohort(cohort)?.teams.iter().find(|t| t.team_id == team_id)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowStats {
    pub games_in_window: usize,
    pub dropped_stale: usize,
    pub dropped_outliers: usize,
    pub dropped_over_cap: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortReport {
    pub cohort: Cohort,
    pub anchor: Option<f64>,
    /// Ranked teams in rank order.
    pub teams: Vec<TeamRanking>,
    pub unranked: Vec<UnrankedTeam>,
    pub ml: MlReport,
    pub sos_iterations_run: usize,
    pub adaptive_k_passes: usize,
    pub window: WindowStats,
    pub error: Option<CohortError>,
}

impl CohortReport {
    fn failed(cohort: Cohort, anchor: Option<f64>, error: CohortError) -> Self {
        Self {
            cohort,
            anchor,
            teams: Vec::new(),
            unranked: Vec::new(),
            ml: MlReport::disabled(),
            sos_iterations_run: 0,
            adaptive_k_passes: 0,
            window: WindowStats::default(),
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    Seed,
    Final,
}

pub fn rank(
    raw: &[RawGame],
    reference: NaiveDate,
    cfg: &RankingConfig,
    resolver: &dyn IdentityResolver,
) -> Result<RankingRun, RankError> {
    let key = cache_key(raw, cfg, resolver, reference);
    rank_with_key(raw, reference, cfg, resolver, key)
}

/// [`rank`], served from `cache` when an entry exists under the exact key.
pub fn rank_cached(
    raw: &[RawGame],
    reference: NaiveDate,
    cfg: &RankingConfig,
    resolver: &dyn IdentityResolver,
    cache: &ResultCache,
) -> Result<RankingRun, RankError> {
    let key = cache_key(raw, cfg, resolver, reference);
    if let Some(run) = cache.load(&key) {
        info!(key = %key.combined(), "serving cached ranking");
        return Ok(run);
    }
    let run = rank_with_key(raw, reference, cfg, resolver, key)?;
    if let Err(err) = cache.store(&run) {
        warn!(error = %err, "failed to cache ranking");
    }
    Ok(run)
}

fn rank_with_key(
    raw: &[RawGame],
    reference: NaiveDate,
    cfg: &RankingConfig,
    resolver: &dyn IdentityResolver,
    key: CacheKey,
) -> Result<RankingRun, RankError> {
    if raw.is_empty() {
        return Err(RankError::EmptyInput);
    }
    cfg.validate()?;

    let ingested = ingest(raw, resolver);
    let rejected = ingested.rejected;
    if rejected.total() > 0 {
        warn!(
            total = rejected.total(),
            missing_score = rejected.missing_score,
            negative_score = rejected.negative_score,
            unresolved_identity = rejected.unresolved_identity,
            invalid_cohort = rejected.invalid_cohort,
            self_match = rejected.self_match,
            duplicate = rejected.duplicate,
            mirror_mismatch = rejected.mirror_mismatch,
            "rows quarantined"
        );
    }
    if ingested.games.is_empty() {
        return Err(RankError::NothingValid {
            rejected: rejected.total(),
        });
    }

    let mut by_cohort: BTreeMap<Cohort, Vec<ResolvedGame>> = BTreeMap::new();
    for g in ingested.games {
        by_cohort.entry(g.cohort).or_default().push(g);
    }
    let partitions: Vec<(Cohort, Vec<ResolvedGame>)> = by_cohort.into_iter().collect();

    let empty = GlobalStrengths::default();
    let seed = with_pool(|| {
        partitions
            .par_iter()
            .map(|(cohort, games)| run_cohort(*cohort, games, reference, cfg, &empty, Pass::Seed))
            .collect::<Vec<_>>()
    });
    let global = global_strengths(&seed);
    info!(cohorts = seed.len(), teams = global.len(), "cross-age lookup built");

    let cohorts = with_pool(|| {
        partitions
            .par_iter()
            .map(|(cohort, games)| run_cohort(*cohort, games, reference, cfg, &global, Pass::Final))
            .collect::<Vec<_>>()
    });

    Ok(RankingRun {
        cache_key: key,
        reference_date: reference,
        rejected,
        cohorts,
    })
}

/// Absolute-scale strength (`abs_strength × anchor`), keeping a team's best
/// cohort when it appears in several.
pub fn global_strengths(reports: &[CohortReport]) -> GlobalStrengths {
    let mut global = GlobalStrengths::default();
    for report in reports {
        let Some(anchor) = report.anchor else { continue };
        for t in &report.teams {
            global.insert_max(&TeamId::new(t.team_id.as_str()), t.abs_strength * anchor);
        }
    }
    global
}

/// Every ranked team across cohorts by final score, best first.
pub fn global_ranking(run: &RankingRun) -> Vec<&TeamRanking> {
    let mut all: Vec<&TeamRanking> = run.cohorts.iter().flat_map(|c| c.teams.iter()).collect();
    all.sort_by(|a, b| {
        b.power_score_final
            .total_cmp(&a.power_score_final)
            .then_with(|| a.team_id.cmp(&b.team_id))
            .then_with(|| a.cohort.cmp(&b.cohort))
    });
    all
}

fn run_cohort(
    cohort: Cohort,
    games: &[ResolvedGame],
    reference: NaiveDate,
    cfg: &RankingConfig,
    global: &GlobalStrengths,
    pass: Pass,
) -> CohortReport {
    let Some(anchor) = cfg.anchor(cohort.age) else {
        let err = CohortError::MissingAnchor { age: cohort.age };
        warn!(%cohort, error = %err, "cohort skipped");
        return CohortReport::failed(cohort, None, err);
    };
    if games.is_empty() {
        return CohortReport::failed(cohort, Some(anchor), CohortError::EmptyCohort(cohort));
    }

    let window = apply_window(games, reference, &cfg.window);
    let stats = WindowStats {
        games_in_window: window.total_games(),
        dropped_stale: window.dropped_stale,
        dropped_outliers: window.dropped_outliers,
        dropped_over_cap: window.dropped_over_cap,
    };

    let mut seen: BTreeMap<&TeamId, usize> = BTreeMap::new();
    for g in games {
        *seen.entry(&g.team).or_default() += 1;
    }
    let mut teams: BTreeMap<TeamId, TeamGames> = BTreeMap::new();
    let mut unranked = Vec::new();
    for (id, team_games) in window.teams {
        if team_games.is_empty() {
            unranked.push(UnrankedTeam {
                team_id: id.to_string(),
                status: TeamStatus::NotEnoughRankedGames,
                games_seen: seen.get(&id).copied().unwrap_or(0),
            });
            continue;
        }
        let recency = recency_weights(&team_games, &cfg.recency, cfg.window.max_games);
        teams.insert(
            id,
            TeamGames {
                games: team_games,
                recency,
            },
        );
    }

    if teams.is_empty() {
        if pass == Pass::Final {
            warn!(%cohort, "no games inside the window");
        }
        let mut report =
            CohortReport::failed(cohort, Some(anchor), CohortError::EmptyWindow(cohort));
        report.unranked = unranked;
        report.window = stats;
        return report;
    }

    let lookup = StrengthLookup::new(global, anchor, &cfg.sos);
    let agg = aggregate(&teams, &cfg.aggregate, &cfg.combiner, &lookup);
    let abs = agg.abs_strengths();
    let scoped = lookup.with_in_cohort(&abs);

    let perf = performance(&teams, &scoped, &cfg.performance);
    let sos = iterate_sos(&teams, &scoped, &cfg.sos);

    let games_played: BTreeMap<TeamId, usize> =
        teams.iter().map(|(id, t)| (id.clone(), t.games.len())).collect();
    let sos_shrunk = shrink_all(&sos.values, &games_played, cfg.sos.shrink_tau);
    let bridges = bridge_counts(&teams);
    let sos_adj: BTreeMap<TeamId, f64> = sos_shrunk
        .iter()
        .map(|(id, v)| {
            let b = bridges.get(id).copied().unwrap_or(0);
            (id.clone(), v * connectivity_factor(b, &cfg.sos))
        })
        .collect();
    let adj_values: Vec<f64> = sos_adj.values().copied().collect();
    let sos_norm: BTreeMap<TeamId, f64> = sos_adj
        .keys()
        .cloned()
        .zip(normalize(&adj_values, cfg.sos.norm_mode, cfg.combiner.norm_slope))
        .collect();

    let mut rankings: Vec<TeamRanking> = Vec::with_capacity(teams.len());
    for (id, t) in &teams {
        let (Some(od), Some(st), Some(pf)) =
            (agg.off_def.get(id), agg.strength.get(id), perf.get(id))
        else {
            continue;
        };
        let n = t.games.len();
        let s_norm = sos_norm.get(id).copied().unwrap_or(0.5);
        let core = combine(
            Components {
                off_norm: st.off_norm,
                def_norm: st.def_norm,
                sos_norm: s_norm,
                perf_centered: pf.perf_centered,
            },
            &cfg.combiner,
        );
        let mult = provisional_multiplier(n, &cfg.provisional);
        let adj = core * mult;
        rankings.push(TeamRanking {
            team_id: id.to_string(),
            cohort,
            status: status_for(n, &cfg.provisional),
            rank_in_cohort: None,
            games_played: n,
            last_game: t.games.first().map(|g| g.date),
            off_raw: od.off_raw,
            def_raw: od.def_raw,
            off_norm: st.off_norm,
            def_norm: st.def_norm,
            metric_outlier: od.metric_outlier,
            abs_strength: st.abs_strength,
            sos: sos.values.get(id).copied().unwrap_or(cfg.sos.floor),
            sos_adj: sos_adj.get(id).copied().unwrap_or(0.0),
            sos_norm: s_norm,
            bridge_count: bridges.get(id).copied().unwrap_or(0),
            connectivity_factor: connectivity_factor(
                bridges.get(id).copied().unwrap_or(0),
                &cfg.sos,
            ),
            perf_raw: pf.perf_raw,
            perf_centered: pf.perf_centered,
            powerscore_core: core,
            provisional_mult: mult,
            powerscore_adj: adj,
            ml_residual: None,
            ml_norm: 0.0,
            ml_scale: 0.0,
            ml_delta: 0.0,
            powerscore_blended: adj,
            power_score_final: 0.0,
        });
    }

    let ml = if pass == Pass::Final && cfg.ml.enabled {
        apply_residuals(cohort, &teams, &mut rankings, &scoped, cfg)
    } else {
        MlReport::disabled()
    };

    for r in &mut rankings {
        r.power_score_final = anchor_scale(r.powerscore_blended, anchor);
    }
    assign_ranks(&mut rankings);

    if pass == Pass::Final {
        info!(
            %cohort,
            ranked = rankings.len(),
            unranked = unranked.len(),
            games = stats.games_in_window,
            sos_iterations = sos.iteration,
            ml = ml.available,
            "cohort ranked"
        );
    }

    CohortReport {
        cohort,
        anchor: Some(anchor),
        teams: rankings,
        unranked,
        ml,
        sos_iterations_run: sos.iteration,
        adaptive_k_passes: agg.passes,
        window: stats,
        error: None,
    }
}

/// Fits the residual model on the cohort's games and blends it into
/// `rankings` in place. Leaves every deterministic score alone on failure.
fn apply_residuals(
    cohort: Cohort,
    teams: &BTreeMap<TeamId, TeamGames>,
    rankings: &mut [TeamRanking],
    lookup: &StrengthLookup<'_>,
    cfg: &RankingConfig,
) -> MlReport {
    let adj: BTreeMap<&str, f64> = rankings
        .iter()
        .map(|r| (r.team_id.as_str(), r.powerscore_adj))
        .collect();

    let mut samples = Vec::new();
    for (id, t) in teams {
        let Some(ps_team) = adj.get(id.as_str()).copied() else { continue };
        for g in &t.games {
            let ps_opp = match adj.get(g.opponent.as_str()) {
                Some(v) => *v,
                None => lookup.fallback(&g.opponent).value,
            };
            samples.push(MlSample {
                team: id.clone(),
                ps_team,
                ps_opp,
                home: g.venue.indicator(),
                margin: g.margin(),
                weight: (-cfg.ml.decay_rate * g.age_days.max(0) as f64).exp(),
            });
        }
    }

    let fitted = residual_model(cohort, &samples, &cfg.ml);
    if !fitted.report.available {
        return fitted.report;
    }
    for r in rankings.iter_mut() {
        let id = TeamId::new(r.team_id.as_str());
        let (Some(residual), Some(norm)) = (fitted.per_team.get(&id), fitted.norm.get(&id)) else {
            continue;
        };
        let scale = ml_scale(r.sos_norm, cfg.ml.sos_gate_low, cfg.ml.sos_gate_high);
        let (delta, blended) = blend(r.powerscore_adj, scale, cfg.ml.alpha, *norm);
        r.ml_residual = Some(*residual);
        r.ml_norm = *norm;
        r.ml_scale = scale;
        r.ml_delta = delta;
        r.powerscore_blended = blended;
    }
    fitted.report
}

fn with_pool<T>(action: impl FnOnce() -> T + Send) -> T
where
    T: Send,
{
    let Some(threads) = env::var("POWERSCORE_THREADS")
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
    else {
        return action();
    };
    match rayon::ThreadPoolBuilder::new().num_threads(threads.clamp(1, 64)).build() {
        Ok(pool) => pool.install(action),
        Err(_) => action(),
    }
}
