//! Learned residual correction layered over the deterministic score.
//!
//! A weighted ridge regression predicts each game's goal margin from the two
//! sides' deterministic scores and a home indicator. Teams that keep beating
//! the prediction get a small, SOS-gated nudge. Any fitting failure leaves the
//! cohort on its deterministic score.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::{MlConfig, NormMode};
use crate::error::MlError;
use crate::games::{Cohort, TeamId};
use crate::normalize::{Dist, normalize};

const FEATURES: usize = 4;
const PIVOT_EPS: f64 = 1e-12;
const RESIDUAL_STD_EPS: f64 = 1e-9;

/// One perspective row as the regression sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct MlSample {
    pub team: TeamId,
    pub ps_team: f64,
    pub ps_opp: f64,
    pub home: f64,
    /// Clipped goal margin from the team's side.
    pub margin: f64,
    pub weight: f64,
}

impl MlSample {
    fn features(&self) -> [f64; FEATURES] {
        [1.0, self.ps_team, self.ps_opp, self.home]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlReport {
    pub available: bool,
    pub reason: Option<MlError>,
    /// Intercept, team score, opponent score, home indicator.
    pub coefficients: Option<[f64; FEATURES]>,
    pub samples: usize,
    pub attempts: usize,
    pub l2: f64,
}

impl MlReport {
    pub fn disabled() -> Self {
        Self {
            available: false,
            reason: None,
            coefficients: None,
            samples: 0,
            attempts: 0,
            l2: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Residuals {
    pub report: MlReport,
    /// Weighted mean clipped residual per team with at least one sample.
    pub per_team: BTreeMap<TeamId, f64>,
    /// Residual normalized into [−0.5, 0.5].
    pub norm: BTreeMap<TeamId, f64>,
}

/// Fit, retrying with heavier regularization, then reduce to per-team residuals.
pub fn residual_model(cohort: Cohort, samples: &[MlSample], cfg: &MlConfig) -> Residuals {
    let failed = |report: MlReport| Residuals {
        report,
        per_team: BTreeMap::new(),
        norm: BTreeMap::new(),
    };

    if samples.len() < cfg.min_samples {
        let err = MlError::TooFewSamples {
            got: samples.len(),
            need: cfg.min_samples,
        };
        warn!(%cohort, error = %err, "residual model skipped");
        return failed(MlReport {
            available: false,
            reason: Some(err),
            coefficients: None,
            samples: samples.len(),
            attempts: 0,
            l2: cfg.l2,
        });
    }

    let mut l2 = cfg.l2;
    let mut attempts = 0;
    let mut last_err = MlError::Singular;
    while attempts <= cfg.retries {
        attempts += 1;
        match fit_checked(samples, l2) {
            Ok(coef) => {
                let per_team = team_residuals(samples, &coef, cfg.residual_clip);
                let norm = normalize_residuals(&per_team, cfg.norm_mode);
                return Residuals {
                    report: MlReport {
                        available: true,
                        reason: None,
                        coefficients: Some(coef),
                        samples: samples.len(),
                        attempts,
                        l2,
                    },
                    per_team,
                    norm,
                };
            }
            Err(err) => {
                last_err = err;
                l2 = l2.max(1e-6) * 10.0;
            }
        }
    }

    warn!(
        %cohort,
        attempts,
        error = %last_err,
        "residual model failed, using deterministic scores"
    );
    failed(MlReport {
        available: false,
        reason: Some(last_err),
        coefficients: None,
        samples: samples.len(),
        attempts,
        l2,
    })
}

/// Ridge fit plus the residual sanity checks that make a fit usable.
fn fit_checked(samples: &[MlSample], l2: f64) -> Result<[f64; FEATURES], MlError> {
    let coef = fit_ridge(samples, l2)?;
    if coef.iter().any(|c| !c.is_finite()) {
        return Err(MlError::NonFinite);
    }
    let residuals: Vec<f64> = samples.iter().map(|s| s.margin - predict(&coef, s)).collect();
    let std = Dist::of(&residuals).map(|d| d.std).unwrap_or(0.0);
    if !std.is_finite() {
        return Err(MlError::NonFinite);
    }
    if std < RESIDUAL_STD_EPS {
        return Err(MlError::DegenerateResiduals { std });
    }
    Ok(coef)
}

/// Closed-form weighted ridge: `(XᵀWX + λI′) β = XᵀWy`, intercept unpenalized.
pub fn fit_ridge(samples: &[MlSample], l2: f64) -> Result<[f64; FEATURES], MlError> {
    let mut a = [[0.0; FEATURES]; FEATURES];
    let mut b = [0.0; FEATURES];
    for s in samples {
        let x = s.features();
        for i in 0..FEATURES {
            b[i] += s.weight * x[i] * s.margin;
            for j in 0..FEATURES {
                a[i][j] += s.weight * x[i] * x[j];
            }
        }
    }
    for (i, row) in a.iter_mut().enumerate().skip(1) {
        row[i] += l2;
    }
    solve(a, b)
}

/// Gaussian elimination with partial pivoting.
fn solve(
    mut a: [[f64; FEATURES]; FEATURES],
    mut b: [f64; FEATURES],
) -> Result<[f64; FEATURES], MlError> {
    for col in 0..FEATURES {
        let pivot = (col..FEATURES)
            .max_by(|&r, &s| a[r][col].abs().total_cmp(&a[s][col].abs()))
            .unwrap_or(col);
        if a[pivot][col].abs() < PIVOT_EPS {
            return Err(MlError::Singular);
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in col + 1..FEATURES {
            let factor = a[row][col] / a[col][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..FEATURES {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }
    let mut x = [0.0; FEATURES];
    for row in (0..FEATURES).rev() {
        let tail: f64 = (row + 1..FEATURES).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    Ok(x)
}

pub fn predict(coef: &[f64; FEATURES], s: &MlSample) -> f64 {
    coef.iter().zip(s.features()).map(|(c, x)| c * x).sum()
}

pub fn team_residuals(
    samples: &[MlSample],
    coef: &[f64; FEATURES],
    clip: f64,
) -> BTreeMap<TeamId, f64> {
    let mut acc: BTreeMap<TeamId, (f64, f64)> = BTreeMap::new();
    for s in samples {
        let r = (s.margin - predict(coef, s)).clamp(-clip, clip);
        let slot = acc.entry(s.team.clone()).or_insert((0.0, 0.0));
        slot.0 += s.weight * r;
        slot.1 += s.weight;
    }
    acc.into_iter()
        .map(|(id, (sum, w))| (id, if w > 0.0 { sum / w } else { 0.0 }))
        .collect()
}

fn normalize_residuals(per_team: &BTreeMap<TeamId, f64>, mode: NormMode) -> BTreeMap<TeamId, f64> {
    let values: Vec<f64> = per_team.values().copied().collect();
    per_team
        .keys()
        .cloned()
        .zip(normalize(&values, mode, 1.0))
        .map(|(id, v)| (id, v - 0.5))
        .collect()
}

/// 0 at or below `low`, 1 at or above `high`, linear between.
pub fn ml_scale(sos_norm: f64, low: f64, high: f64) -> f64 {
    if sos_norm <= low {
        0.0
    } else if sos_norm >= high {
        1.0
    } else {
        (sos_norm - low) / (high - low)
    }
}

/// Returns `(ml_delta, powerscore_blended)`. A zero scale leaves `adj` untouched.
pub fn blend(adj: f64, scale: f64, alpha: f64, ml_norm: f64) -> (f64, f64) {
    if scale <= 0.0 {
        return (0.0, adj);
    }
    let delta = scale * alpha * ml_norm;
    (delta, adj + delta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::games::Gender;

    fn cohort() -> Cohort {
        Cohort { age: 14, gender: Gender::Male }
    }

    fn synthetic(n: usize) -> Vec<MlSample> {
        (0..n)
            .map(|i| {
                let ps_team = (i % 10) as f64 / 10.0;
                let ps_opp = ((i * 3) % 10) as f64 / 10.0;
                let home = [1.0, -1.0, 0.0][i % 3];
                let noise = ((i * 7) % 5) as f64 * 0.02 - 0.04;
                MlSample {
                    team: TeamId::new(format!("t{}", i % 6)),
                    ps_team,
                    ps_opp,
                    home,
                    margin: 0.2 + 4.0 * ps_team - 3.0 * ps_opp + 0.5 * home + noise,
                    weight: 1.0,
                }
            })
            .collect()
    }

    #[test]
    fn ridge_recovers_planted_coefficients() {
        let coef = fit_ridge(&synthetic(120), 1e-6).unwrap();
        assert!((coef[1] - 4.0).abs() < 0.1);
        assert!((coef[2] + 3.0).abs() < 0.1);
        assert!((coef[3] - 0.5).abs() < 0.05);
    }

    #[test]
    fn too_few_samples_falls_back() {
        let cfg = MlConfig::default();
        let out = residual_model(cohort(), &synthetic(10), &cfg);
        assert!(!out.report.available);
        assert_eq!(
            out.report.reason,
            Some(MlError::TooFewSamples { got: 10, need: cfg.min_samples })
        );
        assert!(out.per_team.is_empty());
    }

    #[test]
    fn perfect_fit_is_degenerate_and_retried() {
        let samples: Vec<MlSample> = synthetic(60)
            .into_iter()
            .map(|mut s| {
                s.margin = 1.0;
                s
            })
            .collect();
        let out = residual_model(cohort(), &samples, &MlConfig::default());
        assert!(!out.report.available);
        assert_eq!(out.report.attempts, 2);
        assert!(matches!(out.report.reason, Some(MlError::DegenerateResiduals { .. })));
    }

    #[test]
    fn successful_fit_normalizes_residuals_into_half_band() {
        let out = residual_model(cohort(), &synthetic(90), &MlConfig::default());
        assert!(out.report.available);
        assert_eq!(out.per_team.len(), 6);
        assert!(out.norm.values().all(|v| (-0.5..=0.5).contains(v)));
    }

    #[test]
    fn zscore_residual_norm_keeps_order_inside_half_band() {
        let per_team = BTreeMap::from([
            (TeamId::new("a"), -1.2),
            (TeamId::new("b"), 0.1),
            (TeamId::new("c"), 0.4),
            (TeamId::new("d"), 2.5),
        ]);
        let norm = normalize_residuals(&per_team, NormMode::Zscore);
        let ordered: Vec<f64> = ["a", "b", "c", "d"]
            .iter()
            .map(|id| norm[&TeamId::new(*id)])
            .collect();
        assert!(ordered.iter().all(|v| (-0.5..=0.5).contains(v)));
        assert!(ordered.windows(2).all(|w| w[0] < w[1]));

        let cfg = MlConfig {
            norm_mode: NormMode::Zscore,
            ..MlConfig::default()
        };
        let out = residual_model(cohort(), &synthetic(90), &cfg);
        assert!(out.report.available);
        assert_eq!(out.norm.len(), out.per_team.len());
        assert!(out.norm.values().all(|v| (-0.5..=0.5).contains(v)));
    }

    #[test]
    fn gate_ramps_between_thresholds() {
        assert_eq!(ml_scale(0.3, 0.45, 0.6), 0.0);
        assert_eq!(ml_scale(0.45, 0.45, 0.6), 0.0);
        assert!((ml_scale(0.525, 0.45, 0.6) - 0.5).abs() < 1e-12);
        assert_eq!(ml_scale(0.9, 0.45, 0.6), 1.0);
    }

    #[test]
    fn zero_scale_blend_is_exact() {
        let adj = 0.123_456_789_f64;
        let (delta, blended) = blend(adj, 0.0, 0.12, 0.4);
        assert_eq!(delta, 0.0);
        assert_eq!(blended.to_bits(), adj.to_bits());
        let (delta, blended) = blend(0.5, 1.0, 0.1, 0.5);
        assert!((delta - 0.05).abs() < 1e-12);
        assert!((blended - 0.55).abs() < 1e-12);
    }
}
