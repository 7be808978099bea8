use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ConfigError;

/// Ceiling per age group; U18 and U19 share the top of the scale.
pub static DEFAULT_ANCHORS: Lazy<BTreeMap<u8, f64>> = Lazy::new(|| {
    BTreeMap::from([
        (10, 0.400),
        (11, 0.475),
        (12, 0.550),
        (13, 0.625),
        (14, 0.700),
        (15, 0.775),
        (16, 0.850),
        (17, 0.925),
        (18, 1.000),
        (19, 1.000),
    ])
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormMode {
    Zscore,
    Percentile,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub window_days: i64,
    pub goal_diff_cap: i32,
    pub outlier_z_threshold: f64,
    // Below this many games a team's goal-diff distribution is too thin to judge.
    pub outlier_min_games: usize,
    /// Lower bound on the leave-one-out goal-diff spread, in goals.
    pub outlier_min_std: f64,
    pub max_games: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            window_days: 365,
            goal_diff_cap: 6,
            outlier_z_threshold: 2.5,
            outlier_min_games: 6,
            outlier_min_std: 1.0,
            max_games: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecencyConfig {
    /// Per-day exponential decay.
    pub decay_rate: f64,
    pub recent_k: usize,
    pub recent_share: f64,
    pub taper_games: usize,
    pub taper_floor: f64,
}

impl Default for RecencyConfig {
    fn default() -> Self {
        Self {
            decay_rate: 0.005,
            recent_k: 15,
            recent_share: 0.65,
            taper_games: 5,
            taper_floor: 0.4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregateConfig {
    pub ridge_lambda: f64,
    pub shrink_tau: f64,
    pub adaptive_k_passes: usize,
    pub adaptive_k_beta: f64,
    pub team_outlier_z: f64,
}

impl Default for AggregateConfig {
    fn default() -> Self {
        Self {
            ridge_lambda: 0.25,
            shrink_tau: 8.0,
            adaptive_k_passes: 2,
            adaptive_k_beta: 1.5,
            team_outlier_z: 3.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Goals of expected margin per unit of strength gap.
    pub goal_scale: f64,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self { goal_scale: 5.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SosConfig {
    pub iterations: usize,
    pub transitivity_lambda: f64,
    pub convergence_tol: f64,
    /// Strength assumed for opponents with no in-cohort or cross-age value.
    pub floor: f64,
    pub clip_max: f64,
    pub shrink_tau: f64,
    pub min_bridges: usize,
    pub connectivity_floor: f64,
    pub norm_mode: NormMode,
}

impl Default for SosConfig {
    fn default() -> Self {
        Self {
            iterations: 3,
            transitivity_lambda: 0.20,
            convergence_tol: 1e-6,
            floor: 0.35,
            clip_max: 1.5,
            shrink_tau: 8.0,
            min_bridges: 3,
            connectivity_floor: 0.6,
            norm_mode: NormMode::Zscore,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CombinerConfig {
    pub w_off: f64,
    pub w_def: f64,
    pub w_sos: f64,
    pub w_perf: f64,
    /// Defaults to `w_off + w_def + w_sos`, which puts an average team at 0.5.
    pub norm_const: Option<f64>,
    pub norm_slope: f64,
}

impl Default for CombinerConfig {
    fn default() -> Self {
        Self {
            w_off: 0.25,
            w_def: 0.25,
            w_sos: 0.50,
            w_perf: 0.15,
            norm_const: None,
            norm_slope: 1.0,
        }
    }
}

impl CombinerConfig {
    pub fn resolved_norm_const(&self) -> f64 {
        self.norm_const
            .unwrap_or(self.w_off + self.w_def + self.w_sos)
            .max(1e-9)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionalConfig {
    pub min_games: usize,
    pub floor: f64,
}

impl Default for ProvisionalConfig {
    fn default() -> Self {
        Self {
            min_games: 5,
            floor: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MlConfig {
    pub enabled: bool,
    pub alpha: f64,
    pub l2: f64,
    pub decay_rate: f64,
    pub residual_clip: f64,
    pub min_samples: usize,
    pub retries: usize,
    pub sos_gate_low: f64,
    pub sos_gate_high: f64,
    pub norm_mode: NormMode,
}

impl Default for MlConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            alpha: 0.12,
            l2: 0.1,
            decay_rate: 0.01,
            residual_clip: 3.5,
            min_samples: 30,
            retries: 1,
            sos_gate_low: 0.45,
            sos_gate_high: 0.60,
            norm_mode: NormMode::Percentile,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    pub window: WindowConfig,
    pub recency: RecencyConfig,
    pub aggregate: AggregateConfig,
    pub performance: PerformanceConfig,
    pub sos: SosConfig,
    pub combiner: CombinerConfig,
    pub provisional: ProvisionalConfig,
    pub ml: MlConfig,
    pub anchors: BTreeMap<u8, f64>,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            window: WindowConfig::default(),
            recency: RecencyConfig::default(),
            aggregate: AggregateConfig::default(),
            performance: PerformanceConfig::default(),
            sos: SosConfig::default(),
            combiner: CombinerConfig::default(),
            provisional: ProvisionalConfig::default(),
            ml: MlConfig::default(),
            anchors: DEFAULT_ANCHORS.clone(),
        }
    }
}

impl RankingConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let cfg = serde_json::from_str::<RankingConfig>(&raw)
            .with_context(|| format!("parse config {}", path.display()))?;
        Ok(cfg)
    }

    /// An explicit file wins over `POWERSCORE_CONFIG`; env overrides land once either way.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let mut cfg = Self::load(path)?;
                cfg.apply_env_overrides();
                Ok(cfg)
            }
            None => Self::from_env(),
        }
    }

    /// File named by `POWERSCORE_CONFIG` (or defaults), then single-value env overrides.
    pub fn from_env() -> Result<Self> {
        let mut cfg = match env::var("POWERSCORE_CONFIG").ok().map(PathBuf::from) {
            Some(path) => Self::load(&path)?,
            None => Self::default(),
        };
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Some(days) = env::var("POWERSCORE_WINDOW_DAYS")
            .ok()
            .and_then(|v| v.trim().parse::<i64>().ok())
        {
            self.window.window_days = days.max(1);
        }
        if let Some(enabled) = env::var("POWERSCORE_ML_ENABLED")
            .ok()
            .and_then(|v| parse_bool(&v))
        {
            self.ml.enabled = enabled;
        }
    }

    pub fn anchor(&self, age: u8) -> Option<f64> {
        self.anchors.get(&age).copied()
    }

    /// Stable digest of every tunable; one of the three cache-key parts.
    pub fn config_version(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_default();
        format!("{:x}", Sha256::digest(json.as_bytes()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("window.window_days", self.window.window_days as f64, 1.0, 3650.0)?;
        check_range("window.goal_diff_cap", self.window.goal_diff_cap as f64, 1.0, 50.0)?;
        check_positive("window.outlier_z_threshold", self.window.outlier_z_threshold)?;
        check_positive("window.outlier_min_std", self.window.outlier_min_std)?;
        check_range("window.max_games", self.window.max_games as f64, 1.0, 1000.0)?;
        check_range("recency.decay_rate", self.recency.decay_rate, 0.0, 1.0)?;
        check_range("recency.recent_share", self.recency.recent_share, 0.0, 0.999)?;
        check_range("recency.taper_floor", self.recency.taper_floor, 0.0, 1.0)?;
        check_range("aggregate.ridge_lambda", self.aggregate.ridge_lambda, 0.0, 1e6)?;
        check_range("aggregate.shrink_tau", self.aggregate.shrink_tau, 0.0, 1e6)?;
        check_range("aggregate.adaptive_k_beta", self.aggregate.adaptive_k_beta, 0.0, 100.0)?;
        check_positive("aggregate.team_outlier_z", self.aggregate.team_outlier_z)?;
        check_range("sos.transitivity_lambda", self.sos.transitivity_lambda, 0.0, 0.999)?;
        check_range("sos.floor", self.sos.floor, 0.0, self.sos.clip_max)?;
        check_range("sos.shrink_tau", self.sos.shrink_tau, 0.0, 1e6)?;
        check_range("sos.connectivity_floor", self.sos.connectivity_floor, 1e-6, 1.0)?;
        check_positive("combiner.norm_slope", self.combiner.norm_slope)?;
        for (field, w) in [
            ("combiner.w_off", self.combiner.w_off),
            ("combiner.w_def", self.combiner.w_def),
            ("combiner.w_sos", self.combiner.w_sos),
            ("combiner.w_perf", self.combiner.w_perf),
        ] {
            check_range(field, w, 0.0, 10.0)?;
        }
        check_range("provisional.floor", self.provisional.floor, 0.0, 1.0)?;
        check_range("ml.alpha", self.ml.alpha, 0.0, 1.0)?;
        check_range("ml.l2", self.ml.l2, 0.0, 1e6)?;
        check_positive("ml.residual_clip", self.ml.residual_clip)?;
        if self.ml.sos_gate_low >= self.ml.sos_gate_high {
            return Err(ConfigError::GateOrder {
                low: self.ml.sos_gate_low,
                high: self.ml.sos_gate_high,
            });
        }
        for (age, value) in &self.anchors {
            if !(*value > 0.0 && *value <= 1.0) {
                return Err(ConfigError::Anchor {
                    age: *age,
                    value: *value,
                });
            }
        }
        Ok(())
    }
}

fn check_range(field: &'static str, value: f64, lo: f64, hi: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= lo && value <= hi {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            expected: "within its documented range",
            value,
        })
    }
}

fn check_positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            expected: "positive",
            value,
        })
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        RankingConfig::default().validate().expect("defaults are valid");
    }

    #[test]
    fn partial_json_keeps_remaining_defaults() {
        let cfg: RankingConfig =
            serde_json::from_str(r#"{"sos":{"iterations":5},"anchors":{"12":0.5}}"#).unwrap();
        assert_eq!(cfg.sos.iterations, 5);
        assert_eq!(cfg.sos.transitivity_lambda, 0.20);
        assert_eq!(cfg.anchor(12), Some(0.5));
        assert_eq!(cfg.anchor(13), None);
        assert_eq!(cfg.window, WindowConfig::default());
    }

    #[test]
    fn explicit_config_file_is_loaded() {
        let path = env::temp_dir().join(format!("powerscore-cfg-{}.json", std::process::id()));
        fs::write(&path, r#"{"sos":{"iterations":7},"window":{"outlier_min_std":0.5}}"#).unwrap();
        let cfg = RankingConfig::resolve(Some(&path)).unwrap();
        let _ = fs::remove_file(&path);
        assert_eq!(cfg.sos.iterations, 7);
        assert_eq!(cfg.window.outlier_min_std, 0.5);
        assert_eq!(cfg.combiner, CombinerConfig::default());
        assert!(RankingConfig::resolve(Some(Path::new("/nonexistent/powerscore.json"))).is_err());
    }

    #[test]
    fn non_positive_outlier_spread_is_rejected() {
        let mut cfg = RankingConfig::default();
        cfg.window.outlier_min_std = 0.0;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::OutOfRange { field: "window.outlier_min_std", .. })
        ));
    }

    #[test]
    fn config_version_tracks_every_tunable() {
        let base = RankingConfig::default();
        let mut tweaked = base.clone();
        tweaked.ml.alpha = 0.2;
        assert_eq!(base.config_version(), RankingConfig::default().config_version());
        assert_ne!(base.config_version(), tweaked.config_version());
    }

    #[test]
    fn inverted_gates_are_rejected() {
        let mut cfg = RankingConfig::default();
        cfg.ml.sos_gate_low = 0.7;
        assert!(matches!(cfg.validate(), Err(ConfigError::GateOrder { .. })));
    }

    #[test]
    fn default_norm_const_centres_average_team() {
        let c = CombinerConfig::default();
        let avg = (c.w_off * 0.5 + c.w_def * 0.5 + c.w_sos * 0.5) / c.resolved_norm_const();
        assert!((avg - 0.5).abs() < 1e-12);
    }
}
