use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::games::Cohort;

/// Run-level failures. Anything narrower than this is reported per cohort.
#[derive(Debug, Error)]
pub enum RankError {
    #[error("no games supplied")]
    EmptyInput,
    #[error("no games survived validation ({rejected} rejected)")]
    NothingValid { rejected: usize },
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Structural failure of one cohort. Other cohorts are unaffected.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum CohortError {
    #[error("cohort {0} has no games")]
    EmptyCohort(Cohort),
    #[error("cohort {0} has no games inside the window")]
    EmptyWindow(Cohort),
    #[error("no anchor configured for age group U{age}")]
    MissingAnchor { age: u8 },
}

#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum MlError {
    #[error("only {got} samples, need {need}")]
    TooFewSamples { got: usize, need: usize },
    #[error("normal equations are singular")]
    Singular,
    #[error("fitted coefficients are not finite")]
    NonFinite,
    #[error("residuals are degenerate (std {std:.3e})")]
    DegenerateResiduals { std: f64 },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{field} must be {expected}, got {value}")]
    OutOfRange {
        field: &'static str,
        expected: &'static str,
        value: f64,
    },
    #[error("ml.sos_gate_low ({low}) must be below ml.sos_gate_high ({high})")]
    GateOrder { low: f64, high: f64 },
    #[error("anchor for U{age} must be in (0, 1], got {value}")]
    Anchor { age: u8, value: f64 },
}
