use std::collections::BTreeMap;

use crate::games::TeamId;

/// Bayesian shrinkage: weight `n / (n + tau)` on the team's own value.
pub fn shrink_toward(value: f64, mean: f64, games_played: usize, tau: f64) -> f64 {
    let n = games_played as f64;
    if n + tau <= 0.0 {
        return mean;
    }
    (n * value + tau * mean) / (n + tau)
}

/// Shrink every team's value toward the unweighted cohort mean.
pub fn shrink_all(
    values: &BTreeMap<TeamId, f64>,
    games_played: &BTreeMap<TeamId, usize>,
    tau: f64,
) -> BTreeMap<TeamId, f64> {
    if values.is_empty() {
        return BTreeMap::new();
    }
    let mean = values.values().sum::<f64>() / values.len() as f64;
    values
        .iter()
        .map(|(id, v)| {
            let n = games_played.get(id).copied().unwrap_or(0);
            (id.clone(), shrink_toward(*v, mean, n, tau))
        })
        .collect()
}
