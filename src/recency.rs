use crate::config::RecencyConfig;
use crate::window::WindowedGame;

/// Per-game recency weights (summing to 1) for one team's games, most recent first.
pub fn recency_weights(games: &[WindowedGame], cfg: &RecencyConfig, max_games: usize) -> Vec<f64> {
    if games.is_empty() {
        return Vec::new();
    }

    let mut w: Vec<f64> = games
        .iter()
        .map(|g| (-cfg.decay_rate * g.age_days.max(0) as f64).exp())
        .collect();

    // Fade out the tail before the game cap instead of cutting it off.
    if cfg.taper_games > 0 {
        let start = max_games.saturating_sub(cfg.taper_games);
        for (idx, wi) in w.iter_mut().enumerate().skip(start) {
            let t = ((idx - start + 1) as f64 / cfg.taper_games as f64).min(1.0);
            *wi *= 1.0 - (1.0 - cfg.taper_floor) * t;
        }
    }

    enforce_recent_share(&mut w, cfg.recent_k, cfg.recent_share);

    let total: f64 = w.iter().sum();
    if total <= 0.0 || !total.is_finite() {
        let uniform = 1.0 / w.len() as f64;
        return vec![uniform; w.len()];
    }
    w.iter().map(|x| x / total).collect()
}

/// Scale the first `k` weights up until they hold at least `share` of the mass.
fn enforce_recent_share(w: &mut [f64], k: usize, share: f64) {
    let k = k.min(w.len());
    if k == 0 || k == w.len() {
        return;
    }
    let head: f64 = w[..k].iter().sum();
    let tail: f64 = w[k..].iter().sum();
    if head <= 0.0 || head + tail <= 0.0 || head / (head + tail) >= share {
        return;
    }
    let factor = share * tail / ((1.0 - share) * head);
    for x in &mut w[..k] {
        *x *= factor;
    }
}

/// Share of total weight held by the first `k` entries.
pub fn head_share(weights: &[f64], k: usize) -> f64 {
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }
    weights.iter().take(k).sum::<f64>() / total
}
