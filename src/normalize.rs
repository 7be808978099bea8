use crate::config::NormMode;

const STD_EPS: f64 = 1e-9;

/// Population mean and standard deviation of a cohort metric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dist {
    pub mean: f64,
    pub std: f64,
}

impl Dist {
    pub fn of(values: &[f64]) -> Option<Dist> {
        if values.is_empty() {
            return None;
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let var = values
            .iter()
            .map(|v| {
                let d = v - mean;
                d * d
            })
            .sum::<f64>()
            / n;
        Some(Dist {
            mean,
            std: var.sqrt(),
        })
    }

    /// Zero when the cohort has no spread.
    pub fn z(&self, value: f64) -> f64 {
        if self.std <= STD_EPS {
            0.0
        } else {
            (value - self.mean) / self.std
        }
    }
}

pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Z-score then logistic squash into (0, 1); order preserving, mean lands on 0.5.
pub fn zscore_sigmoid(values: &[f64], slope: f64) -> Vec<f64> {
    let Some(dist) = Dist::of(values) else {
        return Vec::new();
    };
    values.iter().map(|v| sigmoid(dist.z(*v) * slope)).collect()
}

/// Percentile rank in [0, 1] with ties sharing their average rank.
pub fn percentile_ranks(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    if n == 0 {
        return Vec::new();
    }
    if n == 1 {
        return vec![0.5];
    }
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|a, b| values[*a].total_cmp(&values[*b]).then(a.cmp(b)));

    let mut out = vec![0.0; n];
    let mut i = 0;
    while i < n {
        let mut j = i;
        while j + 1 < n && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        // 0-based ranks i..=j share their average
        let avg_rank = (i + j) as f64 / 2.0;
        for k in i..=j {
            out[order[k]] = avg_rank / (n - 1) as f64;
        }
        i = j + 1;
    }
    out
}

pub fn normalize(values: &[f64], mode: NormMode, slope: f64) -> Vec<f64> {
    match mode {
        NormMode::Zscore => zscore_sigmoid(values, slope),
        NormMode::Percentile => percentile_ranks(values),
    }
}

/// Pull values beyond `z_cap` standard deviations back onto the bound.
/// Returns which entries were clamped.
pub fn winsorize(values: &mut [f64], z_cap: f64) -> Vec<bool> {
    let Some(dist) = Dist::of(values) else {
        return Vec::new();
    };
    if dist.std <= STD_EPS {
        return vec![false; values.len()];
    }
    let lo = dist.mean - z_cap * dist.std;
    let hi = dist.mean + z_cap * dist.std;
    values
        .iter_mut()
        .map(|v| {
            if *v < lo {
                *v = lo;
                true
            } else if *v > hi {
                *v = hi;
                true
            } else {
                false
            }
        })
        .collect()
}
