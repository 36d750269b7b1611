//! Shared statistical primitives: medians, weighted means, and the kernel
//! density mode estimate used for scaffold-level centering.
//!
//! Every function is pure and returns `None` on empty or degenerate input;
//! callers translate that into an `UndefinedStatistic` error with stage
//! context instead of letting a NaN propagate.

/// Number of evaluation points in the density grid
const DENSITY_GRID_POINTS: usize = 512;

/// Grid extends this many bandwidths beyond the data range
const DENSITY_CUT: f64 = 3.0;

/// Median of a slice. Averages the two central order statistics on even
/// lengths. Returns `None` on empty input.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let n = sorted.len();
    if n % 2 == 1 {
        Some(sorted[n / 2])
    } else {
        Some((sorted[n / 2 - 1] + sorted[n / 2]) / 2.0)
    }
}

/// Linear-interpolation quantile on sorted data (R type 7).
fn quantile_sorted(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }

    let h = (n - 1) as f64 * p;
    let lo = h.floor() as usize;
    let hi = std::cmp::min(lo + 1, n - 1);
    sorted[lo] + (h - h.floor()) * (sorted[hi] - sorted[lo])
}

/// Interquartile range. Returns `None` on empty input.
pub fn interquartile_range(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    Some(quantile_sorted(&sorted, 0.75) - quantile_sorted(&sorted, 0.25))
}

/// Sample standard deviation (n-1 denominator). Returns `None` for fewer
/// than two values.
pub fn std_dev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }

    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let ss: f64 = values.iter().map(|v| (v - mean) * (v - mean)).sum();
    Some((ss / (n - 1.0)).sqrt())
}

/// Weighted arithmetic mean. Returns `None` when the inputs are empty or the
/// total weight is not positive.
pub fn weighted_mean(values: &[f64], weights: &[f64]) -> Option<f64> {
    if values.is_empty() || values.len() != weights.len() {
        return None;
    }

    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return None;
    }

    let weighted: f64 = values.iter().zip(weights).map(|(v, w)| v * w).sum();
    Some(weighted / total)
}

/// Rule-of-thumb bandwidth for a Gaussian kernel, after R's `bw.nrd0`:
/// `0.9 * min(sd, IQR/1.34) * n^(-1/5)` with the same zero fallbacks.
pub fn nrd0_bandwidth(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }

    let sd = std_dev(values).unwrap_or(0.0);
    let iqr = interquartile_range(values)?;

    let mut spread = sd.min(iqr / 1.34);
    if spread == 0.0 {
        spread = sd;
    }
    if spread == 0.0 {
        spread = values[0].abs() * 0.1;
    }
    if spread == 0.0 {
        spread = 1.0;
    }

    Some(0.9 * spread * (values.len() as f64).powf(-0.2))
}

/// Location of the maximum of a Gaussian kernel density estimate.
///
/// The density is evaluated on a 512-point uniform grid spanning the data
/// range padded by three bandwidths on each side; ties go to the lowest grid
/// point. With fewer than two distinct values the mode is that value.
/// Returns `None` on empty input.
pub fn density_mode(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }

    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if min == max {
        return Some(min);
    }

    let bw = nrd0_bandwidth(values)?;
    let from = min - DENSITY_CUT * bw;
    let to = max + DENSITY_CUT * bw;
    let step = (to - from) / (DENSITY_GRID_POINTS - 1) as f64;

    let mut best_x = from;
    let mut best_density = f64::NEG_INFINITY;

    for i in 0..DENSITY_GRID_POINTS {
        let x = from + step * i as f64;
        let density: f64 = values
            .iter()
            .map(|v| {
                let u = (x - v) / bw;
                (-0.5 * u * u).exp()
            })
            .sum();

        if density > best_density {
            best_density = density;
            best_x = x;
        }
    }

    Some(best_x)
}
