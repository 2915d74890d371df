//! Small descriptive statistics used by the evaluators and the P* bootstrap.

/// Arithmetic mean; `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample quantile using linear interpolation between order statistics
/// (Hyndman & Fan type 7, the R default).
///
/// `sorted` must be sorted ascending. Returns `None` for an empty slice or a
/// probability outside `[0, 1]`.
pub fn quantile_sorted(sorted: &[f64], prob: f64) -> Option<f64> {
    if sorted.is_empty() || !(0.0..=1.0).contains(&prob) {
        return None;
    }
    let h = (sorted.len() - 1) as f64 * prob;
    let lo = h.floor() as usize;
    let hi = h.ceil() as usize;
    let frac = h - lo as f64;
    Some(sorted[lo] + frac * (sorted[hi] - sorted[lo]))
}

/// Mean squared difference between two equally long slices.
pub fn mean_squared_error(observed: &[f64], predicted: &[f64]) -> Option<f64> {
    if observed.is_empty() || observed.len() != predicted.len() {
        return None;
    }
    let sse: f64 = observed
        .iter()
        .zip(predicted)
        .map(|(o, p)| (o - p) * (o - p))
        .sum();
    Some(sse / observed.len() as f64)
}
