//! # Abnormality Evaluator
//!
//! Pure classification of a temperature vector. A reading is abnormal when any
//! valid channel leaves the comfort band, or when the channels disagree with
//! each other by more than the allowed spread.

/// Lower bound of the comfort band (inclusive), in °C.
pub const MIN_NORMAL_TEMP: f64 = 20.0;
/// Upper bound of the comfort band (inclusive), in °C.
pub const MAX_NORMAL_TEMP: f64 = 26.0;
/// Largest allowed `max - min` across valid channels, in °C.
pub const MAX_SPREAD: f64 = 5.0;

fn valid(temperatures: &[Option<f64>]) -> impl Iterator<Item = f64> + '_ {
    temperatures.iter().flatten().copied().filter(|t| t.is_finite())
}

/// Returns `true` when the reading should be flagged.
///
/// Null and non-finite channels are ignored. No valid channel means `false`.
pub fn evaluate(temperatures: &[Option<f64>]) -> bool {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    let mut seen = false;

    for t in valid(temperatures) {
        if !(MIN_NORMAL_TEMP..=MAX_NORMAL_TEMP).contains(&t) {
            return true;
        }
        min = min.min(t);
        max = max.max(t);
        seen = true;
    }

    seen && max - min > MAX_SPREAD
}

/// Mean of the valid channels, `None` when there are none.
pub fn average(temperatures: &[Option<f64>]) -> Option<f64> {
    let (sum, count) = valid(temperatures).fold((0.0, 0usize), |(s, c), t| (s + t, c + 1));
    (count > 0).then(|| sum / count as f64)
}
