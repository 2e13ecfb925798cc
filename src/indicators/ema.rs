// =============================================================================
// Exponential Moving Average (EMA)
// =============================================================================
//
// Formula:
//   multiplier = 2 / (period + 1)
//   EMA_t      = value_t * multiplier + EMA_{t-1} * (1 - multiplier)
//
// The first EMA value is seeded with the SMA of the first `period` inputs.
// =============================================================================

/// Compute the EMA series for `values` with look-back `period`.
///
/// Each output element corresponds to an input starting at index
/// `period - 1`.
///
/// # Edge cases
/// - `period == 0` or `values.len() < period` => empty vec
/// - A non-finite intermediate stops the series; downstream consumers should
///   not trust a broken tail.
pub fn ema(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }

    let multiplier = 2.0 / (period + 1) as f64;

    // Seed: SMA of the first `period` values.
    let seed: f64 = values[..period].iter().sum::<f64>() / period as f64;
    if !seed.is_finite() {
        return Vec::new();
    }

    let mut result = Vec::with_capacity(values.len() - period + 1);
    result.push(seed);

    let mut prev = seed;
    for &v in &values[period..] {
        let next = v * multiplier + prev * (1.0 - multiplier);
        if !next.is_finite() {
            break;
        }
        result.push(next);
        prev = next;
    }

    result
}

/// Most recent EMA value, if the series can be computed at all.
pub fn latest(values: &[f64], period: usize) -> Option<f64> {
    ema(values, period).last().copied()
}
