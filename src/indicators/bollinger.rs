// =============================================================================
// Bollinger Bands
// =============================================================================
//
// Middle band = SMA(period), upper/lower = middle ± k * σ over the same
// window. Width = (upper - lower) / middle * 100.

/// Result of a Bollinger Band calculation over the most recent window.
#[derive(Debug, Clone)]
pub struct BollingerBands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
    pub width: f64,
}

/// Calculate Bollinger Bands over the trailing `period` values.
///
/// Returns `None` when:
/// - Fewer than `period` values or `period == 0`.
/// - The middle band is zero (degenerate input).
/// - The width is non-finite.
pub fn bollinger(values: &[f64], period: usize, num_std: f64) -> Option<BollingerBands> {
    if period == 0 || values.len() < period {
        return None;
    }

    let window = &values[values.len() - period..];
    let middle = window.iter().sum::<f64>() / period as f64;

    if middle == 0.0 {
        return None;
    }

    let variance = window.iter().map(|x| (x - middle).powi(2)).sum::<f64>() / period as f64;
    let std_dev = variance.sqrt();

    let upper = middle + num_std * std_dev;
    let lower = middle - num_std * std_dev;
    let width = (upper - lower) / middle * 100.0;

    width.is_finite().then_some(BollingerBands {
        upper,
        middle,
        lower,
        width,
    })
}
