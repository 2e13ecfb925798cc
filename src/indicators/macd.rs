// =============================================================================
// Moving Average Convergence Divergence (MACD)
// =============================================================================
//
// MACD line  = EMA(fast) - EMA(slow)
// Signal     = EMA(MACD line, signal_period)
// Histogram  = MACD line - Signal
//
// Series are aligned to each other: index 0 of every output vector refers to
// the same input bar (the first bar where all three are defined).
// =============================================================================

use super::ema::ema;

/// Aligned MACD output series.
#[derive(Debug, Clone)]
pub struct MacdSeries {
    pub macd: Vec<f64>,
    pub signal: Vec<f64>,
    pub histogram: Vec<f64>,
}

/// Compute MACD over `values`.
///
/// Returns `None` when the input is too short for the slow EMA plus the
/// signal EMA, or when `fast >= slow`, or any period is zero.
pub fn macd(
    values: &[f64],
    fast_period: usize,
    slow_period: usize,
    signal_period: usize,
) -> Option<MacdSeries> {
    if fast_period == 0 || slow_period == 0 || signal_period == 0 || fast_period >= slow_period {
        return None;
    }

    let fast = ema(values, fast_period);
    let slow = ema(values, slow_period);
    if slow.is_empty() {
        return None;
    }

    // The slow series starts (slow_period - fast_period) bars later; align
    // the fast series to it before subtracting.
    let offset = slow_period - fast_period;
    if fast.len() < offset + slow.len() {
        return None;
    }

    let macd_line: Vec<f64> = fast[offset..offset + slow.len()]
        .iter()
        .zip(slow.iter())
        .map(|(f, s)| f - s)
        .collect();

    let signal = ema(&macd_line, signal_period);
    if signal.is_empty() {
        return None;
    }

    // Trim the MACD line to the bars where the signal exists.
    let trim = macd_line.len() - signal.len();
    let macd_aligned = macd_line[trim..].to_vec();

    let histogram: Vec<f64> = macd_aligned
        .iter()
        .zip(signal.iter())
        .map(|(m, s)| m - s)
        .collect();

    Some(MacdSeries {
        macd: macd_aligned,
        signal,
        histogram,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macd_degenerate_inputs() {
        let v: Vec<f64> = (1..=100).map(|x| x as f64).collect();
        assert!(macd(&v, 0, 26, 9).is_none());
        assert!(macd(&v, 12, 0, 9).is_none());
        assert!(macd(&v, 12, 26, 0).is_none());
        assert!(macd(&v, 26, 12, 9).is_none()); // fast >= slow
        assert!(macd(&[1.0, 2.0], 12, 26, 9).is_none());
    }

    #[test]
    fn macd_series_are_aligned() {
        let v: Vec<f64> = (1..=120)
            .map(|x| 100.0 + (x as f64 * 0.3).sin() * 5.0)
            .collect();
        let m = macd(&v, 12, 26, 9).unwrap();
        assert_eq!(m.macd.len(), m.signal.len());
        assert_eq!(m.macd.len(), m.histogram.len());
        assert!(!m.macd.is_empty());
        for i in 0..m.macd.len() {
            assert!((m.histogram[i] - (m.macd[i] - m.signal[i])).abs() < 1e-10);
        }
    }

    #[test]
    fn macd_positive_in_uptrend() {
        let v: Vec<f64> = (1..=120).map(|x| x as f64).collect();
        let m = macd(&v, 12, 26, 9).unwrap();
        assert!(*m.macd.last().unwrap() > 0.0);
    }

    #[test]
    fn macd_negative_in_downtrend() {
        let v: Vec<f64> = (1..=120).rev().map(|x| x as f64).collect();
        let m = macd(&v, 12, 26, 9).unwrap();
        assert!(*m.macd.last().unwrap() < 0.0);
    }

    #[test]
    fn macd_flat_is_zero() {
        let v = vec![100.0; 120];
        let m = macd(&v, 12, 26, 9).unwrap();
        assert!(m.macd.last().unwrap().abs() < 1e-10);
        assert!(m.histogram.last().unwrap().abs() < 1e-10);
    }
}
