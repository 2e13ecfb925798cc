// =============================================================================
// Stochastic Oscillator
// =============================================================================
//
// %K = 100 * (close - lowest_low(k_period)) / (highest_high - lowest_low)
// %D = SMA of the last `d_period` %K values
//
// Flat ranges (highest == lowest) read as 50 — no directional information.

use crate::types::Candle;

/// Latest stochastic reading.
#[derive(Debug, Clone)]
pub struct StochasticResult {
    pub k: f64,
    pub d: f64,
}

/// Compute the latest %K / %D pair.
///
/// Returns `None` when there are fewer than `k_period + d_period - 1`
/// candles, or any period is zero, or a value is non-finite.
pub fn stochastic(candles: &[Candle], k_period: usize, d_period: usize) -> Option<StochasticResult> {
    if k_period == 0 || d_period == 0 || candles.len() < k_period + d_period - 1 {
        return None;
    }

    // %K for the last `d_period` bars.
    let mut k_values = Vec::with_capacity(d_period);
    for end in (candles.len() - d_period + 1)..=candles.len() {
        let window = &candles[end - k_period..end];
        let close = window.last()?.close;

        let mut highest = f64::MIN;
        let mut lowest = f64::MAX;
        for c in window {
            highest = highest.max(c.high);
            lowest = lowest.min(c.low);
        }

        let range = highest - lowest;
        let k = if range == 0.0 {
            50.0
        } else {
            100.0 * (close - lowest) / range
        };
        if !k.is_finite() {
            return None;
        }
        k_values.push(k);
    }

    let k = *k_values.last()?;
    let d = k_values.iter().sum::<f64>() / d_period as f64;

    (k.is_finite() && d.is_finite()).then_some(StochasticResult { k, d })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::testutil::{candle, rising};

    #[test]
    fn stochastic_degenerate_inputs() {
        assert!(stochastic(&[], 14, 3).is_none());
        assert!(stochastic(&rising(10), 14, 3).is_none());
        assert!(stochastic(&rising(30), 0, 3).is_none());
        assert!(stochastic(&rising(30), 14, 0).is_none());
    }

    #[test]
    fn stochastic_top_of_range_near_100() {
        // Monotonic rise closes at the top of every window.
        let st = stochastic(&rising(30), 14, 3).unwrap();
        assert!(st.k > 85.0, "got k={}", st.k);
        assert!(st.d > 85.0, "got d={}", st.d);
    }

    #[test]
    fn stochastic_bottom_of_range_near_0() {
        let candles: Vec<Candle> = (1..=30)
            .rev()
            .map(|i| {
                let c = 100.0 + i as f64;
                candle(c + 0.5, c + 1.0, c - 1.0, c)
            })
            .collect();
        let st = stochastic(&candles, 14, 3).unwrap();
        assert!(st.k < 15.0, "got k={}", st.k);
    }

    #[test]
    fn stochastic_flat_range_reads_50() {
        let candles: Vec<Candle> = (0..30).map(|_| candle(100.0, 100.0, 100.0, 100.0)).collect();
        let st = stochastic(&candles, 14, 3).unwrap();
        assert!((st.k - 50.0).abs() < 1e-10);
        assert!((st.d - 50.0).abs() < 1e-10);
    }

    #[test]
    fn stochastic_in_range() {
        let candles: Vec<Candle> = (0..60)
            .map(|i| {
                let base = 100.0 + (i as f64 * 0.9).sin() * 10.0;
                candle(base, base + 2.0, base - 2.0, base + 1.0)
            })
            .collect();
        let st = stochastic(&candles, 14, 3).unwrap();
        assert!((0.0..=100.0).contains(&st.k));
        assert!((0.0..=100.0).contains(&st.d));
    }
}
