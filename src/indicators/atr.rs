// =============================================================================
// Average True Range (ATR) — Wilder's Smoothing
// =============================================================================
//
// True Range per bar:
//   TR = max(H - L, |H - prevClose|, |L - prevClose|)
// ATR is the Wilder-smoothed average of TR:
//   ATR_0 = SMA of first `period` TR values
//   ATR_t = (ATR_{t-1} * (period - 1) + TR_t) / period

use crate::types::Candle;

/// Most recent ATR value over `candles` (oldest first).
///
/// Returns `None` when `period` is zero, there are fewer than `period + 1`
/// candles (each TR needs a previous close), or any intermediate value is
/// non-finite.
pub fn atr(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }

    let mut tr_values = Vec::with_capacity(candles.len() - 1);
    for pair in candles.windows(2) {
        let prev_close = pair[0].close;
        let c = &pair[1];

        let hl = c.high - c.low;
        let hc = (c.high - prev_close).abs();
        let lc = (c.low - prev_close).abs();
        tr_values.push(hl.max(hc).max(lc));
    }

    let seed: f64 = tr_values[..period].iter().sum::<f64>() / period as f64;
    if !seed.is_finite() {
        return None;
    }

    let period_f = period as f64;
    let mut value = seed;
    for &tr in &tr_values[period..] {
        value = (value * (period_f - 1.0) + tr) / period_f;
        if !value.is_finite() {
            return None;
        }
    }

    Some(value)
}

/// ATR as a percentage of the last close. Comparable across price scales.
pub fn atr_pct(candles: &[Candle], period: usize) -> Option<f64> {
    let value = atr(candles, period)?;
    let last_close = candles.last()?.close;
    if last_close == 0.0 {
        return None;
    }
    Some(value / last_close * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::testutil::candle;

    #[test]
    fn atr_degenerate_inputs() {
        assert!(atr(&[], 14).is_none());
        assert!(atr(&[candle(1.0, 2.0, 0.5, 1.5)], 0).is_none());
        let candles: Vec<Candle> = (0..10).map(|_| candle(1.0, 2.0, 0.5, 1.5)).collect();
        assert!(atr(&candles, 14).is_none());
    }

    #[test]
    fn atr_constant_range() {
        // Identical bars: TR = high - low = 2 for every bar.
        let candles: Vec<Candle> = (0..20).map(|_| candle(100.0, 101.0, 99.0, 100.0)).collect();
        let value = atr(&candles, 14).unwrap();
        assert!((value - 2.0).abs() < 1e-10);
    }

    #[test]
    fn atr_gap_counts_in_true_range() {
        // A big gap between closes dominates the bar's own range.
        let mut candles: Vec<Candle> = (0..15).map(|_| candle(100.0, 101.0, 99.0, 100.0)).collect();
        candles.push(candle(150.0, 151.0, 149.0, 150.0));
        let with_gap = atr(&candles, 14).unwrap();
        assert!(with_gap > 2.0);
    }

    #[test]
    fn atr_pct_scales_by_price() {
        let candles: Vec<Candle> = (0..20).map(|_| candle(100.0, 101.0, 99.0, 100.0)).collect();
        let pct = atr_pct(&candles, 14).unwrap();
        assert!((pct - 2.0).abs() < 1e-10);
    }
}
