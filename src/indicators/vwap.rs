// =============================================================================
// Volume-Weighted Average Price (VWAP)
// =============================================================================
//
// VWAP over a trailing window of candles:
//   VWAP = Σ(typical_price_i * volume_i) / Σ(volume_i)
// where typical_price = (high + low + close) / 3.

use crate::types::Candle;

/// Compute VWAP over the trailing `period` candles.
///
/// Returns `None` when there are fewer than `period` candles, the period is
/// zero, the window's total volume is zero, or the result is non-finite.
pub fn vwap(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period {
        return None;
    }

    let window = &candles[candles.len() - period..];

    let mut pv_sum = 0.0;
    let mut vol_sum = 0.0;
    for c in window {
        pv_sum += c.typical_price() * c.volume;
        vol_sum += c.volume;
    }

    if vol_sum <= 0.0 {
        return None;
    }

    let value = pv_sum / vol_sum;
    value.is_finite().then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::testutil::candle;

    #[test]
    fn vwap_degenerate_inputs() {
        assert!(vwap(&[], 5).is_none());
        assert!(vwap(&[candle(1.0, 2.0, 0.5, 1.5)], 0).is_none());
        assert!(vwap(&[candle(1.0, 2.0, 0.5, 1.5)], 5).is_none());
    }

    #[test]
    fn vwap_equal_volumes_is_mean_typical_price() {
        let candles = vec![
            candle(10.0, 12.0, 8.0, 10.0), // typical 10
            candle(20.0, 22.0, 18.0, 20.0), // typical 20
        ];
        let value = vwap(&candles, 2).unwrap();
        assert!((value - 15.0).abs() < 1e-10);
    }

    #[test]
    fn vwap_weights_by_volume() {
        let mut heavy = candle(10.0, 12.0, 8.0, 10.0);
        heavy.volume = 300.0;
        let light = candle(20.0, 22.0, 18.0, 20.0); // volume 100
        let value = vwap(&[heavy, light], 2).unwrap();
        // (10*300 + 20*100) / 400 = 12.5
        assert!((value - 12.5).abs() < 1e-10);
    }

    #[test]
    fn vwap_zero_volume_is_none() {
        let mut a = candle(10.0, 12.0, 8.0, 10.0);
        let mut b = candle(20.0, 22.0, 18.0, 20.0);
        a.volume = 0.0;
        b.volume = 0.0;
        assert!(vwap(&[a, b], 2).is_none());
    }
}
