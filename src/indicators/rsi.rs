// =============================================================================
// Relative Strength Index (RSI) — Wilder's Smoothing
// =============================================================================
//
// Step 1 — Compute deltas from consecutive values.
// Step 2 — Seed average gain / loss with the SMA of the first `period`
//          gains / losses.
// Step 3 — Wilder's smoothing:
//            avg_gain = (prev_avg_gain * (period - 1) + gain) / period
//            avg_loss = (prev_avg_loss * (period - 1) + loss) / period
// Step 4 — RS  = avg_gain / avg_loss
//          RSI = 100 - 100 / (1 + RS)
// =============================================================================

/// Compute the RSI series for `values` with look-back `period`.
///
/// One output per input starting at index `period` (the first `period`
/// values seed the averages).
///
/// # Edge cases
/// - `period == 0` or fewer than `period + 1` values => empty vec
/// - All-gain windows clamp to 100, all-loss to 0, no movement to 50.
/// - Non-finite results truncate the series.
pub fn rsi(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period + 1 {
        return Vec::new();
    }

    let deltas: Vec<f64> = values.windows(2).map(|w| w[1] - w[0]).collect();

    let (sum_gain, sum_loss) = deltas[..period]
        .iter()
        .fold((0.0_f64, 0.0_f64), |(g, l), &d| {
            if d > 0.0 {
                (g + d, l)
            } else {
                (g, l + d.abs())
            }
        });

    let period_f = period as f64;
    let mut avg_gain = sum_gain / period_f;
    let mut avg_loss = sum_loss / period_f;

    let mut result = Vec::with_capacity(deltas.len() - period + 1);
    match from_averages(avg_gain, avg_loss) {
        Some(v) => result.push(v),
        None => return Vec::new(),
    }

    for &delta in &deltas[period..] {
        let gain = delta.max(0.0);
        let loss = (-delta).max(0.0);

        avg_gain = (avg_gain * (period_f - 1.0) + gain) / period_f;
        avg_loss = (avg_loss * (period_f - 1.0) + loss) / period_f;

        match from_averages(avg_gain, avg_loss) {
            Some(v) => result.push(v),
            None => break,
        }
    }

    result
}

/// Most recent RSI value, if the series can be computed at all.
pub fn latest(values: &[f64], period: usize) -> Option<f64> {
    rsi(values, period).last().copied()
}

/// Convert smoothed averages into an RSI value in [0, 100].
fn from_averages(avg_gain: f64, avg_loss: f64) -> Option<f64> {
    let value = if avg_loss == 0.0 && avg_gain == 0.0 {
        50.0 // No movement at all.
    } else if avg_loss == 0.0 {
        100.0 // Only gains.
    } else {
        let rs = avg_gain / avg_loss;
        100.0 - 100.0 / (1.0 + rs)
    };

    value.is_finite().then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rsi_degenerate_inputs() {
        assert!(rsi(&[], 14).is_empty());
        assert!(rsi(&[1.0, 2.0, 3.0], 0).is_empty());
        // 14 values => 13 deltas < 14.
        let v: Vec<f64> = (1..=14).map(|x| x as f64).collect();
        assert!(rsi(&v, 14).is_empty());
    }

    #[test]
    fn rsi_all_gains_is_100() {
        let v: Vec<f64> = (1..=30).map(|x| x as f64).collect();
        for value in rsi(&v, 14) {
            assert!((value - 100.0).abs() < 1e-10);
        }
    }

    #[test]
    fn rsi_all_losses_is_0() {
        let v: Vec<f64> = (1..=30).rev().map(|x| x as f64).collect();
        for value in rsi(&v, 14) {
            assert!(value.abs() < 1e-10);
        }
    }

    #[test]
    fn rsi_flat_is_50() {
        let v = vec![100.0; 30];
        for value in rsi(&v, 14) {
            assert!((value - 50.0).abs() < 1e-10);
        }
    }

    #[test]
    fn rsi_stays_in_range() {
        let v = [
            44.34, 44.09, 44.15, 43.61, 44.33, 44.83, 45.10, 45.42, 45.84, 46.08, 45.89, 46.03,
            44.18, 44.22, 44.57, 43.42, 42.66, 43.13,
        ];
        for value in rsi(&v, 14) {
            assert!((0.0..=100.0).contains(&value));
        }
    }

    #[test]
    fn latest_matches_tail() {
        let v: Vec<f64> = (1..=40).map(|x| (x as f64 * 0.7).sin() * 10.0 + 100.0).collect();
        assert_eq!(latest(&v, 14), rsi(&v, 14).last().copied());
    }
}
