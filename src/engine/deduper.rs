// =============================================================================
// SignalDeduper — sliding-window collapse of repeated matches
// =============================================================================
//
// Key: (trader_id, symbol, interval, triggered_at). The first admit for a key
// is new with count=1; repeats within the window return the same signal
// identity with count incremented. Price/change/volume keep the first
// observation; only `count` advances.
//
// State is process-scoped and intentionally not persisted: after a restart
// dedup resumes fresh, which may cause at most one duplicate per key.
// =============================================================================

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::signal::Signal;
use crate::types::Interval;

type DedupKey = (String, String, Interval, i64);

struct DedupEntry {
    signal: Signal,
    expires_at: Instant,
}

/// Result of admitting a candidate signal.
#[derive(Debug, Clone)]
pub struct Admitted {
    /// The surviving signal identity with its current count.
    pub signal: Signal,
    /// True exactly once per key per window: the caller persists it. Repeats
    /// update the existing row's count instead.
    pub is_new: bool,
}

pub struct SignalDeduper {
    entries: Mutex<HashMap<DedupKey, DedupEntry>>,
    window_multiplier: f64,
}

impl SignalDeduper {
    /// `window_multiplier` scales the trader's interval into the dedup
    /// window (default 2.0 => two candle periods).
    pub fn new(window_multiplier: f64) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            window_multiplier: window_multiplier.max(0.0),
        }
    }

    fn window_for(&self, interval: Interval) -> Duration {
        let ms = (interval.duration_ms() as f64 * self.window_multiplier).max(0.0);
        Duration::from_millis(ms as u64)
    }

    /// Admit a candidate. The first admit per key wins the identity; order of
    /// admission across symbols is irrelevant.
    pub fn admit(&self, candidate: Signal) -> Admitted {
        let key = candidate.dedup_key();
        let window = self.window_for(candidate.interval);
        let now = Instant::now();

        let mut entries = self.entries.lock();

        // Drop expired keys opportunistically so the map stays bounded.
        entries.retain(|_, e| e.expires_at > now);

        match entries.get_mut(&key) {
            Some(entry) => {
                entry.signal.count += 1;
                // Sliding window: each repeat extends the key's lifetime.
                entry.expires_at = now + window;
                Admitted {
                    signal: entry.signal.clone(),
                    is_new: false,
                }
            }
            None => {
                let mut signal = candidate;
                signal.count = 1;
                entries.insert(
                    key,
                    DedupEntry {
                        signal: signal.clone(),
                        expires_at: now + window,
                    },
                );
                Admitted {
                    signal,
                    is_new: true,
                }
            }
        }
    }

    /// Number of live (unexpired) keys. For tests and the status API.
    pub fn live_keys(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .values()
            .filter(|e| e.expires_at > now)
            .count()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Ticker;

    fn ticker(price: f64) -> Ticker {
        Ticker {
            symbol: "BTCUSDT".into(),
            last_price: price,
            price_change_percent: 1.2,
            quote_volume: 9.9e8,
        }
    }

    fn candidate(trader: &str, triggered_at: i64, price: f64) -> Signal {
        Signal::candidate(
            trader,
            None,
            &ticker(price),
            Interval::M5,
            triggered_at,
            None,
            None,
        )
    }

    #[test]
    fn first_admit_is_new_with_count_one() {
        let d = SignalDeduper::new(2.0);
        let admitted = d.admit(candidate("t-1", 1_700_000_100_000, 50_000.0));
        assert!(admitted.is_new);
        assert_eq!(admitted.signal.count, 1);
        assert_eq!(d.live_keys(), 1);
    }

    #[test]
    fn repeat_within_window_bumps_count_and_keeps_identity() {
        let d = SignalDeduper::new(2.0);
        let first = d.admit(candidate("t-1", 1_700_000_100_000, 50_000.0));
        let second = d.admit(candidate("t-1", 1_700_000_100_000, 51_234.0));

        assert!(!second.is_new);
        assert_eq!(second.signal.count, 2);
        assert_eq!(second.signal.id, first.signal.id);
        // First observation preserved; only count advances.
        assert!((second.signal.price_at_signal - 50_000.0).abs() < f64::EPSILON);
        assert_eq!(d.live_keys(), 1);
    }

    #[test]
    fn distinct_keys_do_not_collide() {
        let d = SignalDeduper::new(2.0);
        assert!(d.admit(candidate("t-1", 100, 1.0)).is_new);
        assert!(d.admit(candidate("t-2", 100, 1.0)).is_new); // other trader
        assert!(d.admit(candidate("t-1", 200, 1.0)).is_new); // other close time
        assert_eq!(d.live_keys(), 3);
    }

    #[test]
    fn expired_keys_admit_as_new_again() {
        // Zero multiplier => the window expires immediately.
        let d = SignalDeduper::new(0.0);
        assert!(d.admit(candidate("t-1", 100, 1.0)).is_new);
        std::thread::sleep(Duration::from_millis(5));
        let again = d.admit(candidate("t-1", 100, 1.0));
        assert!(again.is_new);
        assert_eq!(again.signal.count, 1);
    }

    #[test]
    fn dedup_is_order_independent_across_symbols() {
        let d = SignalDeduper::new(2.0);
        let mut a = candidate("t-1", 100, 1.0);
        a.symbol = "AAAUSDT".into();
        let mut b = candidate("t-1", 100, 1.0);
        b.symbol = "BBBUSDT".into();

        let ra = d.admit(a);
        let rb = d.admit(b);
        assert!(ra.is_new && rb.is_new);
        assert_ne!(ra.signal.symbol, rb.signal.symbol);
    }
}
