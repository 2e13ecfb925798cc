// =============================================================================
// Shared market types used across the Aurora screener engine
// =============================================================================
//
// Candle times are epoch milliseconds with an inclusive-exclusive convention:
// close_time = open_time + interval_ms. Binance reports the inclusive last
// millisecond (open + interval - 1); parsers normalise to the exclusive form
// so that multi-timeframe views align on exact boundaries.
// =============================================================================

use serde::{Deserialize, Serialize};

// =============================================================================
// Interval
// =============================================================================

/// Canonical candle timeframes understood by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl Interval {
    /// All supported intervals, shortest first.
    pub const ALL: [Interval; 7] = [
        Interval::M1,
        Interval::M5,
        Interval::M15,
        Interval::M30,
        Interval::H1,
        Interval::H4,
        Interval::D1,
    ];

    /// Canonical short form ("5m", "1h", ...). This is the wire format used by
    /// candle-close events and the Binance kline API alike.
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::M1 => "1m",
            Interval::M5 => "5m",
            Interval::M15 => "15m",
            Interval::M30 => "30m",
            Interval::H1 => "1h",
            Interval::H4 => "4h",
            Interval::D1 => "1d",
        }
    }

    /// Interval length in milliseconds.
    pub fn duration_ms(&self) -> i64 {
        match self {
            Interval::M1 => 60_000,
            Interval::M5 => 300_000,
            Interval::M15 => 900_000,
            Interval::M30 => 1_800_000,
            Interval::H1 => 3_600_000,
            Interval::H4 => 14_400_000,
            Interval::D1 => 86_400_000,
        }
    }

    /// Parse the canonical short form. Unknown strings return `None`.
    pub fn parse(s: &str) -> Option<Interval> {
        Interval::ALL.iter().copied().find(|iv| iv.as_str() == s)
    }
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Interval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Interval::parse(s).ok_or_else(|| format!("unknown interval: {s}"))
    }
}

// =============================================================================
// Candle
// =============================================================================

/// A single OHLCV candle for one symbol on one interval.
///
/// Immutable once `is_closed` is true. Numerics are IEEE-754 doubles; the
/// engine never rounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: i64,
    /// Exclusive close time: `open_time + interval_ms`.
    pub close_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub quote_volume: f64,
    pub trades_count: u64,
    pub taker_buy_volume: f64,
    pub taker_buy_quote_volume: f64,
    pub is_closed: bool,
}

impl Candle {
    /// Typical price of the bar, used by VWAP.
    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }

    /// Whether this candle is closed relative to `now` (exclusive close time).
    pub fn closed_at(&self, now: i64) -> bool {
        self.is_closed || self.close_time <= now
    }
}

// =============================================================================
// Ticker
// =============================================================================

/// Latest 24h ticker snapshot for a symbol. Read-only once fetched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub last_price: f64,
    pub price_change_percent: f64,
    pub quote_volume: f64,
}

// =============================================================================
// CandleClose event
// =============================================================================

/// Trigger emitted by the market feed when a candle for a given interval
/// closes. The dispatcher fans these out to every enabled trader whose
/// primary interval matches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandleClose {
    pub interval: Interval,
    /// Exclusive close time of the candle that just closed (epoch ms).
    pub close_time: i64,
    /// The reference kline that produced the event, when available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kline: Option<Candle>,
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_roundtrip() {
        for iv in Interval::ALL {
            assert_eq!(Interval::parse(iv.as_str()), Some(iv));
        }
        assert_eq!(Interval::parse("2h"), None);
        assert_eq!(Interval::parse(""), None);
    }

    #[test]
    fn interval_durations_are_aligned() {
        assert_eq!(Interval::M1.duration_ms(), 60_000);
        assert_eq!(Interval::H4.duration_ms(), 4 * Interval::H1.duration_ms());
        assert_eq!(Interval::D1.duration_ms(), 24 * Interval::H1.duration_ms());
    }

    #[test]
    fn interval_serde_uses_short_form() {
        let json = serde_json::to_string(&Interval::M5).unwrap();
        assert_eq!(json, "\"5m\"");
        let iv: Interval = serde_json::from_str("\"1h\"").unwrap();
        assert_eq!(iv, Interval::H1);
    }

    #[test]
    fn candle_closed_at_boundary() {
        let c = Candle {
            open_time: 0,
            close_time: 300_000,
            open: 1.0,
            high: 2.0,
            low: 0.5,
            close: 1.5,
            volume: 10.0,
            quote_volume: 15.0,
            trades_count: 3,
            taker_buy_volume: 5.0,
            taker_buy_quote_volume: 7.5,
            is_closed: false,
        };
        assert!(!c.closed_at(299_999));
        assert!(c.closed_at(300_000));
    }

    #[test]
    fn typical_price() {
        let c = Candle {
            open_time: 0,
            close_time: 60_000,
            open: 10.0,
            high: 12.0,
            low: 8.0,
            close: 10.0,
            volume: 1.0,
            quote_volume: 10.0,
            trades_count: 1,
            taker_buy_volume: 0.5,
            taker_buy_quote_volume: 5.0,
            is_closed: true,
        };
        assert!((c.typical_price() - 10.0).abs() < f64::EPSILON);
    }
}
