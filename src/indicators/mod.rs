// =============================================================================
// Technical Indicators Module
// =============================================================================
//
// Pure, side-effect-free implementations of the indicator primitives exposed
// to filter programs. Every public function returns `Option<T>` or an empty
// series so callers are forced to handle insufficient-data and numerical
// edge cases.
//
// The registry is a closed set: filter code and trader telemetry declarations
// reference indicators by name, and unknown names are a misconfiguration,
// never a silent no-op.

pub mod atr;
pub mod bollinger;
pub mod ema;
pub mod macd;
pub mod roc;
pub mod rsi;
pub mod sma;
pub mod stochastic;
pub mod vwap;

use serde::{Deserialize, Serialize};

use crate::types::Candle;

/// Closed registry of indicator calculators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndicatorKind {
    Sma,
    Ema,
    Rsi,
    Macd,
    Bollinger,
    Vwap,
    Stochastic,
    Atr,
    Roc,
}

impl IndicatorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndicatorKind::Sma => "sma",
            IndicatorKind::Ema => "ema",
            IndicatorKind::Rsi => "rsi",
            IndicatorKind::Macd => "macd",
            IndicatorKind::Bollinger => "bollinger",
            IndicatorKind::Vwap => "vwap",
            IndicatorKind::Stochastic => "stochastic",
            IndicatorKind::Atr => "atr",
            IndicatorKind::Roc => "roc",
        }
    }

    /// Resolve a registry name. Unknown names return `None` and must be
    /// surfaced as a misconfiguration by the caller.
    pub fn parse(name: &str) -> Option<IndicatorKind> {
        match name {
            "sma" => Some(IndicatorKind::Sma),
            "ema" => Some(IndicatorKind::Ema),
            "rsi" => Some(IndicatorKind::Rsi),
            "macd" => Some(IndicatorKind::Macd),
            "bollinger" => Some(IndicatorKind::Bollinger),
            "vwap" => Some(IndicatorKind::Vwap),
            "stochastic" => Some(IndicatorKind::Stochastic),
            "atr" => Some(IndicatorKind::Atr),
            "roc" => Some(IndicatorKind::Roc),
            _ => None,
        }
    }
}

impl std::fmt::Display for IndicatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One telemetry reading: the latest value plus an optional recent series
/// tail for visualisation.
#[derive(Debug, Clone, Serialize)]
pub struct IndicatorReading {
    pub value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub series: Option<Vec<f64>>,
}

/// Series tail length attached to telemetry readings.
const TELEMETRY_TAIL: usize = 50;

fn tail(series: Vec<f64>) -> Option<Vec<f64>> {
    if series.is_empty() {
        return None;
    }
    let start = series.len().saturating_sub(TELEMETRY_TAIL);
    Some(series[start..].to_vec())
}

/// Compute a default-parameter reading for `kind` over closed candles.
///
/// Used for best-effort signal telemetry; `None` simply means the history is
/// too short for the indicator's default window.
pub fn default_reading(kind: IndicatorKind, candles: &[Candle]) -> Option<IndicatorReading> {
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();

    match kind {
        IndicatorKind::Sma => {
            let series = sma::sma(&closes, 20);
            let value = *series.last()?;
            Some(IndicatorReading {
                value,
                series: tail(series),
            })
        }
        IndicatorKind::Ema => {
            let series = ema::ema(&closes, 21);
            let value = *series.last()?;
            Some(IndicatorReading {
                value,
                series: tail(series),
            })
        }
        IndicatorKind::Rsi => {
            let series = rsi::rsi(&closes, 14);
            let value = *series.last()?;
            Some(IndicatorReading {
                value,
                series: tail(series),
            })
        }
        IndicatorKind::Macd => {
            let m = macd::macd(&closes, 12, 26, 9)?;
            let value = *m.macd.last()?;
            Some(IndicatorReading {
                value,
                series: tail(m.histogram),
            })
        }
        IndicatorKind::Bollinger => {
            let bb = bollinger::bollinger(&closes, 20, 2.0)?;
            Some(IndicatorReading {
                value: bb.width,
                series: None,
            })
        }
        IndicatorKind::Vwap => {
            let value = vwap::vwap(candles, 20)?;
            Some(IndicatorReading {
                value,
                series: None,
            })
        }
        IndicatorKind::Stochastic => {
            let st = stochastic::stochastic(candles, 14, 3)?;
            Some(IndicatorReading {
                value: st.k,
                series: None,
            })
        }
        IndicatorKind::Atr => {
            let value = atr::atr(candles, 14)?;
            Some(IndicatorReading {
                value,
                series: None,
            })
        }
        IndicatorKind::Roc => {
            let series = roc::roc(&closes, 14);
            let value = *series.last()?;
            Some(IndicatorReading {
                value,
                series: tail(series),
            })
        }
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use crate::types::Candle;

    /// Build a closed test candle from OHLC values.
    pub fn candle(open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            open_time: 0,
            close_time: 60_000,
            open,
            high,
            low,
            close,
            volume: 100.0,
            quote_volume: close * 100.0,
            trades_count: 50,
            taker_buy_volume: 60.0,
            taker_buy_quote_volume: close * 60.0,
            is_closed: true,
        }
    }

    /// A gently rising series of closed candles.
    pub fn rising(n: usize) -> Vec<Candle> {
        (1..=n)
            .map(|i| {
                let c = 100.0 + i as f64;
                candle(c - 0.5, c + 1.0, c - 1.0, c)
            })
            .collect()
    }
}
