// =============================================================================
// MarketSnapshotBuilder — per-symbol view assembly
// =============================================================================
//
// A snapshot is the read-only world a filter program sees: one symbol's
// ticker plus closed candles for every interval the trader declared.
// `now` is the triggering event's close time, not the wall clock, so a run is
// reproducible and multi-timeframe views align.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use crate::engine::fetcher::DataFetcher;
use crate::error::TaskError;
use crate::trader::Trader;
use crate::types::{Candle, Interval, Ticker};

/// Read-only market view for one (trader, symbol) evaluation.
#[derive(Debug, Clone)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub ticker: Ticker,
    /// Closed candles per interval, oldest first, ending at the most recent
    /// closed candle at `now`.
    pub klines: HashMap<Interval, Arc<Vec<Candle>>>,
    /// The candle-close event time (epoch ms).
    pub now: i64,
}

impl MarketSnapshot {
    /// Last closed candle on the trader's primary interval.
    pub fn last_candle(&self, interval: Interval) -> Option<&Candle> {
        self.klines.get(&interval).and_then(|c| c.last())
    }
}

/// Builds snapshots against a per-run fetcher.
pub struct SnapshotBuilder {
    default_lookback: usize,
}

impl SnapshotBuilder {
    pub fn new(default_lookback: usize) -> Self {
        Self { default_lookback }
    }

    /// Assemble a snapshot for `symbol` honoring the trader's declared
    /// timeframes, or skip the symbol.
    ///
    /// Skips (`TaskError`) when any interval has fewer closed candles than
    /// the trader's minimum, or a fetch fails.
    pub async fn build(
        &self,
        symbol: &str,
        trader: &Trader,
        fetcher: &DataFetcher,
        now: i64,
    ) -> Result<MarketSnapshot, TaskError> {
        let limit = trader
            .filter
            .lookback
            .unwrap_or(0)
            .max(self.default_lookback);
        let min_history = trader.filter.effective_min_history();

        let mut klines = HashMap::new();
        for interval in trader.filter.required_intervals() {
            let raw = fetcher.get_klines(symbol, interval, limit).await?;

            // Use only closed candles: strip any trailing open candle.
            let closed: Vec<Candle> = raw
                .iter()
                .filter(|c| c.closed_at(now))
                .cloned()
                .collect();

            if closed.len() < min_history {
                return Err(TaskError::InsufficientHistory {
                    interval,
                    got: closed.len(),
                    need: min_history,
                });
            }

            klines.insert(interval, Arc::new(closed));
        }

        let ticker = fetcher.get_ticker(symbol).await?;

        Ok(MarketSnapshot {
            symbol: symbol.to_string(),
            ticker,
            klines,
            now,
        })
    }
}
