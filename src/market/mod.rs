// =============================================================================
// Market Data Collaborators
// =============================================================================
//
// The engine consumes market data through these interfaces only. Rate
// limiting and connection pooling are the provider's concern; the engine's
// per-run fetcher deduplicates requests so one pass never amplifies load.

pub mod binance;
pub mod universe;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::types::{Candle, Interval, Ticker};

pub use binance::BinanceMarketData;
pub use universe::{BinanceUniverse, StaticUniverse};

/// Kline and ticker source shared by all runs.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Most recent `limit` candles (oldest first). The trailing candle may
    /// still be open; the snapshot builder strips it.
    async fn get_klines(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
    ) -> anyhow::Result<Vec<Candle>>;

    async fn get_ticker(&self, symbol: &str) -> anyhow::Result<Ticker>;

    async fn get_tickers_batch(
        &self,
        symbols: &[String],
    ) -> anyhow::Result<HashMap<String, Ticker>>;
}

/// Read-only source of the symbol universe scanned by each run.
#[async_trait]
pub trait SymbolUniverseProvider: Send + Sync {
    async fn list(&self) -> anyhow::Result<Vec<String>>;
}
