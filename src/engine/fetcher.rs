// =============================================================================
// DataFetcher — per-run memoizing cache over the market data provider
// =============================================================================
//
// One instance is created per executor run and discarded at the end; there is
// no cross-run caching. Within the run every (symbol, interval) pays at most
// one upstream kline fetch, and tickers are bulk-warmed with a single batch
// call. Concurrent misses for the same key coalesce into one upstream call
// through a per-key once-cell; errors are memoized too, so a failing key is
// not retried within the run.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::TaskError;
use crate::market::MarketDataProvider;
use crate::types::{Candle, Interval, Ticker};

type KlineResult = Result<Arc<Vec<Candle>>, String>;
type TickerResult = Result<Ticker, String>;
type KlineKey = (String, Interval);

pub struct DataFetcher {
    provider: Arc<dyn MarketDataProvider>,
    timeout: Duration,

    // Per-key single-flight cells. The first caller runs the upstream fetch;
    // concurrent callers for the same key await the same cell.
    klines: RwLock<HashMap<KlineKey, Arc<OnceCell<KlineResult>>>>,
    ticker_cells: RwLock<HashMap<String, Arc<OnceCell<TickerResult>>>>,

    // Warmed ticker map: lock-free-ish reads after the batch warmup.
    tickers: RwLock<HashMap<String, Ticker>>,

    hits: AtomicU64,
    misses: AtomicU64,
}

impl DataFetcher {
    pub fn new(provider: Arc<dyn MarketDataProvider>, timeout: Duration) -> Self {
        Self {
            provider,
            timeout,
            klines: RwLock::new(HashMap::new()),
            ticker_cells: RwLock::new(HashMap::new()),
            tickers: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Bulk-warm the ticker map with a single batch call. On success,
    /// per-symbol `get_ticker` becomes a map lookup. On failure the executor
    /// degrades to per-symbol fetches on demand.
    pub async fn warm_tickers(&self, symbols: &[String]) -> Result<usize, String> {
        match tokio::time::timeout(self.timeout, self.provider.get_tickers_batch(symbols)).await {
            Err(_) => Err(format!(
                "ticker batch timed out after {} ms",
                self.timeout.as_millis()
            )),
            Ok(Err(e)) => Err(e.to_string()),
            Ok(Ok(map)) => {
                let n = map.len();
                self.tickers.write().extend(map);
                debug!(tickers = n, "ticker batch warmed");
                Ok(n)
            }
        }
    }

    /// Fetch (or return memoized) klines for one (symbol, interval).
    ///
    /// The first request for a key fixes the `limit` used upstream; within a
    /// run all requests for a key come from the same trader and agree on it.
    pub async fn get_klines(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
    ) -> Result<Arc<Vec<Candle>>, TaskError> {
        let cell = self.kline_cell(symbol, interval);

        let fetched = AtomicBool::new(false);
        let result = cell
            .get_or_init(|| {
                fetched.store(true, Ordering::Relaxed);
                let provider = Arc::clone(&self.provider);
                let symbol = symbol.to_string();
                let timeout = self.timeout;
                async move {
                    match tokio::time::timeout(
                        timeout,
                        provider.get_klines(&symbol, interval, limit),
                    )
                    .await
                    {
                        Err(_) => Err(format!(
                            "kline fetch timed out after {} ms",
                            timeout.as_millis()
                        )),
                        Ok(Err(e)) => Err(format!("{e:#}")),
                        Ok(Ok(candles)) => Ok(Arc::new(candles)),
                    }
                }
            })
            .await;

        if fetched.load(Ordering::Relaxed) {
            self.misses.fetch_add(1, Ordering::Relaxed);
        } else {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }

        result.clone().map_err(TaskError::KlineFetch)
    }

    /// Ticker lookup: warmed map first, then a per-symbol single-flight
    /// fallback fetch.
    pub async fn get_ticker(&self, symbol: &str) -> Result<Ticker, TaskError> {
        if let Some(t) = self.tickers.read().get(symbol) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(t.clone());
        }

        let cell = self.ticker_cell(symbol);

        let fetched = AtomicBool::new(false);
        let result = cell
            .get_or_init(|| {
                fetched.store(true, Ordering::Relaxed);
                let provider = Arc::clone(&self.provider);
                let symbol = symbol.to_string();
                let timeout = self.timeout;
                async move {
                    match tokio::time::timeout(timeout, provider.get_ticker(&symbol)).await {
                        Err(_) => Err(format!(
                            "ticker fetch timed out after {} ms",
                            timeout.as_millis()
                        )),
                        Ok(Err(e)) => Err(format!("{e:#}")),
                        Ok(Ok(ticker)) => Ok(ticker),
                    }
                }
            })
            .await;

        if fetched.load(Ordering::Relaxed) {
            self.misses.fetch_add(1, Ordering::Relaxed);
            if let Ok(t) = result {
                self.tickers.write().insert(symbol.to_string(), t.clone());
            }
        } else {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }

        result.clone().map_err(|_| TaskError::TickerUnavailable)
    }

    pub fn cache_hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn cache_misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    fn kline_cell(&self, symbol: &str, interval: Interval) -> Arc<OnceCell<KlineResult>> {
        let key = (symbol.to_string(), interval);
        if let Some(cell) = self.klines.read().get(&key) {
            return Arc::clone(cell);
        }
        let mut map = self.klines.write();
        Arc::clone(map.entry(key).or_insert_with(|| Arc::new(OnceCell::new())))
    }

    fn ticker_cell(&self, symbol: &str) -> Arc<OnceCell<TickerResult>> {
        if let Some(cell) = self.ticker_cells.read().get(symbol) {
            return Arc::clone(cell);
        }
        let mut map = self.ticker_cells.write();
        Arc::clone(
            map.entry(symbol.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new())),
        )
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU64;

    /// Provider that counts upstream calls and can be told to fail.
    struct CountingProvider {
        kline_calls: AtomicU64,
        ticker_calls: AtomicU64,
        batch_calls: AtomicU64,
        fail_klines: bool,
        fail_batch: bool,
    }

    impl CountingProvider {
        fn new() -> Self {
            Self {
                kline_calls: AtomicU64::new(0),
                ticker_calls: AtomicU64::new(0),
                batch_calls: AtomicU64::new(0),
                fail_klines: false,
                fail_batch: false,
            }
        }

        fn candle(i: i64) -> Candle {
            Candle {
                open_time: i * 60_000,
                close_time: (i + 1) * 60_000,
                open: 100.0,
                high: 101.0,
                low: 99.0,
                close: 100.5,
                volume: 10.0,
                quote_volume: 1000.0,
                trades_count: 5,
                taker_buy_volume: 6.0,
                taker_buy_quote_volume: 600.0,
                is_closed: true,
            }
        }
    }

    #[async_trait]
    impl MarketDataProvider for CountingProvider {
        async fn get_klines(
            &self,
            _symbol: &str,
            _interval: Interval,
            limit: usize,
        ) -> anyhow::Result<Vec<Candle>> {
            self.kline_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_klines {
                anyhow::bail!("upstream down");
            }
            // Small artificial delay so concurrent callers overlap.
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok((0..limit as i64).map(Self::candle).collect())
        }

        async fn get_ticker(&self, symbol: &str) -> anyhow::Result<Ticker> {
            self.ticker_calls.fetch_add(1, Ordering::SeqCst);
            Ok(Ticker {
                symbol: symbol.to_string(),
                last_price: 50_000.0,
                price_change_percent: 1.2,
                quote_volume: 9.9e8,
            })
        }

        async fn get_tickers_batch(
            &self,
            symbols: &[String],
        ) -> anyhow::Result<HashMap<String, Ticker>> {
            self.batch_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_batch {
                anyhow::bail!("batch down");
            }
            Ok(symbols
                .iter()
                .map(|s| {
                    (
                        s.clone(),
                        Ticker {
                            symbol: s.clone(),
                            last_price: 1.0,
                            price_change_percent: 0.0,
                            quote_volume: 0.0,
                        },
                    )
                })
                .collect())
        }
    }

    fn fetcher(provider: CountingProvider) -> (Arc<CountingProvider>, DataFetcher) {
        let provider = Arc::new(provider);
        let f = DataFetcher::new(provider.clone(), Duration::from_secs(5));
        (provider, f)
    }

    #[tokio::test]
    async fn kline_fetch_is_memoized() {
        let (provider, f) = fetcher(CountingProvider::new());

        let a = f.get_klines("BTCUSDT", Interval::M5, 10).await.unwrap();
        let b = f.get_klines("BTCUSDT", Interval::M5, 10).await.unwrap();
        assert_eq!(a.len(), 10);
        assert!(Arc::ptr_eq(&a, &b));

        assert_eq!(provider.kline_calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.cache_misses(), 1);
        assert_eq!(f.cache_hits(), 1);
    }

    #[tokio::test]
    async fn concurrent_misses_coalesce_into_one_call() {
        let (provider, f) = fetcher(CountingProvider::new());
        let f = Arc::new(f);

        let mut handles = Vec::new();
        for _ in 0..16 {
            let f = Arc::clone(&f);
            handles.push(tokio::spawn(async move {
                f.get_klines("ETHUSDT", Interval::H1, 5).await
            }));
        }
        for h in handles {
            assert!(h.await.unwrap().is_ok());
        }

        assert_eq!(provider.kline_calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.cache_misses(), 1);
        assert_eq!(f.cache_hits(), 15);
    }

    #[tokio::test]
    async fn distinct_intervals_fetch_separately() {
        let (provider, f) = fetcher(CountingProvider::new());

        f.get_klines("BTCUSDT", Interval::M5, 5).await.unwrap();
        f.get_klines("BTCUSDT", Interval::H1, 5).await.unwrap();

        assert_eq!(provider.kline_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn kline_errors_are_memoized_not_retried() {
        let mut p = CountingProvider::new();
        p.fail_klines = true;
        let (provider, f) = fetcher(p);

        assert!(f.get_klines("BTCUSDT", Interval::M5, 5).await.is_err());
        assert!(f.get_klines("BTCUSDT", Interval::M5, 5).await.is_err());

        assert_eq!(provider.kline_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn warmed_tickers_skip_per_symbol_fetch() {
        let (provider, f) = fetcher(CountingProvider::new());

        let symbols = vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()];
        assert_eq!(f.warm_tickers(&symbols).await.unwrap(), 2);

        let t = f.get_ticker("BTCUSDT").await.unwrap();
        assert_eq!(t.symbol, "BTCUSDT");
        assert_eq!(provider.ticker_calls.load(Ordering::SeqCst), 0);
        assert_eq!(f.cache_hits(), 1);
    }

    #[tokio::test]
    async fn failed_warmup_degrades_to_per_symbol() {
        let mut p = CountingProvider::new();
        p.fail_batch = true;
        let (provider, f) = fetcher(p);

        assert!(f.warm_tickers(&["BTCUSDT".to_string()]).await.is_err());

        let t = f.get_ticker("BTCUSDT").await.unwrap();
        assert_eq!(t.symbol, "BTCUSDT");
        assert_eq!(provider.ticker_calls.load(Ordering::SeqCst), 1);

        // Second read now hits the map populated by the fallback.
        f.get_ticker("BTCUSDT").await.unwrap();
        assert_eq!(provider.ticker_calls.load(Ordering::SeqCst), 1);
    }
}
