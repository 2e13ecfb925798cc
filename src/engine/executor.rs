// =============================================================================
// TraderExecutor — one execution pass for one trader
// =============================================================================
//
// State machine per run:
//
//   Pending → Preparing → Scanning → Collecting → Persisting → Reporting → Done
//   any state → Failed on fatal error, → Cancelled on shutdown
//
// Per-symbol errors never abort the pass; they are collected into the result.
// Fatal errors are: universe unavailable, ticker warmup plus every per-symbol
// fallback failing, and a batch write that fails its one retry.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::analysis::{AnalysisQueue, AnalysisRequest};
use crate::config::EngineConfig;
use crate::engine::deduper::SignalDeduper;
use crate::engine::fetcher::DataFetcher;
use crate::engine::snapshot::{MarketSnapshot, SnapshotBuilder};
use crate::engine::worker_pool::WorkerPool;
use crate::error::{RunError, TaskError};
use crate::market::{MarketDataProvider, SymbolUniverseProvider};
use crate::metrics::EngineMetrics;
use crate::sandbox::FilterSandbox;
use crate::signal::{ExecutionResult, RunState, Signal, SymbolError};
use crate::store::{SignalStore, TraderRepository};
use crate::trader::{MetricsDelta, Trader};
use crate::types::CandleClose;

/// Backoff before the single store-write retry.
const STORE_RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// A matched symbol: the candidate signal plus the snapshot it matched on.
type Match = (Signal, Arc<MarketSnapshot>);

pub struct TraderExecutor {
    config: Arc<EngineConfig>,
    provider: Arc<dyn MarketDataProvider>,
    universe: Arc<dyn SymbolUniverseProvider>,
    store: Arc<dyn SignalStore>,
    traders: Arc<dyn TraderRepository>,
    queue: Arc<dyn AnalysisQueue>,
    sandbox: Arc<dyn FilterSandbox>,
    deduper: Arc<SignalDeduper>,
    metrics: Arc<EngineMetrics>,
    pool: WorkerPool,
}

impl TraderExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<EngineConfig>,
        provider: Arc<dyn MarketDataProvider>,
        universe: Arc<dyn SymbolUniverseProvider>,
        store: Arc<dyn SignalStore>,
        traders: Arc<dyn TraderRepository>,
        queue: Arc<dyn AnalysisQueue>,
        sandbox: Arc<dyn FilterSandbox>,
        deduper: Arc<SignalDeduper>,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        let pool = WorkerPool::new(config.symbol_workers);
        Self {
            config,
            provider,
            universe,
            store,
            traders,
            queue,
            sandbox,
            deduper,
            metrics,
            pool,
        }
    }

    /// Execute one pass. Invoked by the dispatcher on a matching candle
    /// close; an admin-triggered direct call is honored unconditionally.
    pub async fn run(
        &self,
        trader: &Trader,
        event: &CandleClose,
        cancel: CancellationToken,
    ) -> ExecutionResult {
        let started_at = chrono::Utc::now().timestamp_millis();
        EngineMetrics::incr(&self.metrics.runs_started);

        info!(
            trader_id = %trader.id,
            interval = %event.interval,
            close_time = event.close_time,
            state = %RunState::Pending,
            "run starting"
        );

        // ── Preparing ───────────────────────────────────────────────────
        debug!(trader_id = %trader.id, state = %RunState::Preparing, "run state");
        // Language and program shape are symbol-independent; reject a
        // misconfigured filter before fetching anything. The error count
        // surfaces the broken trader on the admin side, and the dispatcher's
        // streak tracking pauses it.
        if let Err(e) = self.sandbox.validate(&trader.filter) {
            let delta = MetricsDelta {
                executions: 1,
                signals: 0,
                errors: 1,
                last_run_at: started_at,
                duration_ms: 0,
            };
            if let Err(me) = self.traders.update_metrics(&trader.id, &delta).await {
                warn!(trader_id = %trader.id, error = %format!("{me:#}"), "metrics update failed");
            }
            return self.fail(
                trader,
                started_at,
                0,
                Vec::new(),
                Vec::new(),
                (0, 0),
                RunError::Misconfigured(e.to_string()),
            );
        }

        let universe = match self.universe.list().await {
            Ok(u) => u,
            Err(e) => {
                return self.fail(
                    trader,
                    started_at,
                    0,
                    Vec::new(),
                    Vec::new(),
                    (0, 0),
                    RunError::Universe(format!("{e:#}")),
                );
            }
        };
        if universe.is_empty() {
            warn!(trader_id = %trader.id, "symbol universe is empty, nothing to scan");
            let finished = chrono::Utc::now().timestamp_millis();
            return ExecutionResult::empty(&trader.id, started_at, finished);
        }

        let fetcher = Arc::new(DataFetcher::new(
            Arc::clone(&self.provider),
            Duration::from_millis(self.config.data_fetch_timeout_ms),
        ));

        let warm_error = match fetcher.warm_tickers(&universe).await {
            Ok(count) => {
                debug!(trader_id = %trader.id, tickers = count, "ticker warmup complete");
                None
            }
            Err(e) => {
                warn!(trader_id = %trader.id, error = %e, "ticker warmup failed, degrading to per-symbol fetches");
                Some(e)
            }
        };

        // ── Scanning ────────────────────────────────────────────────────
        debug!(trader_id = %trader.id, symbols = universe.len(), state = %RunState::Scanning, "run state");
        let results = {
            let builder = Arc::new(SnapshotBuilder::new(self.config.default_kline_lookback));
            let trader_ref = Arc::new(trader.clone());
            let sandbox = Arc::clone(&self.sandbox);
            let fetcher_ref = Arc::clone(&fetcher);
            let sandbox_timeout = Duration::from_millis(self.config.sandbox_timeout_ms);
            let machine_id = self.config.machine_id.clone();
            let close_time = event.close_time;
            let task_cancel = cancel.clone();

            self.pool
                .process(universe.clone(), &cancel, move |symbol| {
                    let builder = Arc::clone(&builder);
                    let trader = Arc::clone(&trader_ref);
                    let sandbox = Arc::clone(&sandbox);
                    let fetcher = Arc::clone(&fetcher_ref);
                    let machine_id = machine_id.clone();
                    let cancel = task_cancel.clone();

                    async move {
                        if cancel.is_cancelled() {
                            return Err(TaskError::Cancelled);
                        }

                        let snapshot = builder
                            .build(&symbol, &trader, &fetcher, close_time)
                            .await?;
                        let snapshot = Arc::new(snapshot);

                        // CPU-bound evaluation moves off the async runtime;
                        // the sandbox enforces its own wall-clock deadline.
                        let verdict = {
                            let sandbox = Arc::clone(&sandbox);
                            let filter = trader.filter.clone();
                            let snap = Arc::clone(&snapshot);
                            tokio::task::spawn_blocking(move || {
                                sandbox.evaluate(&filter, &snap, sandbox_timeout)
                            })
                            .await
                            .map_err(|e| TaskError::Panicked(e.to_string()))?
                            .map_err(|e| e.into_task_error())?
                        };

                        if !verdict.matched {
                            return Ok(None);
                        }

                        let signal = Signal::candidate(
                            &trader.id,
                            trader.user_id.as_deref(),
                            &snapshot.ticker,
                            trader.filter.interval,
                            close_time,
                            machine_id.as_deref(),
                            verdict.indicator_data,
                        );
                        Ok(Some((signal, snapshot)))
                    }
                    .boxed()
                })
                .await
        };

        // ── Collecting ──────────────────────────────────────────────────
        debug!(trader_id = %trader.id, state = %RunState::Collecting, "run state");
        let total_symbols = universe.len();
        let mut errors: Vec<SymbolError> = Vec::new();
        let mut matches: Vec<Match> = Vec::new();
        let mut ticker_failures = 0usize;

        for result in results {
            EngineMetrics::incr(&self.metrics.symbols_scanned);
            match result.outcome {
                Ok(Some(matched)) => matches.push(matched),
                Ok(None) => {}
                Err(e) => {
                    if matches!(e, TaskError::EvaluationTimeout(_)) {
                        EngineMetrics::incr(&self.metrics.sandbox_timeouts);
                    }
                    if matches!(e, TaskError::TickerUnavailable) {
                        ticker_failures += 1;
                    }
                    errors.push(SymbolError {
                        symbol: result.symbol,
                        error: e.to_string(),
                    });
                }
            }
        }

        let fetch_stats = (fetcher.cache_hits(), fetcher.cache_misses());
        EngineMetrics::add(&self.metrics.fetch_hits, fetch_stats.0);
        EngineMetrics::add(&self.metrics.fetch_misses, fetch_stats.1);

        if cancel.is_cancelled() {
            info!(trader_id = %trader.id, "run cancelled, discarding partial results");
            let finished = chrono::Utc::now().timestamp_millis();
            return ExecutionResult {
                trader_id: trader.id.clone(),
                state: RunState::Cancelled,
                started_at,
                finished_at: finished,
                total_symbols,
                match_count: 0,
                signals: Vec::new(),
                cache_hits: fetch_stats.0,
                cache_misses: fetch_stats.1,
                errors,
                error: Some(RunError::Cancelled.to_string()),
                failure_kind: Some(RunError::Cancelled.streak_key().to_string()),
            };
        }

        // Every ticker path failing after a failed warmup is fatal.
        if let Some(warm_err) = warm_error {
            if ticker_failures == total_symbols {
                return self.fail(
                    trader,
                    started_at,
                    total_symbols,
                    Vec::new(),
                    errors,
                    fetch_stats,
                    RunError::Tickers(warm_err),
                );
            }
        }

        // ── Persisting ──────────────────────────────────────────────────
        debug!(trader_id = %trader.id, state = %RunState::Persisting, "run state");
        let match_count = matches.len();
        let mut new_matches: Vec<Match> = Vec::new();
        let mut repeats: Vec<Signal> = Vec::new();
        let mut emitted: Vec<Signal> = Vec::new();

        for (candidate, snapshot) in matches {
            let admitted = self.deduper.admit(candidate);
            emitted.push(admitted.signal.clone());
            if admitted.is_new {
                new_matches.push((admitted.signal, snapshot));
            } else {
                repeats.push(admitted.signal);
            }
        }

        if !new_matches.is_empty() {
            let batch: Vec<Signal> = new_matches.iter().map(|(s, _)| s.clone()).collect();
            if let Err(e) = self.create_batch_with_retry(&batch).await {
                return self.fail(
                    trader,
                    started_at,
                    total_symbols,
                    emitted,
                    errors,
                    fetch_stats,
                    RunError::Store(e),
                );
            }
        }

        for repeat in &repeats {
            if let Err(e) = self.increment_with_retry(repeat).await {
                warn!(
                    trader_id = %trader.id,
                    symbol = %repeat.symbol,
                    error = %e,
                    "repeat-count update failed"
                );
            }
        }

        EngineMetrics::add(&self.metrics.matches, match_count as u64);
        EngineMetrics::add(&self.metrics.signals_emitted, new_matches.len() as u64);
        EngineMetrics::add(&self.metrics.signals_deduped, repeats.len() as u64);

        // ── Reporting ───────────────────────────────────────────────────
        debug!(trader_id = %trader.id, state = %RunState::Reporting, "run state");
        let finished_at = chrono::Utc::now().timestamp_millis();

        let delta = MetricsDelta {
            executions: 1,
            signals: match_count as u64,
            errors: errors.len() as u64,
            last_run_at: finished_at,
            duration_ms: finished_at - started_at,
        };
        let metrics_write = tokio::time::timeout(
            Duration::from_millis(self.config.store_timeout_ms),
            self.traders.update_metrics(&trader.id, &delta),
        )
        .await;
        match metrics_write {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(trader_id = %trader.id, error = %e, "trader metrics update failed"),
            Err(_) => warn!(trader_id = %trader.id, "trader metrics update timed out"),
        }

        for (signal, snapshot) in &new_matches {
            let request = AnalysisRequest {
                signal: signal.clone(),
                trader: trader.clone(),
                snapshot: Arc::clone(snapshot),
            };
            if !self.queue.offer(request) {
                EngineMetrics::incr(&self.metrics.queue_overflows);
                warn!(
                    trader_id = %trader.id,
                    symbol = %signal.symbol,
                    "analysis queue full, dropping request"
                );
            }
        }

        info!(
            trader_id = %trader.id,
            symbols = total_symbols,
            matches = match_count,
            new_signals = new_matches.len(),
            deduped = repeats.len(),
            errors = errors.len(),
            cache_hits = fetch_stats.0,
            cache_misses = fetch_stats.1,
            duration_ms = finished_at - started_at,
            "run complete"
        );

        ExecutionResult {
            trader_id: trader.id.clone(),
            state: RunState::Done,
            started_at,
            finished_at,
            total_symbols,
            match_count,
            signals: emitted,
            cache_hits: fetch_stats.0,
            cache_misses: fetch_stats.1,
            errors,
            error: None,
            failure_kind: None,
        }
    }

    /// One store batch write with a single short-backoff retry.
    async fn create_batch_with_retry(&self, batch: &[Signal]) -> Result<(), String> {
        let timeout = Duration::from_millis(self.config.store_timeout_ms);

        for attempt in 0..2 {
            match tokio::time::timeout(timeout, self.store.create_batch(batch)).await {
                Ok(Ok(_ids)) => return Ok(()),
                Ok(Err(e)) if attempt == 0 => {
                    warn!(error = %format!("{e:#}"), "signal batch write failed, retrying once");
                }
                Err(_) if attempt == 0 => {
                    warn!("signal batch write timed out, retrying once");
                }
                Ok(Err(e)) => return Err(format!("{e:#}")),
                Err(_) => return Err(format!("timed out after {} ms", timeout.as_millis())),
            }
            tokio::time::sleep(STORE_RETRY_BACKOFF).await;
        }
        unreachable!("retry loop returns on second attempt")
    }

    async fn increment_with_retry(&self, signal: &Signal) -> Result<u32, String> {
        let timeout = Duration::from_millis(self.config.store_timeout_ms);

        for attempt in 0..2 {
            let write = tokio::time::timeout(
                timeout,
                self.store.increment_count(
                    &signal.trader_id,
                    &signal.symbol,
                    signal.interval,
                    signal.triggered_at,
                ),
            )
            .await;
            match write {
                Ok(Ok(count)) => return Ok(count),
                Ok(Err(e)) if attempt == 0 => {
                    debug!(error = %format!("{e:#}"), "count increment failed, retrying once");
                }
                Err(_) if attempt == 0 => {}
                Ok(Err(e)) => return Err(format!("{e:#}")),
                Err(_) => return Err(format!("timed out after {} ms", timeout.as_millis())),
            }
            tokio::time::sleep(STORE_RETRY_BACKOFF).await;
        }
        unreachable!("retry loop returns on second attempt")
    }

    #[allow(clippy::too_many_arguments)]
    fn fail(
        &self,
        trader: &Trader,
        started_at: i64,
        total_symbols: usize,
        signals: Vec<Signal>,
        errors: Vec<SymbolError>,
        fetch_stats: (u64, u64),
        error: RunError,
    ) -> ExecutionResult {
        EngineMetrics::incr(&self.metrics.runs_failed);
        warn!(trader_id = %trader.id, error = %error, "run failed");

        ExecutionResult {
            trader_id: trader.id.clone(),
            state: RunState::Failed,
            started_at,
            finished_at: chrono::Utc::now().timestamp_millis(),
            total_symbols,
            match_count: signals.len(),
            // Gathered in memory but unpersisted; returned for inspection.
            signals,
            cache_hits: fetch_stats.0,
            cache_misses: fetch_stats.1,
            errors,
            error: Some(error.to_string()),
            failure_kind: Some(error.streak_key().to_string()),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::ChannelAnalysisQueue;
    use crate::market::StaticUniverse;
    use crate::sandbox::ExprSandbox;
    use crate::store::{MemorySignalStore, MemoryTraderRepository};
    use crate::trader::{FilterSpec, StrategySpec, TraderMetrics};
    use crate::types::{Candle, Interval, Ticker};
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct TestProvider {
        candles: usize,
    }

    #[async_trait]
    impl MarketDataProvider for TestProvider {
        async fn get_klines(
            &self,
            _symbol: &str,
            interval: Interval,
            limit: usize,
        ) -> anyhow::Result<Vec<Candle>> {
            let step = interval.duration_ms();
            let n = self.candles.min(limit);
            Ok((0..n as i64)
                .map(|i| Candle {
                    open_time: i * step,
                    close_time: (i + 1) * step,
                    open: 100.0 + i as f64,
                    high: 101.0 + i as f64,
                    low: 99.0 + i as f64,
                    close: 100.5 + i as f64,
                    volume: 10.0,
                    quote_volume: 1000.0,
                    trades_count: 5,
                    taker_buy_volume: 6.0,
                    taker_buy_quote_volume: 600.0,
                    is_closed: true,
                })
                .collect())
        }

        async fn get_ticker(&self, symbol: &str) -> anyhow::Result<Ticker> {
            Ok(ticker(symbol))
        }

        async fn get_tickers_batch(
            &self,
            symbols: &[String],
        ) -> anyhow::Result<HashMap<String, Ticker>> {
            Ok(symbols.iter().map(|s| (s.clone(), ticker(s))).collect())
        }
    }

    /// Store whose batch writes always fail.
    struct FailingStore;

    #[async_trait]
    impl SignalStore for FailingStore {
        async fn create_batch(&self, _signals: &[Signal]) -> anyhow::Result<Vec<String>> {
            anyhow::bail!("store down")
        }

        async fn increment_count(
            &self,
            _trader_id: &str,
            _symbol: &str,
            _interval: Interval,
            _triggered_at: i64,
        ) -> anyhow::Result<u32> {
            anyhow::bail!("store down")
        }

        async fn recent_signals(&self, _limit: usize) -> anyhow::Result<Vec<Signal>> {
            Ok(Vec::new())
        }
    }

    fn ticker(symbol: &str) -> Ticker {
        Ticker {
            symbol: symbol.to_string(),
            last_price: 50_000.0,
            price_change_percent: 1.2,
            quote_volume: 9.9e8,
        }
    }

    fn trader(code: &str) -> Trader {
        Trader {
            id: "t-1".into(),
            user_id: Some("u-1".into()),
            name: "test trader".into(),
            enabled: true,
            is_built_in: false,
            filter: FilterSpec {
                language: "expr".into(),
                code: code.into(),
                interval: Interval::M5,
                required_timeframes: vec![Interval::M5],
                indicators: Vec::new(),
                lookback: None,
                min_history: None,
            },
            strategy: StrategySpec::default(),
            metrics: TraderMetrics::default(),
        }
    }

    fn event() -> CandleClose {
        CandleClose {
            interval: Interval::M5,
            close_time: 1_700_000_100_000,
            kline: None,
        }
    }

    struct Harness {
        executor: TraderExecutor,
        store: Arc<MemorySignalStore>,
        repo: Arc<MemoryTraderRepository>,
        metrics: Arc<EngineMetrics>,
        queue_rx: tokio::sync::mpsc::Receiver<AnalysisRequest>,
    }

    fn harness(universe: Vec<String>, candles: usize, queue_capacity: usize) -> Harness {
        let mut config = EngineConfig::default();
        config.symbol_workers = 4;
        config.sandbox_timeout_ms = 100;
        config.store_timeout_ms = 1000;
        let config = Arc::new(config);

        let store = Arc::new(MemorySignalStore::new());
        let repo = Arc::new(MemoryTraderRepository::new());
        let metrics = Arc::new(EngineMetrics::new());
        let (queue, queue_rx) = ChannelAnalysisQueue::new(queue_capacity);

        let executor = TraderExecutor::new(
            config,
            Arc::new(TestProvider { candles }),
            Arc::new(StaticUniverse::new(universe)),
            store.clone(),
            repo.clone(),
            Arc::new(queue),
            Arc::new(ExprSandbox::new()),
            Arc::new(SignalDeduper::new(2.0)),
            metrics.clone(),
        );

        Harness {
            executor,
            store,
            repo,
            metrics,
            queue_rx,
        }
    }

    #[tokio::test]
    async fn single_match_single_symbol() {
        let mut h = harness(vec!["BTCUSDT".into()], 60, 8);
        let t = trader("return last_close(klines[\"5m\"]) > 0");
        h.repo.insert(t.clone());

        let result = h.executor.run(&t, &event(), CancellationToken::new()).await;

        assert_eq!(result.state, RunState::Done);
        assert_eq!(result.match_count, 1);
        assert_eq!(result.signals.len(), 1);

        let s = &result.signals[0];
        assert_eq!(s.trader_id, "t-1");
        assert_eq!(s.symbol, "BTCUSDT");
        assert_eq!(s.interval, Interval::M5);
        assert_eq!(s.triggered_at, 1_700_000_100_000);
        assert!((s.price_at_signal - 50_000.0).abs() < f64::EPSILON);
        assert!((s.change_pct_at_signal - 1.2).abs() < f64::EPSILON);
        assert!((s.volume_at_signal - 9.9e8).abs() < f64::EPSILON);
        assert_eq!(s.count, 1);
        assert_eq!(s.user_id.as_deref(), Some("u-1"));

        assert_eq!(h.store.len(), 1);
        let offered = h.queue_rx.recv().await.unwrap();
        assert_eq!(offered.signal.symbol, "BTCUSDT");

        let updated = h.repo.get("t-1").await.unwrap().unwrap();
        assert_eq!(updated.metrics.executions, 1);
        assert_eq!(updated.metrics.signals, 1);
    }

    #[tokio::test]
    async fn repeat_event_increments_not_duplicates() {
        let h = harness(vec!["BTCUSDT".into()], 60, 8);
        let t = trader("return last_close(klines[\"5m\"]) > 0");
        h.repo.insert(t.clone());

        let first = h.executor.run(&t, &event(), CancellationToken::new()).await;
        let second = h.executor.run(&t, &event(), CancellationToken::new()).await;

        assert_eq!(first.signals[0].count, 1);
        assert_eq!(second.signals[0].count, 2);
        assert_eq!(second.signals[0].id, first.signals[0].id);
        assert_eq!(h.store.len(), 1);

        let rows = h.store.recent_signals(10).await.unwrap();
        assert_eq!(rows[0].count, 2);

        let snap = h.metrics.snapshot();
        assert_eq!(snap.signals_emitted, 1);
        assert_eq!(snap.signals_deduped, 1);
    }

    #[tokio::test]
    async fn insufficient_history_is_a_skip_not_a_failure() {
        let h = harness(vec!["BTCUSDT".into()], 100, 8);
        let mut t = trader("return last_close(klines[\"5m\"]) > 0");
        t.filter.min_history = Some(250);
        h.repo.insert(t.clone());

        let result = h.executor.run(&t, &event(), CancellationToken::new()).await;

        assert_eq!(result.state, RunState::Done);
        assert_eq!(result.match_count, 0);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].error.contains("insufficient history"));
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn sandbox_timeouts_run_in_parallel() {
        let universe: Vec<String> = (0..10).map(|i| format!("SYM{i}USDT")).collect();
        let h = harness(universe, 60, 8);
        let t = trader("while true { } true");
        h.repo.insert(t.clone());

        let start = std::time::Instant::now();
        let result = h.executor.run(&t, &event(), CancellationToken::new()).await;
        let elapsed = start.elapsed();

        assert_eq!(result.state, RunState::Done);
        assert_eq!(result.match_count, 0);
        assert_eq!(result.errors.len(), 10);
        assert!(result.errors.iter().all(|e| e.error.contains("timed out")));
        assert_eq!(h.metrics.snapshot().sandbox_timeouts, 10);

        // 10 tasks of 100ms on 4 workers: ~3 rounds, far below 10x serial.
        assert!(
            elapsed < Duration::from_millis(700),
            "timeouts look serialized: {elapsed:?}"
        );
    }

    #[tokio::test]
    async fn queue_overflow_does_not_fail_the_run() {
        let universe = vec!["AAAUSDT".into(), "BBBUSDT".into(), "CCCUSDT".into()];
        let h = harness(universe, 60, 1);
        let t = trader("return last_close(klines[\"5m\"]) > 0");
        h.repo.insert(t.clone());

        let result = h.executor.run(&t, &event(), CancellationToken::new()).await;

        assert_eq!(result.state, RunState::Done);
        assert_eq!(result.match_count, 3);
        assert_eq!(h.store.len(), 3);
        assert_eq!(h.metrics.snapshot().queue_overflows, 2);
    }

    #[tokio::test]
    async fn store_failure_fails_run_but_returns_signals() {
        let mut config = EngineConfig::default();
        config.symbol_workers = 2;
        config.store_timeout_ms = 500;
        let config = Arc::new(config);

        let repo = Arc::new(MemoryTraderRepository::new());
        let metrics = Arc::new(EngineMetrics::new());
        let (queue, _rx) = ChannelAnalysisQueue::new(8);

        let executor = TraderExecutor::new(
            config,
            Arc::new(TestProvider { candles: 60 }),
            Arc::new(StaticUniverse::new(vec!["BTCUSDT".into()])),
            Arc::new(FailingStore),
            repo.clone(),
            Arc::new(queue),
            Arc::new(ExprSandbox::new()),
            Arc::new(SignalDeduper::new(2.0)),
            metrics.clone(),
        );

        let t = trader("return last_close(klines[\"5m\"]) > 0");
        let result = executor.run(&t, &event(), CancellationToken::new()).await;

        assert_eq!(result.state, RunState::Failed);
        assert!(result.error.as_deref().unwrap().contains("batch write"));
        // In-memory results still returned for inspection.
        assert_eq!(result.signals.len(), 1);
        assert_eq!(metrics.snapshot().runs_failed, 1);
    }

    #[tokio::test]
    async fn misconfigured_filter_fails_fast_and_counts_error() {
        let h = harness(vec!["BTCUSDT".into()], 60, 8);
        let mut t = trader("return true");
        t.filter.language = "python".into();
        h.repo.insert(t.clone());

        let result = h.executor.run(&t, &event(), CancellationToken::new()).await;

        assert_eq!(result.state, RunState::Failed);
        assert_eq!(result.failure_kind.as_deref(), Some("misconfiguration"));
        assert!(result
            .error
            .as_deref()
            .unwrap()
            .contains("unsupported filter language"));
        assert!(h.store.is_empty());

        let updated = h.repo.get("t-1").await.unwrap().unwrap();
        assert_eq!(updated.metrics.error_count, 1);
        assert_eq!(updated.metrics.executions, 1);
    }

    #[tokio::test]
    async fn cancelled_run_reports_cancelled() {
        let h = harness(vec!["BTCUSDT".into()], 60, 8);
        let t = trader("return last_close(klines[\"5m\"]) > 0");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = h.executor.run(&t, &event(), cancel).await;

        assert_eq!(result.state, RunState::Cancelled);
        assert!(result.signals.is_empty());
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn single_flight_property_across_universe() {
        // cacheMisses <= |universe| x |requiredTimeframes| (+1 ticker batch
        // covered separately); with a warm batch there are no ticker misses.
        let universe: Vec<String> = (0..6).map(|i| format!("SYM{i}USDT")).collect();
        let h = harness(universe.clone(), 60, 8);
        let mut t = trader("return last_close(klines[\"5m\"]) > 0 && last_close(klines[\"1h\"]) > 0");
        t.filter.required_timeframes = vec![Interval::M5, Interval::H1];
        h.repo.insert(t.clone());

        let result = h.executor.run(&t, &event(), CancellationToken::new()).await;

        assert_eq!(result.state, RunState::Done);
        assert!(result.cache_misses <= (universe.len() * 2) as u64);
        assert_eq!(result.match_count, universe.len());
    }
}
