// =============================================================================
// Aurora Signal Nexus — Main Entry Point
// =============================================================================
//
// Real-time market screener: user-authored traders are evaluated against the
// whole symbol universe on every candle close, and matches become signals
// handed to the downstream analysis pipeline.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod analysis;
mod api;
mod config;
mod engine;
mod error;
mod feed;
mod indicators;
mod market;
mod metrics;
mod sandbox;
mod signal;
mod store;
mod trader;
mod types;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::analysis::ChannelAnalysisQueue;
use crate::api::ApiState;
use crate::config::EngineConfig;
use crate::engine::{EventDispatcher, SignalDeduper, TraderExecutor};
use crate::feed::{ChannelEventBus, EventBus};
use crate::market::{
    BinanceMarketData, BinanceUniverse, StaticUniverse, SymbolUniverseProvider,
};
use crate::metrics::EngineMetrics;
use crate::sandbox::ExprSandbox;
use crate::store::{MemorySignalStore, MemoryTraderRepository};
use crate::trader::{FilterSpec, StrategySpec, Trader, TraderMetrics};
use crate::types::Interval;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Aurora Signal Nexus — Starting Up                ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let mut config = EngineConfig::load("screener_config.json").unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        EngineConfig::default()
    });

    // Override symbols from env if available.
    if let Ok(syms) = std::env::var("AURORA_SYMBOLS") {
        config.symbols = syms
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
    }
    if let Ok(addr) = std::env::var("AURORA_BIND_ADDR") {
        config.bind_addr = addr;
    }
    if let Ok(machine) = std::env::var("AURORA_MACHINE_ID") {
        config.machine_id = Some(machine);
    }

    info!(
        symbol_workers = config.symbol_workers,
        max_trader_concurrency = config.max_trader_concurrency,
        use_exchange_universe = config.use_exchange_universe,
        reference_symbol = %config.reference_symbol,
        "engine configured"
    );

    let config = Arc::new(config);
    let cancel = CancellationToken::new();

    // ── 2. Collaborators ─────────────────────────────────────────────────
    let provider = Arc::new(BinanceMarketData::new(Duration::from_millis(
        config.data_fetch_timeout_ms,
    )));

    let universe: Arc<dyn SymbolUniverseProvider> = if config.use_exchange_universe {
        Arc::new(BinanceUniverse::new(
            config.quote_asset.clone(),
            Duration::from_millis(config.data_fetch_timeout_ms),
        ))
    } else {
        Arc::new(StaticUniverse::new(config.symbols.clone()))
    };

    let store = Arc::new(MemorySignalStore::new());
    let traders = Arc::new(load_traders(&config.traders_file));
    info!(count = traders.len(), "trader repository ready");

    let (queue, queue_rx) = ChannelAnalysisQueue::new(config.analysis_queue_capacity);
    let analysis_handle = analysis::spawn_consumer(queue_rx, cancel.clone());

    let metrics = Arc::new(EngineMetrics::new());

    // ── 3. Engine core ───────────────────────────────────────────────────
    let executor = Arc::new(TraderExecutor::new(
        config.clone(),
        provider.clone(),
        universe,
        store.clone(),
        traders.clone(),
        Arc::new(queue),
        Arc::new(ExprSandbox::new()),
        Arc::new(SignalDeduper::new(config.dedup_window_multiplier)),
        metrics.clone(),
    ));

    let (notice_tx, mut notice_rx) = tokio::sync::mpsc::unbounded_channel();
    let dispatcher = EventDispatcher::new(
        executor,
        traders.clone(),
        metrics.clone(),
        config.max_trader_concurrency,
        config.auto_pause_threshold,
        Some(notice_tx),
        cancel.clone(),
    );

    // Notices go to the log here; a production deployment forwards them to
    // the notifier service.
    tokio::spawn(async move {
        while let Some(notice) = notice_rx.recv().await {
            match notice {
                engine::dispatcher::EngineNotice::AutoPaused { trader_id, reason } => {
                    warn!(trader_id = %trader_id, reason = %reason, "trader auto-paused");
                }
            }
        }
    });

    // ── 4. Candle-close feed ─────────────────────────────────────────────
    let bus = Arc::new(ChannelEventBus::new());

    let dispatcher_events = bus.subscribe();
    let dispatcher_handle = tokio::spawn(Arc::clone(&dispatcher).run(dispatcher_events));

    {
        let bus: Arc<dyn EventBus> = bus.clone();
        let symbol = config.reference_symbol.clone();
        let feed_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                if feed_cancel.is_cancelled() {
                    break;
                }
                if let Err(e) =
                    feed::run_kline_feed(&symbol, bus.clone(), feed_cancel.clone()).await
                {
                    error!(symbol = %symbol, error = %format!("{e:#}"), "kline feed error — reconnecting in 5s");
                }
                tokio::select! {
                    _ = feed_cancel.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_secs(5)) => {}
                }
            }
        });
    }

    // ── 5. Status API ────────────────────────────────────────────────────
    let api_state = Arc::new(ApiState {
        config: config.clone(),
        metrics: metrics.clone(),
        store: store.clone(),
        traders: traders.clone(),
        started_at: std::time::Instant::now(),
    });
    let bind_addr = config.bind_addr.clone();

    tokio::spawn(async move {
        let app = api::router(api_state);
        let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!(addr = %bind_addr, error = %e, "failed to bind status API");
                return;
            }
        };
        info!(addr = %bind_addr, "status API listening");
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "status API failed");
        }
    });

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 6. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received — stopping gracefully");

    cancel.cancel();
    let _ = dispatcher_handle.await;
    let _ = analysis_handle.await;

    info!("Aurora Signal Nexus shut down complete.");
    Ok(())
}

/// Seed the trader repository from the configured JSON file, falling back to
/// the built-in starter traders when the file is missing.
fn load_traders(path: &str) -> MemoryTraderRepository {
    match MemoryTraderRepository::load_from_file(path) {
        Ok(repo) => repo,
        Err(e) => {
            warn!(path = %path, error = %e, "traders file not loaded, seeding built-ins");
            let repo = MemoryTraderRepository::new();
            for trader in builtin_traders() {
                repo.insert(trader);
            }
            repo
        }
    }
}

/// Built-in starter traders, owned by the system (`user_id = None`).
fn builtin_traders() -> Vec<Trader> {
    vec![
        Trader {
            id: "builtin-rsi-oversold-5m".into(),
            user_id: None,
            name: "RSI oversold bounce (5m)".into(),
            enabled: true,
            is_built_in: true,
            filter: FilterSpec {
                language: "expr".into(),
                code: "rsi(klines[\"5m\"], 14) < 30 && ticker.quote_volume > 1e7".into(),
                interval: Interval::M5,
                required_timeframes: vec![Interval::M5],
                indicators: vec![indicators::IndicatorKind::Rsi],
                lookback: None,
                min_history: Some(30),
            },
            strategy: StrategySpec {
                instructions: "Assess whether the oversold reading is a bounce setup or a falling knife.".into(),
                model_tier: "standard".into(),
                extra: serde_json::Map::new(),
            },
            metrics: TraderMetrics::default(),
        },
        Trader {
            id: "builtin-ema-cross-1h".into(),
            user_id: None,
            name: "EMA 9/21 bullish cross (1h)".into(),
            enabled: true,
            is_built_in: true,
            filter: FilterSpec {
                language: "expr".into(),
                code: "crossed_above(ema_series(klines[\"1h\"], 9), ema_series(klines[\"1h\"], 21))"
                    .into(),
                interval: Interval::H1,
                required_timeframes: vec![Interval::H1],
                indicators: vec![
                    indicators::IndicatorKind::Ema,
                    indicators::IndicatorKind::Macd,
                ],
                lookback: None,
                min_history: Some(60),
            },
            strategy: StrategySpec {
                instructions: "Judge trend continuation odds after the crossover.".into(),
                model_tier: "standard".into(),
                extra: serde_json::Map::new(),
            },
            metrics: TraderMetrics::default(),
        },
    ]
}
