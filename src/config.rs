// =============================================================================
// Engine Configuration — JSON-backed settings with atomic save
// =============================================================================
//
// Every tunable for the screener engine lives here. All fields carry
// `#[serde(default)]` helpers so that adding new fields never breaks loading
// an older config file. Persistence uses a tmp + rename pattern to prevent
// corruption on crash.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn cpu_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_max_trader_concurrency() -> usize {
    cpu_count() * 2
}

fn default_symbol_workers() -> usize {
    cpu_count()
}

fn default_sandbox_timeout_ms() -> u64 {
    1000
}

fn default_data_fetch_timeout_ms() -> u64 {
    5000
}

fn default_store_timeout_ms() -> u64 {
    10_000
}

fn default_dedup_window_multiplier() -> f64 {
    2.0
}

fn default_analysis_queue_capacity() -> usize {
    1024
}

fn default_kline_lookback() -> usize {
    250
}

fn default_auto_pause_threshold() -> u32 {
    3
}

fn default_symbols() -> Vec<String> {
    vec![
        "BTCUSDT".to_string(),
        "ETHUSDT".to_string(),
        "BNBUSDT".to_string(),
        "XRPUSDT".to_string(),
        "SOLUSDT".to_string(),
    ]
}

fn default_quote_asset() -> String {
    "USDT".to_string()
}

fn default_reference_symbol() -> String {
    "BTCUSDT".to_string()
}

fn default_traders_file() -> String {
    "traders.json".to_string()
}

fn default_bind_addr() -> String {
    "0.0.0.0:3002".to_string()
}

// =============================================================================
// EngineConfig
// =============================================================================

/// Top-level configuration for the screener engine and its surrounding binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    // --- Engine core ---------------------------------------------------------

    /// Maximum number of trader runs in flight at once (global semaphore).
    #[serde(default = "default_max_trader_concurrency")]
    pub max_trader_concurrency: usize,

    /// Worker parallelism for the per-symbol scan inside one run.
    #[serde(default = "default_symbol_workers")]
    pub symbol_workers: usize,

    /// Wall-clock deadline for one filter evaluation.
    #[serde(default = "default_sandbox_timeout_ms")]
    pub sandbox_timeout_ms: u64,

    /// Per-call deadline for market data fetches.
    #[serde(default = "default_data_fetch_timeout_ms")]
    pub data_fetch_timeout_ms: u64,

    /// Per-call deadline for signal store writes.
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,

    /// Dedup window as a multiple of the trader's primary interval.
    #[serde(default = "default_dedup_window_multiplier")]
    pub dedup_window_multiplier: f64,

    /// Bounded capacity of the downstream analysis queue.
    #[serde(default = "default_analysis_queue_capacity")]
    pub analysis_queue_capacity: usize,

    /// Kline history requested per (symbol, interval) unless the trader
    /// declares a larger lookback.
    #[serde(default = "default_kline_lookback")]
    pub default_kline_lookback: usize,

    /// Consecutive identical run failures before a trader is auto-paused.
    #[serde(default = "default_auto_pause_threshold")]
    pub auto_pause_threshold: u32,

    // --- Universe ------------------------------------------------------------

    /// Static symbol universe used when `use_exchange_universe` is false.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    /// When true, the universe is loaded from Binance exchangeInfo and
    /// filtered to TRADING symbols quoted in `quote_asset`.
    #[serde(default)]
    pub use_exchange_universe: bool,

    /// Quote asset filter for the exchange-backed universe.
    #[serde(default = "default_quote_asset")]
    pub quote_asset: String,

    // --- Feed / binary -------------------------------------------------------

    /// Symbol whose kline streams drive the candle-close clock.
    #[serde(default = "default_reference_symbol")]
    pub reference_symbol: String,

    /// JSON file the trader repository is seeded from at startup.
    #[serde(default = "default_traders_file")]
    pub traders_file: String,

    /// Bind address of the read-only status API.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Identifier stamped onto emitted signals, when set.
    #[serde(default)]
    pub machine_id: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_trader_concurrency: default_max_trader_concurrency(),
            symbol_workers: default_symbol_workers(),
            sandbox_timeout_ms: default_sandbox_timeout_ms(),
            data_fetch_timeout_ms: default_data_fetch_timeout_ms(),
            store_timeout_ms: default_store_timeout_ms(),
            dedup_window_multiplier: default_dedup_window_multiplier(),
            analysis_queue_capacity: default_analysis_queue_capacity(),
            default_kline_lookback: default_kline_lookback(),
            auto_pause_threshold: default_auto_pause_threshold(),
            symbols: default_symbols(),
            use_exchange_universe: false,
            quote_asset: default_quote_asset(),
            reference_symbol: default_reference_symbol(),
            traders_file: default_traders_file(),
            bind_addr: default_bind_addr(),
            machine_id: None,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// Returns an error when the file is missing or malformed so the caller
    /// can fall back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read engine config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse engine config from {}", path.display()))?;

        info!(
            path = %path.display(),
            symbol_workers = config.symbol_workers,
            max_trader_concurrency = config.max_trader_concurrency,
            "engine config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content =
            serde_json::to_string_pretty(self).context("failed to serialise engine config")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "engine config saved (atomic)");
        Ok(())
    }
}
