// =============================================================================
// Signal — the emission record produced when a trader's filter matches
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::types::{Interval, Ticker};

/// Source tag stamped onto every signal emitted by this engine.
pub const SIGNAL_SOURCE: &str = "cloud";

/// Emission record for one (trader, symbol) match on a candle close.
///
/// `(trader_id, symbol, interval, triggered_at)` is the dedup key: at most
/// one row exists in the store per key; repeat matches within the dedup
/// window advance `count` without creating a new row. Price, change and
/// volume keep the first observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    /// Engine-generated UUIDv4.
    pub id: String,
    pub trader_id: String,
    /// None for built-in traders.
    #[serde(default)]
    pub user_id: Option<String>,
    pub symbol: String,
    pub interval: Interval,
    /// Candle close time that triggered the match (epoch ms, interval
    /// aligned).
    pub triggered_at: i64,
    pub price_at_signal: f64,
    pub change_pct_at_signal: f64,
    pub volume_at_signal: f64,
    /// Dedup counter, >= 1.
    pub count: u32,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_id: Option<String>,
    /// Opaque per-indicator telemetry for visualisation; best-effort.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indicator_data: Option<serde_json::Map<String, serde_json::Value>>,
    /// Wall-clock creation time (epoch ms).
    pub created_at: i64,
}

impl Signal {
    /// Build a fresh candidate from a match. The deduper decides whether this
    /// identity survives or collapses into an earlier emission.
    #[allow(clippy::too_many_arguments)]
    pub fn candidate(
        trader_id: &str,
        user_id: Option<&str>,
        ticker: &Ticker,
        interval: Interval,
        triggered_at: i64,
        machine_id: Option<&str>,
        indicator_data: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            trader_id: trader_id.to_string(),
            user_id: user_id.map(str::to_string),
            symbol: ticker.symbol.clone(),
            interval,
            triggered_at,
            price_at_signal: ticker.last_price,
            change_pct_at_signal: ticker.price_change_percent,
            volume_at_signal: ticker.quote_volume,
            count: 1,
            source: SIGNAL_SOURCE.to_string(),
            machine_id: machine_id.map(str::to_string),
            indicator_data,
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// The store-level dedup key for this signal.
    pub fn dedup_key(&self) -> (String, String, Interval, i64) {
        (
            self.trader_id.clone(),
            self.symbol.clone(),
            self.interval,
            self.triggered_at,
        )
    }
}

// =============================================================================
// Run results
// =============================================================================

/// Lifecycle of one executor run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Pending,
    Preparing,
    Scanning,
    Collecting,
    Persisting,
    Reporting,
    Done,
    Failed,
    Cancelled,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunState::Pending => "Pending",
            RunState::Preparing => "Preparing",
            RunState::Scanning => "Scanning",
            RunState::Collecting => "Collecting",
            RunState::Persisting => "Persisting",
            RunState::Reporting => "Reporting",
            RunState::Done => "Done",
            RunState::Failed => "Failed",
            RunState::Cancelled => "Cancelled",
        };
        f.write_str(s)
    }
}

/// A per-symbol error recorded during a run. Never fails the pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolError {
    pub symbol: String,
    pub error: String,
}

/// Transient summary of one executor run, returned to the caller and logged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub trader_id: String,
    pub state: RunState,
    pub started_at: i64,
    pub finished_at: i64,
    pub total_symbols: usize,
    pub match_count: usize,
    pub signals: Vec<Signal>,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub errors: Vec<SymbolError>,
    /// Fatal error description when `state == Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Stable failure discriminant for the dispatcher's streak tracking.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<String>,
}

impl ExecutionResult {
    /// An empty result for a run that had nothing to do.
    pub fn empty(trader_id: &str, started_at: i64, finished_at: i64) -> Self {
        Self {
            trader_id: trader_id.to_string(),
            state: RunState::Done,
            started_at,
            finished_at,
            total_symbols: 0,
            match_count: 0,
            signals: Vec::new(),
            cache_hits: 0,
            cache_misses: 0,
            errors: Vec::new(),
            error: None,
            failure_kind: None,
        }
    }
}
