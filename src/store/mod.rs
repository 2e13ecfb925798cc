// =============================================================================
// Persistence Collaborators
// =============================================================================
//
// All durable state lives behind these interfaces; the engine itself owns
// nothing persistent. The in-memory implementations back the binary's
// default deployment and the test suite; durable backends plug in here.

pub mod memory;

use async_trait::async_trait;

use crate::signal::Signal;
use crate::trader::{MetricsDelta, Trader};
use crate::types::Interval;

pub use memory::{MemorySignalStore, MemoryTraderRepository};

/// Signal persistence. `increment_count` is an atomic increment at the store.
#[async_trait]
pub trait SignalStore: Send + Sync {
    /// Persist a batch of new signals; returns their ids.
    async fn create_batch(&self, signals: &[Signal]) -> anyhow::Result<Vec<String>>;

    /// Bump the count of an existing row by dedup key; returns the new count.
    async fn increment_count(
        &self,
        trader_id: &str,
        symbol: &str,
        interval: Interval,
        triggered_at: i64,
    ) -> anyhow::Result<u32>;

    /// Most recent signals, newest first. Read path for the status API.
    async fn recent_signals(&self, limit: usize) -> anyhow::Result<Vec<Signal>>;
}

/// Trader definitions and engine-owned metrics.
#[async_trait]
pub trait TraderRepository: Send + Sync {
    async fn list_enabled_by_interval(&self, interval: Interval) -> anyhow::Result<Vec<Trader>>;

    async fn get(&self, trader_id: &str) -> anyhow::Result<Option<Trader>>;

    /// Fold one run's delta into the trader's metrics block. The engine is
    /// the only writer.
    async fn update_metrics(&self, trader_id: &str, delta: &MetricsDelta) -> anyhow::Result<()>;

    /// Enable/disable a trader (auto-pause path).
    async fn set_enabled(&self, trader_id: &str, enabled: bool) -> anyhow::Result<()>;

    async fn list_all(&self) -> anyhow::Result<Vec<Trader>>;
}
