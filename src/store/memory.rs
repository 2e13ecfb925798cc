// =============================================================================
// In-memory store — default SignalStore / TraderRepository backing
// =============================================================================
//
// parking_lot-guarded maps, bounded signal retention, traders seeded from a
// JSON file at startup. Durable backends live behind the same traits.
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::info;

use crate::signal::Signal;
use crate::store::{SignalStore, TraderRepository};
use crate::trader::{MetricsDelta, Trader};
use crate::types::Interval;

/// Maximum signals retained in memory; oldest are evicted first.
const MAX_SIGNALS: usize = 5000;

type DedupKey = (String, String, Interval, i64);

// =============================================================================
// MemorySignalStore
// =============================================================================

#[derive(Default)]
struct SignalState {
    by_id: HashMap<String, Signal>,
    by_key: HashMap<DedupKey, String>,
    order: VecDeque<String>,
}

pub struct MemorySignalStore {
    state: RwLock<SignalState>,
}

impl MemorySignalStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(SignalState::default()),
        }
    }

    /// Total signals currently retained.
    pub fn len(&self) -> usize {
        self.state.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemorySignalStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SignalStore for MemorySignalStore {
    async fn create_batch(&self, signals: &[Signal]) -> Result<Vec<String>> {
        let mut state = self.state.write();
        let mut ids = Vec::with_capacity(signals.len());

        for signal in signals {
            let key = signal.dedup_key();
            // Upsert semantics on the dedup key keep the row count correct
            // even if dedup state was lost across a restart.
            if let Some(existing_id) = state.by_key.get(&key).cloned() {
                if let Some(existing) = state.by_id.get_mut(&existing_id) {
                    existing.count = existing.count.max(signal.count);
                    ids.push(existing_id);
                    continue;
                }
            }

            state.by_key.insert(key, signal.id.clone());
            state.by_id.insert(signal.id.clone(), signal.clone());
            state.order.push_back(signal.id.clone());
            ids.push(signal.id.clone());

            while state.order.len() > MAX_SIGNALS {
                if let Some(old_id) = state.order.pop_front() {
                    if let Some(old) = state.by_id.remove(&old_id) {
                        state.by_key.remove(&old.dedup_key());
                    }
                }
            }
        }

        Ok(ids)
    }

    async fn increment_count(
        &self,
        trader_id: &str,
        symbol: &str,
        interval: Interval,
        triggered_at: i64,
    ) -> Result<u32> {
        let key = (
            trader_id.to_string(),
            symbol.to_string(),
            interval,
            triggered_at,
        );
        let mut state = self.state.write();
        let id = state
            .by_key
            .get(&key)
            .cloned()
            .with_context(|| format!("no signal row for key {trader_id}/{symbol}/{interval}/{triggered_at}"))?;
        let signal = state
            .by_id
            .get_mut(&id)
            .context("signal index out of sync")?;
        signal.count += 1;
        Ok(signal.count)
    }

    async fn recent_signals(&self, limit: usize) -> Result<Vec<Signal>> {
        let state = self.state.read();
        let out = state
            .order
            .iter()
            .rev()
            .take(limit)
            .filter_map(|id| state.by_id.get(id).cloned())
            .collect();
        Ok(out)
    }
}

// =============================================================================
// MemoryTraderRepository
// =============================================================================

pub struct MemoryTraderRepository {
    traders: RwLock<HashMap<String, Trader>>,
}

impl MemoryTraderRepository {
    pub fn new() -> Self {
        Self {
            traders: RwLock::new(HashMap::new()),
        }
    }

    /// Seed from a JSON array of trader definitions.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read traders from {}", path.display()))?;
        let traders: Vec<Trader> = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse traders from {}", path.display()))?;

        info!(path = %path.display(), count = traders.len(), "traders loaded");

        let repo = Self::new();
        {
            let mut map = repo.traders.write();
            for trader in traders {
                map.insert(trader.id.clone(), trader);
            }
        }
        Ok(repo)
    }

    pub fn insert(&self, trader: Trader) {
        self.traders.write().insert(trader.id.clone(), trader);
    }

    pub fn len(&self) -> usize {
        self.traders.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryTraderRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TraderRepository for MemoryTraderRepository {
    async fn list_enabled_by_interval(&self, interval: Interval) -> Result<Vec<Trader>> {
        let traders = self.traders.read();
        let mut out: Vec<Trader> = traders
            .values()
            .filter(|t| t.enabled && t.filter.interval == interval)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    async fn get(&self, trader_id: &str) -> Result<Option<Trader>> {
        Ok(self.traders.read().get(trader_id).cloned())
    }

    async fn update_metrics(&self, trader_id: &str, delta: &MetricsDelta) -> Result<()> {
        let mut traders = self.traders.write();
        let trader = traders
            .get_mut(trader_id)
            .with_context(|| format!("unknown trader {trader_id}"))?;
        trader.metrics.apply(delta);
        Ok(())
    }

    async fn set_enabled(&self, trader_id: &str, enabled: bool) -> Result<()> {
        let mut traders = self.traders.write();
        let trader = traders
            .get_mut(trader_id)
            .with_context(|| format!("unknown trader {trader_id}"))?;
        trader.enabled = enabled;
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<Trader>> {
        let mut out: Vec<Trader> = self.traders.read().values().cloned().collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::trader::{FilterSpec, StrategySpec, TraderMetrics};
    use crate::types::Ticker;

    fn ticker(symbol: &str) -> Ticker {
        Ticker {
            symbol: symbol.into(),
            last_price: 50_000.0,
            price_change_percent: 1.2,
            quote_volume: 9.9e8,
        }
    }

    fn signal(trader: &str, symbol: &str, triggered_at: i64) -> Signal {
        Signal::candidate(
            trader,
            None,
            &ticker(symbol),
            Interval::M5,
            triggered_at,
            None,
            None,
        )
    }

    fn trader(id: &str, interval: Interval, enabled: bool) -> Trader {
        Trader {
            id: id.into(),
            user_id: None,
            name: id.into(),
            enabled,
            is_built_in: false,
            filter: FilterSpec {
                language: "expr".into(),
                code: "true".into(),
                interval,
                required_timeframes: Vec::new(),
                indicators: Vec::new(),
                lookback: None,
                min_history: None,
            },
            strategy: StrategySpec::default(),
            metrics: TraderMetrics::default(),
        }
    }

    #[tokio::test]
    async fn create_batch_then_increment() {
        let store = MemorySignalStore::new();
        let s = signal("t-1", "BTCUSDT", 1_700_000_100_000);
        let ids = store.create_batch(std::slice::from_ref(&s)).await.unwrap();
        assert_eq!(ids, vec![s.id.clone()]);

        let count = store
            .increment_count("t-1", "BTCUSDT", Interval::M5, 1_700_000_100_000)
            .await
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn increment_unknown_key_errors() {
        let store = MemorySignalStore::new();
        assert!(store
            .increment_count("t-1", "BTCUSDT", Interval::M5, 0)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn same_key_never_creates_two_rows() {
        // Dedup state lost across a restart: a second candidate arrives for
        // the same key with a different id.
        let store = MemorySignalStore::new();
        let a = signal("t-1", "BTCUSDT", 100);
        let mut b = signal("t-1", "BTCUSDT", 100);
        b.count = 2;

        store.create_batch(&[a.clone()]).await.unwrap();
        let ids = store.create_batch(&[b]).await.unwrap();

        assert_eq!(ids, vec![a.id]);
        assert_eq!(store.len(), 1);
        let rows = store.recent_signals(10).await.unwrap();
        assert_eq!(rows[0].count, 2);
    }

    #[tokio::test]
    async fn recent_signals_newest_first() {
        let store = MemorySignalStore::new();
        for i in 0..5 {
            store
                .create_batch(&[signal("t-1", "BTCUSDT", i * 300_000)])
                .await
                .unwrap();
        }
        let recent = store.recent_signals(3).await.unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].triggered_at, 4 * 300_000);
        assert_eq!(recent[2].triggered_at, 2 * 300_000);
    }

    #[tokio::test]
    async fn repository_filters_enabled_and_interval() {
        let repo = MemoryTraderRepository::new();
        repo.insert(trader("a", Interval::M5, true));
        repo.insert(trader("b", Interval::M5, false));
        repo.insert(trader("c", Interval::H1, true));

        let five = repo.list_enabled_by_interval(Interval::M5).await.unwrap();
        assert_eq!(five.len(), 1);
        assert_eq!(five[0].id, "a");

        repo.set_enabled("b", true).await.unwrap();
        let five = repo.list_enabled_by_interval(Interval::M5).await.unwrap();
        assert_eq!(five.len(), 2);
    }

    #[tokio::test]
    async fn metrics_update_is_monotonic() {
        let repo = MemoryTraderRepository::new();
        repo.insert(trader("a", Interval::M5, true));

        for _ in 0..3 {
            repo.update_metrics(
                "a",
                &MetricsDelta {
                    executions: 1,
                    signals: 2,
                    errors: 0,
                    last_run_at: 42,
                    duration_ms: 10,
                },
            )
            .await
            .unwrap();
        }

        let t = repo.get("a").await.unwrap().unwrap();
        assert_eq!(t.metrics.executions, 3);
        assert_eq!(t.metrics.signals, 6);
        assert_eq!(t.metrics.last_run_at, Some(42));
    }
}
