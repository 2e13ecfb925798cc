// =============================================================================
// Engine Metrics — process-wide counters
// =============================================================================
//
// Lock-free atomic counters, incremented by the dispatcher and executors and
// exposed as a serialisable snapshot on the status API.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct EngineMetrics {
    pub runs_started: AtomicU64,
    pub runs_failed: AtomicU64,
    pub symbols_scanned: AtomicU64,
    pub matches: AtomicU64,
    pub signals_emitted: AtomicU64,
    pub signals_deduped: AtomicU64,
    pub fetch_hits: AtomicU64,
    pub fetch_misses: AtomicU64,
    pub sandbox_timeouts: AtomicU64,
    pub queue_overflows: AtomicU64,
    pub traders_auto_paused: AtomicU64,
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub runs_started: u64,
    pub runs_failed: u64,
    pub symbols_scanned: u64,
    pub matches: u64,
    pub signals_emitted: u64,
    pub signals_deduped: u64,
    pub fetch_hits: u64,
    pub fetch_misses: u64,
    pub sandbox_timeouts: u64,
    pub queue_overflows: u64,
    pub traders_auto_paused: u64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            runs_started: self.runs_started.load(Ordering::Relaxed),
            runs_failed: self.runs_failed.load(Ordering::Relaxed),
            symbols_scanned: self.symbols_scanned.load(Ordering::Relaxed),
            matches: self.matches.load(Ordering::Relaxed),
            signals_emitted: self.signals_emitted.load(Ordering::Relaxed),
            signals_deduped: self.signals_deduped.load(Ordering::Relaxed),
            fetch_hits: self.fetch_hits.load(Ordering::Relaxed),
            fetch_misses: self.fetch_misses.load(Ordering::Relaxed),
            sandbox_timeouts: self.sandbox_timeouts.load(Ordering::Relaxed),
            queue_overflows: self.queue_overflows.load(Ordering::Relaxed),
            traders_auto_paused: self.traders_auto_paused.load(Ordering::Relaxed),
        }
    }
}
