// =============================================================================
// Trader Execution Engine
// =============================================================================
//
// Event-driven scheduler: on every candle close the dispatcher fans out to
// every enabled trader on that interval; each run scans the symbol universe
// in parallel through a bounded worker pool, with all market data deduplicated
// by a per-run fetcher, and emits deduplicated signals.

pub mod deduper;
pub mod dispatcher;
pub mod executor;
pub mod fetcher;
pub mod snapshot;
pub mod worker_pool;

pub use deduper::SignalDeduper;
pub use dispatcher::EventDispatcher;
pub use executor::TraderExecutor;
pub use fetcher::DataFetcher;
pub use snapshot::{MarketSnapshot, SnapshotBuilder};
pub use worker_pool::{TaskResult, WorkerPool};
