// =============================================================================
// Analysis handoff — bounded queue to the downstream AI pipeline
// =============================================================================
//
// The engine produces; the analysis consumer is a separate pipeline, possibly
// on another machine. Their lifetimes are not coupled: `offer` is
// non-blocking by contract, and a full queue refuses the request instead of
// stalling a run.
// =============================================================================

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::engine::snapshot::MarketSnapshot;
use crate::signal::Signal;
use crate::trader::Trader;

/// Handoff object for one new signal.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub signal: Signal,
    pub trader: Trader,
    pub snapshot: Arc<MarketSnapshot>,
}

/// Bounded, non-blocking intake of analysis requests.
pub trait AnalysisQueue: Send + Sync {
    /// Returns false immediately when the queue is full; never blocks.
    fn offer(&self, request: AnalysisRequest) -> bool;
}

/// In-process queue over a bounded tokio channel.
pub struct ChannelAnalysisQueue {
    tx: mpsc::Sender<AnalysisRequest>,
}

impl ChannelAnalysisQueue {
    /// Build the queue and its receiving end. The caller owns the receiver
    /// and typically hands it to `spawn_consumer`.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<AnalysisRequest>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl AnalysisQueue for ChannelAnalysisQueue {
    fn offer(&self, request: AnalysisRequest) -> bool {
        self.tx.try_send(request).is_ok()
    }
}

/// Drain the queue, logging each accepted request. Stands in for the
/// out-of-core analysis pipeline consumer.
pub fn spawn_consumer(
    mut rx: mpsc::Receiver<AnalysisRequest>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("analysis consumer shutting down");
                    break;
                }
                request = rx.recv() => {
                    let Some(request) = request else { break };
                    debug!(
                        signal_id = %request.signal.id,
                        trader_id = %request.trader.id,
                        symbol = %request.signal.symbol,
                        model_tier = %request.trader.strategy.model_tier,
                        "analysis request accepted"
                    );
                }
            }
        }
    })
}
