// =============================================================================
// Candle-close event bus
// =============================================================================
//
// The market feed publishes a CandleClose whenever a candle for a given
// interval closes; the dispatcher subscribes and fans out to traders.
// Coalescing in the dispatcher keeps slow consumers from queueing unbounded
// work, so a small broadcast buffer is enough.

pub mod kline_feed;

use tokio::sync::broadcast;

use crate::types::CandleClose;

pub use kline_feed::run_kline_feed;

/// Buffered events per subscriber before lagging kicks in.
const BUS_CAPACITY: usize = 64;

pub trait EventBus: Send + Sync {
    fn subscribe(&self) -> broadcast::Receiver<CandleClose>;
    fn publish(&self, event: CandleClose);
}

/// In-process bus over a tokio broadcast channel.
pub struct ChannelEventBus {
    tx: broadcast::Sender<CandleClose>,
}

impl ChannelEventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }
}

impl Default for ChannelEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus for ChannelEventBus {
    fn subscribe(&self) -> broadcast::Receiver<CandleClose> {
        self.tx.subscribe()
    }

    fn publish(&self, event: CandleClose) {
        // Send fails only when there are no subscribers; that is fine during
        // startup and shutdown.
        let _ = self.tx.send(event);
    }
}
