// =============================================================================
// EventDispatcher — candle-close fan-out with per-trader coalescing
// =============================================================================
//
// On each CandleClose event the dispatcher looks up enabled traders whose
// primary interval matches and schedules a run per trader. Traders run
// concurrently; runs of the same trader are serialized by an in-flight guard.
// An event arriving mid-run is coalesced: the most recent pending event wins
// and exactly one follow-up run is scheduled, so a slow trader can never
// queue unbounded work.
//
// A global semaphore caps total concurrent runs to protect the downstream
// providers. A trader whose last K runs all failed with the same error kind
// is auto-paused and surfaced on the notice channel.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::executor::TraderExecutor;
use crate::metrics::EngineMetrics;
use crate::signal::RunState;
use crate::store::TraderRepository;
use crate::trader::Trader;
use crate::types::CandleClose;

/// Out-of-core notifications emitted by the dispatcher.
#[derive(Debug, Clone)]
pub enum EngineNotice {
    AutoPaused { trader_id: String, reason: String },
}

#[derive(Default)]
struct InflightState {
    running: bool,
    pending: Option<CandleClose>,
}

struct FailureStreak {
    kind: String,
    count: u32,
}

pub struct EventDispatcher {
    executor: Arc<TraderExecutor>,
    traders: Arc<dyn TraderRepository>,
    metrics: Arc<EngineMetrics>,
    inflight: Mutex<HashMap<String, InflightState>>,
    streaks: Mutex<HashMap<String, FailureStreak>>,
    permits: Arc<Semaphore>,
    auto_pause_threshold: u32,
    notices: Option<mpsc::UnboundedSender<EngineNotice>>,
    cancel: CancellationToken,
}

impl EventDispatcher {
    pub fn new(
        executor: Arc<TraderExecutor>,
        traders: Arc<dyn TraderRepository>,
        metrics: Arc<EngineMetrics>,
        max_trader_concurrency: usize,
        auto_pause_threshold: u32,
        notices: Option<mpsc::UnboundedSender<EngineNotice>>,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            executor,
            traders,
            metrics,
            inflight: Mutex::new(HashMap::new()),
            streaks: Mutex::new(HashMap::new()),
            permits: Arc::new(Semaphore::new(max_trader_concurrency.max(1))),
            auto_pause_threshold: auto_pause_threshold.max(1),
            notices,
            cancel,
        })
    }

    /// Consume candle-close events until the bus closes or shutdown.
    pub async fn run(self: Arc<Self>, mut events: broadcast::Receiver<CandleClose>) {
        info!("event dispatcher running");
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("event dispatcher shutting down");
                    break;
                }
                received = events.recv() => match received {
                    Ok(event) => Arc::clone(&self).dispatch(event).await,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(dropped = n, "event bus lagged, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("event bus closed, dispatcher stopping");
                        break;
                    }
                }
            }
        }
    }

    /// Fan one event out to every matching enabled trader.
    pub async fn dispatch(self: Arc<Self>, event: CandleClose) {
        let traders = match self.traders.list_enabled_by_interval(event.interval).await {
            Ok(traders) => traders,
            Err(e) => {
                warn!(interval = %event.interval, error = %format!("{e:#}"), "trader lookup failed");
                return;
            }
        };

        if traders.is_empty() {
            debug!(interval = %event.interval, "no enabled traders for interval");
            return;
        }

        debug!(
            interval = %event.interval,
            close_time = event.close_time,
            traders = traders.len(),
            "dispatching candle close"
        );

        for trader in traders {
            Arc::clone(&self).schedule(trader, event.clone());
        }
    }

    /// Schedule one trader, or coalesce if a run is already in flight.
    fn schedule(self: Arc<Self>, trader: Trader, event: CandleClose) {
        {
            let mut inflight = self.inflight.lock();
            let state = inflight.entry(trader.id.clone()).or_default();
            if state.running {
                // Most recent unprocessed event wins; intermediates drop.
                debug!(trader_id = %trader.id, close_time = event.close_time, "run in flight, coalescing event");
                state.pending = Some(event);
                return;
            }
            state.running = true;
        }

        tokio::spawn(async move {
            self.run_serialized(trader, event).await;
        });
    }

    /// Run the trader, then exactly one follow-up per coalesced backlog.
    async fn run_serialized(self: Arc<Self>, mut trader: Trader, mut event: CandleClose) {
        loop {
            let permit = match Arc::clone(&self.permits).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break, // semaphore closed on shutdown
            };

            let run_cancel = self.cancel.child_token();
            let result = self.executor.run(&trader, &event, run_cancel).await;
            drop(permit);

            self.track_outcome(&trader, result.state, result.failure_kind.as_deref())
                .await;

            // Follow-up run for the most recent coalesced event, if any.
            let next = {
                let mut inflight = self.inflight.lock();
                match inflight.get_mut(&trader.id) {
                    Some(state) => match state.pending.take() {
                        Some(pending) => Some(pending),
                        None => {
                            inflight.remove(&trader.id);
                            None
                        }
                    },
                    None => None,
                }
            };
            let Some(next_event) = next else { break };
            event = next_event;

            // Re-read the trader so a disable (manual or auto-pause) between
            // runs is honored.
            match self.traders.get(&trader.id).await {
                Ok(Some(fresh)) if fresh.enabled => trader = fresh,
                Ok(_) => {
                    debug!(trader_id = %trader.id, "trader disabled, dropping follow-up run");
                    self.inflight.lock().remove(&trader.id);
                    break;
                }
                Err(e) => {
                    warn!(trader_id = %trader.id, error = %format!("{e:#}"), "trader refresh failed, using last definition");
                }
            }
        }
    }

    /// Track consecutive identical failures and auto-pause past the
    /// threshold. Cancellation never counts toward a streak.
    async fn track_outcome(&self, trader: &Trader, state: RunState, failure_kind: Option<&str>) {
        let pause = {
            let mut streaks = self.streaks.lock();
            match (state, failure_kind) {
                (RunState::Failed, Some(kind)) => {
                    let streak = streaks
                        .entry(trader.id.clone())
                        .and_modify(|s| {
                            if s.kind == kind {
                                s.count += 1;
                            } else {
                                s.kind = kind.to_string();
                                s.count = 1;
                            }
                        })
                        .or_insert_with(|| FailureStreak {
                            kind: kind.to_string(),
                            count: 1,
                        });

                    if streak.count >= self.auto_pause_threshold {
                        let reason = format!(
                            "{} consecutive runs failed with '{}'",
                            streak.count, streak.kind
                        );
                        streaks.remove(&trader.id);
                        Some(reason)
                    } else {
                        None
                    }
                }
                (RunState::Cancelled, _) => None,
                _ => {
                    streaks.remove(&trader.id);
                    None
                }
            }
        };

        if let Some(reason) = pause {
            warn!(trader_id = %trader.id, reason = %reason, "auto-pausing trader");
            EngineMetrics::incr(&self.metrics.traders_auto_paused);

            if let Err(e) = self.traders.set_enabled(&trader.id, false).await {
                warn!(trader_id = %trader.id, error = %format!("{e:#}"), "failed to disable trader");
            }

            if let Some(notices) = &self.notices {
                let _ = notices.send(EngineNotice::AutoPaused {
                    trader_id: trader.id.clone(),
                    reason,
                });
            }
        }
    }
}
