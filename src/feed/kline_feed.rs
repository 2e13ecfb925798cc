// =============================================================================
// Kline WebSocket feed — candle-close clock
// =============================================================================
//
// One combined-stream connection on a reference symbol covers every canonical
// interval; each closed kline (`k.x == true`) becomes a CandleClose event on
// the bus. The reference symbol only drives the clock — the screener then
// scans the whole universe through the REST provider.
//
// Runs until the stream disconnects or errors, then returns so the caller
// (main.rs) can handle reconnection.
// =============================================================================

use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::StreamExt;
use tokio_tungstenite::connect_async;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::feed::EventBus;
use crate::types::{Candle, CandleClose, Interval};

/// Build the combined-stream URL covering all intervals for one symbol.
fn build_stream_url(symbol: &str) -> String {
    let lower = symbol.to_lowercase();
    let streams: Vec<String> = Interval::ALL
        .iter()
        .map(|iv| format!("{lower}@kline_{iv}"))
        .collect();
    format!(
        "wss://stream.binance.com:9443/stream?streams={}",
        streams.join("/")
    )
}

/// Parse one kline message into a CandleClose, or `None` for a still-open
/// candle.
///
/// Expected shape (combined-stream envelope; a direct payload also works):
/// ```json
/// { "stream": "btcusdt@kline_5m", "data": { "e": "kline", "k": { ... } } }
/// ```
fn parse_close_event(text: &str) -> Result<Option<CandleClose>> {
    let root: serde_json::Value =
        serde_json::from_str(text).context("failed to parse kline JSON")?;

    let data = if root.get("data").is_some() {
        &root["data"]
    } else {
        &root
    };

    let k = &data["k"];
    if k.is_null() {
        // Subscription acks and other control frames carry no kline.
        return Ok(None);
    }

    let is_closed = k["x"].as_bool().context("missing field k.x")?;
    if !is_closed {
        return Ok(None);
    }

    let interval_str = k["i"].as_str().context("missing field k.i")?;
    let interval = Interval::parse(interval_str)
        .with_context(|| format!("unknown interval in kline message: {interval_str}"))?;

    let open_time = k["t"].as_i64().context("missing field k.t")?;
    // Exclusive close time; Binance's k.T is the inclusive last millisecond.
    let close_time = open_time + interval.duration_ms();

    let kline = Candle {
        open_time,
        close_time,
        open: parse_string_f64(&k["o"], "k.o")?,
        high: parse_string_f64(&k["h"], "k.h")?,
        low: parse_string_f64(&k["l"], "k.l")?,
        close: parse_string_f64(&k["c"], "k.c")?,
        volume: parse_string_f64(&k["v"], "k.v")?,
        quote_volume: parse_string_f64(&k["q"], "k.q")?,
        trades_count: k["n"].as_u64().context("missing field k.n")?,
        taker_buy_volume: parse_string_f64(&k["V"], "k.V")?,
        taker_buy_quote_volume: parse_string_f64(&k["Q"], "k.Q")?,
        is_closed: true,
    };

    Ok(Some(CandleClose {
        interval,
        close_time,
        kline: Some(kline),
    }))
}

/// Binance sends numeric values as JSON strings inside kline objects.
fn parse_string_f64(val: &serde_json::Value, name: &str) -> Result<f64> {
    match val {
        serde_json::Value::String(s) => s
            .parse::<f64>()
            .with_context(|| format!("failed to parse {name} as f64: {s}")),
        serde_json::Value::Number(n) => n
            .as_f64()
            .with_context(|| format!("field {name} is not a valid f64")),
        _ => anyhow::bail!("field {name} has unexpected JSON type"),
    }
}

/// Connect to the reference symbol's kline streams and publish close events
/// until the stream ends, errors, or `cancel` fires.
pub async fn run_kline_feed(
    symbol: &str,
    bus: Arc<dyn EventBus>,
    cancel: CancellationToken,
) -> Result<()> {
    let url = build_stream_url(symbol);
    info!(url = %url, symbol = %symbol, "connecting to kline close feed");

    let (ws_stream, _response) = connect_async(&url)
        .await
        .context("failed to connect to kline WebSocket")?;

    info!(symbol = %symbol, "kline close feed connected");
    let (_write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!(symbol = %symbol, "kline close feed stopping on shutdown");
                return Ok(());
            }
            msg = read.next() => match msg {
                Some(Ok(msg)) => {
                    if let tokio_tungstenite::tungstenite::Message::Text(text) = msg {
                        match parse_close_event(&text) {
                            Ok(Some(event)) => {
                                debug!(
                                    interval = %event.interval,
                                    close_time = event.close_time,
                                    "candle close"
                                );
                                bus.publish(event);
                            }
                            Ok(None) => {} // open candle or control frame
                            Err(e) => {
                                warn!(error = %e, "failed to parse kline message");
                            }
                        }
                    }
                    // Ping/Pong/Binary/Close frames are handled by tungstenite.
                }
                Some(Err(e)) => {
                    error!(error = %e, "kline feed read error");
                    return Err(e.into());
                }
                None => {
                    warn!(symbol = %symbol, "kline feed stream ended");
                    return Ok(());
                }
            }
        }
    }
}
