// =============================================================================
// Binance REST Market Data Provider
// =============================================================================
//
// Only public (unsigned) endpoints are used: /api/v3/klines and
// /api/v3/ticker/24hr. Binance encodes numeric values as JSON strings inside
// kline rows; parsing normalises them to f64 and converts close times to the
// engine's exclusive convention (open_time + interval_ms).
// =============================================================================

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::market::MarketDataProvider;
use crate::types::{Candle, Interval, Ticker};

const DEFAULT_BASE_URL: &str = "https://api.binance.com";

/// Binance spot REST client for public market data.
#[derive(Clone)]
pub struct BinanceMarketData {
    base_url: String,
    client: reqwest::Client,
}

impl BinanceMarketData {
    /// Build a client with the given per-request timeout.
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("failed to build reqwest client");

        debug!(base_url = DEFAULT_BASE_URL, "BinanceMarketData initialised");

        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            client,
        }
    }

    async fn get_json(&self, url: &str) -> Result<serde_json::Value> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("GET {url} request failed"))?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .with_context(|| format!("failed to parse response from {url}"))?;

        if !status.is_success() {
            anyhow::bail!("Binance returned {status}: {body}");
        }
        Ok(body)
    }
}

/// Binance sends numeric values as JSON strings inside kline rows.
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

/// Parse one row of the /api/v3/klines array-of-arrays payload.
///
/// Row shape:
/// ```json
/// [openTime, "o", "h", "l", "c", "v", closeTime, "q", n, "V", "Q", "ignore"]
/// ```
fn parse_kline_row(row: &serde_json::Value, interval: Interval, now_ms: i64) -> Result<Candle> {
    let row = row.as_array().context("kline row is not an array")?;
    if row.len() < 11 {
        anyhow::bail!("kline row too short: {} fields", row.len());
    }

    let open_time = row[0].as_i64().context("missing kline open time")?;
    // Binance reports the inclusive last millisecond; normalise to exclusive.
    let close_time = open_time + interval.duration_ms();

    Ok(Candle {
        open_time,
        close_time,
        open: parse_string_f64(&row[1], "open")?,
        high: parse_string_f64(&row[2], "high")?,
        low: parse_string_f64(&row[3], "low")?,
        close: parse_string_f64(&row[4], "close")?,
        volume: parse_string_f64(&row[5], "volume")?,
        quote_volume: parse_string_f64(&row[7], "quote_volume")?,
        trades_count: row[8].as_u64().context("missing kline trade count")?,
        taker_buy_volume: parse_string_f64(&row[9], "taker_buy_volume")?,
        taker_buy_quote_volume: parse_string_f64(&row[10], "taker_buy_quote_volume")?,
        is_closed: close_time <= now_ms,
    })
}

/// 24h ticker payload from /api/v3/ticker/24hr.
#[derive(Debug, Deserialize)]
struct TickerPayload {
    symbol: String,
    #[serde(rename = "lastPrice")]
    last_price: String,
    #[serde(rename = "priceChangePercent")]
    price_change_percent: String,
    #[serde(rename = "quoteVolume")]
    quote_volume: String,
}

impl TickerPayload {
    fn into_ticker(self) -> Result<Ticker> {
        Ok(Ticker {
            last_price: self
                .last_price
                .parse()
                .context("failed to parse lastPrice")?,
            price_change_percent: self
                .price_change_percent
                .parse()
                .context("failed to parse priceChangePercent")?,
            quote_volume: self
                .quote_volume
                .parse()
                .context("failed to parse quoteVolume")?,
            symbol: self.symbol,
        })
    }
}

#[async_trait]
impl MarketDataProvider for BinanceMarketData {
    async fn get_klines(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        let url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            self.base_url,
            symbol,
            interval.as_str(),
            limit.min(1000)
        );

        let body = self.get_json(&url).await?;
        let rows = body.as_array().context("klines response is not an array")?;

        let now_ms = chrono::Utc::now().timestamp_millis();
        let mut candles = Vec::with_capacity(rows.len());
        for row in rows {
            candles.push(parse_kline_row(row, interval, now_ms)?);
        }

        debug!(symbol, interval = %interval, count = candles.len(), "klines fetched");
        Ok(candles)
    }

    async fn get_ticker(&self, symbol: &str) -> Result<Ticker> {
        let url = format!("{}/api/v3/ticker/24hr?symbol={}", self.base_url, symbol);
        let body = self.get_json(&url).await?;
        let payload: TickerPayload =
            serde_json::from_value(body).context("failed to decode ticker payload")?;
        payload.into_ticker()
    }

    async fn get_tickers_batch(&self, symbols: &[String]) -> Result<HashMap<String, Ticker>> {
        // One unfiltered call covers the whole exchange; filtering locally is
        // cheaper than chunking the symbols parameter for a large universe.
        let url = format!("{}/api/v3/ticker/24hr", self.base_url);
        let body = self.get_json(&url).await?;
        let payloads: Vec<TickerPayload> =
            serde_json::from_value(body).context("failed to decode ticker batch payload")?;

        let wanted: std::collections::HashSet<&str> =
            symbols.iter().map(String::as_str).collect();

        let mut out = HashMap::with_capacity(symbols.len());
        for p in payloads {
            if wanted.contains(p.symbol.as_str()) {
                let ticker = p.into_ticker()?;
                out.insert(ticker.symbol.clone(), ticker);
            }
        }

        debug!(requested = symbols.len(), resolved = out.len(), "ticker batch fetched");
        Ok(out)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_kline_row_ok() {
        let row = serde_json::json!([
            1_700_000_000_000_i64,
            "37000.00",
            "37050.00",
            "36990.00",
            "37020.00",
            "123.456",
            1_700_000_299_999_i64,
            "4567890.12",
            1500,
            "60.123",
            "2224455.66",
            "0"
        ]);
        let c = parse_kline_row(&row, Interval::M5, 1_700_000_400_000).unwrap();
        assert_eq!(c.open_time, 1_700_000_000_000);
        // Exclusive close: open + 5m, not Binance's inclusive 299_999.
        assert_eq!(c.close_time, 1_700_000_300_000);
        assert!((c.close - 37_020.0).abs() < f64::EPSILON);
        assert_eq!(c.trades_count, 1500);
        assert!(c.is_closed);
    }

    #[test]
    fn parse_kline_row_open_candle() {
        let row = serde_json::json!([
            1_700_000_000_000_i64,
            "1",
            "2",
            "0.5",
            "1.5",
            "10",
            1_700_000_299_999_i64,
            "15",
            3,
            "5",
            "7.5",
            "0"
        ]);
        // now is before the exclusive close => candle still open.
        let c = parse_kline_row(&row, Interval::M5, 1_700_000_100_000).unwrap();
        assert!(!c.is_closed);
    }

    #[test]
    fn parse_kline_row_rejects_short_rows() {
        let row = serde_json::json!([1_700_000_000_000_i64, "1", "2"]);
        assert!(parse_kline_row(&row, Interval::M1, 0).is_err());
    }

    #[test]
    fn ticker_payload_parses_string_numbers() {
        let payload: TickerPayload = serde_json::from_value(serde_json::json!({
            "symbol": "BTCUSDT",
            "lastPrice": "50000.00",
            "priceChangePercent": "1.2",
            "quoteVolume": "990000000.0"
        }))
        .unwrap();
        let t = payload.into_ticker().unwrap();
        assert_eq!(t.symbol, "BTCUSDT");
        assert!((t.last_price - 50_000.0).abs() < f64::EPSILON);
        assert!((t.price_change_percent - 1.2).abs() < f64::EPSILON);
        assert!((t.quote_volume - 9.9e8).abs() < f64::EPSILON);
    }

    #[test]
    fn ticker_payload_rejects_garbage() {
        let payload: TickerPayload = serde_json::from_value(serde_json::json!({
            "symbol": "BTCUSDT",
            "lastPrice": "not-a-number",
            "priceChangePercent": "1.2",
            "quoteVolume": "1.0"
        }))
        .unwrap();
        assert!(payload.into_ticker().is_err());
    }
}
