// =============================================================================
// Symbol Universe Providers
// =============================================================================
//
// The universe is read-only to the engine. Two sources:
//   - StaticUniverse: the configured symbol list, unchanged.
//   - BinanceUniverse: TRADING symbols quoted in a given asset, loaded from
//     exchangeInfo and cached with a TTL so repeated runs do not hammer the
//     endpoint.
// =============================================================================

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::info;

use crate::market::SymbolUniverseProvider;

// =============================================================================
// StaticUniverse
// =============================================================================

/// Fixed symbol list from configuration.
pub struct StaticUniverse {
    symbols: Vec<String>,
}

impl StaticUniverse {
    pub fn new(symbols: Vec<String>) -> Self {
        Self { symbols }
    }
}

#[async_trait]
impl SymbolUniverseProvider for StaticUniverse {
    async fn list(&self) -> Result<Vec<String>> {
        Ok(self.symbols.clone())
    }
}

// =============================================================================
// BinanceUniverse
// =============================================================================

const EXCHANGE_INFO_URL: &str = "https://api.binance.com/api/v3/exchangeInfo";

/// Default refresh period for the cached symbol list.
const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Exchange-backed universe: every TRADING symbol quoted in `quote_asset`.
pub struct BinanceUniverse {
    client: reqwest::Client,
    quote_asset: String,
    ttl: Duration,
    cache: RwLock<Option<(Instant, Vec<String>)>>,
}

impl BinanceUniverse {
    pub fn new(quote_asset: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("failed to build reqwest client");

        Self {
            client,
            quote_asset: quote_asset.into(),
            ttl: DEFAULT_TTL,
            cache: RwLock::new(None),
        }
    }

    fn cached(&self) -> Option<Vec<String>> {
        let cache = self.cache.read();
        match cache.as_ref() {
            Some((at, symbols)) if at.elapsed() < self.ttl => Some(symbols.clone()),
            _ => None,
        }
    }

    /// Extract TRADING symbols for the quote asset from an exchangeInfo body.
    fn filter_symbols(body: &serde_json::Value, quote_asset: &str) -> Result<Vec<String>> {
        let entries = body["symbols"]
            .as_array()
            .context("exchangeInfo response missing 'symbols' array")?;

        let mut out = Vec::new();
        for entry in entries {
            let status = entry["status"].as_str().unwrap_or("");
            let quote = entry["quoteAsset"].as_str().unwrap_or("");
            if status == "TRADING" && quote == quote_asset {
                if let Some(symbol) = entry["symbol"].as_str() {
                    out.push(symbol.to_string());
                }
            }
        }
        out.sort();
        Ok(out)
    }
}

#[async_trait]
impl SymbolUniverseProvider for BinanceUniverse {
    async fn list(&self) -> Result<Vec<String>> {
        if let Some(symbols) = self.cached() {
            return Ok(symbols);
        }

        let body: serde_json::Value = self
            .client
            .get(EXCHANGE_INFO_URL)
            .send()
            .await
            .context("exchangeInfo request failed")?
            .json()
            .await
            .context("failed to parse exchangeInfo response")?;

        let symbols = Self::filter_symbols(&body, &self.quote_asset)?;
        if symbols.is_empty() {
            anyhow::bail!("exchangeInfo returned no TRADING {} symbols", self.quote_asset);
        }

        info!(count = symbols.len(), quote = %self.quote_asset, "symbol universe refreshed");
        *self.cache.write() = Some((Instant::now(), symbols.clone()));
        Ok(symbols)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_universe_returns_configured_list() {
        let u = StaticUniverse::new(vec!["BTCUSDT".into(), "ETHUSDT".into()]);
        let symbols = u.list().await.unwrap();
        assert_eq!(symbols, vec!["BTCUSDT", "ETHUSDT"]);
    }

    #[test]
    fn filter_symbols_keeps_trading_quote_matches() {
        let body = serde_json::json!({
            "symbols": [
                { "symbol": "BTCUSDT", "status": "TRADING", "quoteAsset": "USDT" },
                { "symbol": "ETHBTC", "status": "TRADING", "quoteAsset": "BTC" },
                { "symbol": "OLDUSDT", "status": "BREAK", "quoteAsset": "USDT" },
                { "symbol": "ETHUSDT", "status": "TRADING", "quoteAsset": "USDT" }
            ]
        });
        let symbols = BinanceUniverse::filter_symbols(&body, "USDT").unwrap();
        assert_eq!(symbols, vec!["BTCUSDT", "ETHUSDT"]);
    }

    #[test]
    fn filter_symbols_rejects_malformed_body() {
        let body = serde_json::json!({ "not_symbols": [] });
        assert!(BinanceUniverse::filter_symbols(&body, "USDT").is_err());
    }
}
