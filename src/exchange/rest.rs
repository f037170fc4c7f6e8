//! REST perpetuals venue client
//!
//! Public market data needs no authentication; account and order
//! endpoints are signed with HMAC-SHA256 over `timestamp + method +
//! path + body` using the user's sealed API secret.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use sha2::Sha256;
use std::time::Duration as StdDuration;
use tracing::{debug, warn};

use super::ExchangeClient;
use crate::auth::ApiCredentials;
use crate::error::{BotError, Result};
use crate::types::{Candle, Direction, ExchangePosition, OrderReceipt, OrderRequest, Symbol};

type HmacSha256 = Hmac<Sha256>;

const DEFAULT_BASE_URL: &str = "https://api.perps.example.com/v1";
const MAX_CANDLES_PER_REQUEST: usize = 1000;

/// Raw candle row as the venue returns it
#[derive(Debug, Deserialize)]
struct RawCandle {
    #[serde(rename = "t")]
    open_time: i64,
    #[serde(rename = "o")]
    open: f64,
    #[serde(rename = "h")]
    high: f64,
    #[serde(rename = "l")]
    low: f64,
    #[serde(rename = "c")]
    close: f64,
    #[serde(rename = "v")]
    volume: f64,
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    equity: f64,
}

#[derive(Debug, Deserialize)]
struct PositionRow {
    symbol: String,
    size: f64,
    side: String,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    order_id: String,
    filled_price: f64,
    filled_size: f64,
}

#[derive(Debug, Clone)]
pub struct RestExchange {
    client: Client,
    base_url: String,
    credentials: ApiCredentials,
}

impl RestExchange {
    pub fn new(credentials: ApiCredentials) -> Self {
        Self::with_base_url(credentials, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(credentials: ApiCredentials, base_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(StdDuration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        RestExchange {
            client,
            base_url: base_url.into(),
            credentials,
        }
    }

    fn sign(&self, timestamp: i64, method: &str, path: &str, body: &str) -> String {
        let message = format!("{}{}{}{}", timestamp, method, path, body);
        let mut mac = HmacSha256::new_from_slice(self.credentials.expose_secret().as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(message.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    async fn get_signed<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let timestamp = Utc::now().timestamp_millis();
        let signature = self.sign(timestamp, "GET", path, "");

        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .header("X-Wallet-Address", self.credentials.wallet_address())
            .header("X-Timestamp", timestamp.to_string())
            .header("X-Signature", signature)
            .send()
            .await
            .map_err(|e| BotError::Execution(format!("request to {} failed: {}", path, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BotError::Execution(format!(
                "venue returned {} for {}: {}",
                status, path, body
            )));
        }

        response
            .json()
            .await
            .map_err(|e| BotError::Execution(format!("failed to parse {} response: {}", path, e)))
    }
}

#[async_trait]
impl ExchangeClient for RestExchange {
    async fn fetch_candles(
        &self,
        symbol: &Symbol,
        timeframe: &str,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        let limit = limit.min(MAX_CANDLES_PER_REQUEST);
        let path = "/candles";
        debug!(symbol = %symbol, timeframe, limit, "fetching candles");

        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .query(&[
                ("symbol", symbol.as_str()),
                ("interval", timeframe),
                ("limit", &limit.to_string()),
            ])
            .send()
            .await
            .map_err(|e| BotError::DataUnavailable {
                symbol: symbol.to_string(),
                timeframe: timeframe.to_string(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(BotError::DataUnavailable {
                symbol: symbol.to_string(),
                timeframe: timeframe.to_string(),
                reason: format!("venue returned {}", status),
            });
        }

        let raw: Vec<RawCandle> =
            response
                .json()
                .await
                .map_err(|e| BotError::DataUnavailable {
                    symbol: symbol.to_string(),
                    timeframe: timeframe.to_string(),
                    reason: format!("malformed candle payload: {}", e),
                })?;

        let mut candles: Vec<Candle> = raw
            .into_iter()
            .filter_map(|r| {
                let datetime = DateTime::from_timestamp_millis(r.open_time)?;
                Some(Candle {
                    datetime,
                    open: r.open,
                    high: r.high,
                    low: r.low,
                    close: r.close,
                    volume: r.volume,
                })
            })
            .collect();

        candles.sort_by_key(|c| c.datetime);
        candles.dedup_by_key(|c| c.datetime);
        Ok(candles)
    }

    async fn account_equity(&self) -> Result<f64> {
        let account: AccountResponse = self.get_signed("/account").await?;
        Ok(account.equity)
    }

    async fn open_positions(&self) -> Result<Vec<ExchangePosition>> {
        let rows: Vec<PositionRow> = self.get_signed("/positions").await?;

        Ok(rows
            .into_iter()
            .filter(|r| r.size != 0.0)
            .map(|r| {
                let direction = if r.side.eq_ignore_ascii_case("short") {
                    Direction::Short
                } else {
                    Direction::Long
                };
                ExchangePosition {
                    symbol: Symbol::new(r.symbol),
                    size: r.size.abs(),
                    direction,
                }
            })
            .collect())
    }

    async fn submit_order(&self, order: &OrderRequest) -> Result<OrderReceipt> {
        let path = "/orders";
        let body = serde_json::to_string(order)?;
        let timestamp = Utc::now().timestamp_millis();
        let signature = self.sign(timestamp, "POST", path, &body);

        debug!(symbol = %order.symbol, is_buy = order.is_buy, size = order.size, "submitting order");

        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .header("X-Wallet-Address", self.credentials.wallet_address())
            .header("X-Timestamp", timestamp.to_string())
            .header("X-Signature", signature)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| BotError::Execution(format!("order submission failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "order rejected by venue");
            return Err(BotError::Execution(format!(
                "order rejected with {}: {}",
                status, body
            )));
        }

        let filled: OrderResponse = response
            .json()
            .await
            .map_err(|e| BotError::Execution(format!("failed to parse order response: {}", e)))?;

        Ok(OrderReceipt {
            order_id: filled.order_id,
            filled_price: filled.filled_price,
            filled_size: filled.filled_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_is_stable_for_same_inputs() {
        let creds = ApiCredentials::new("0xwallet", "secret");
        let exchange = RestExchange::with_base_url(creds, "http://localhost:9999");

        let a = exchange.sign(1_700_000_000_000, "GET", "/account", "");
        let b = exchange.sign(1_700_000_000_000, "GET", "/account", "");
        assert_eq!(a, b);

        let c = exchange.sign(1_700_000_000_001, "GET", "/account", "");
        assert_ne!(a, c);
    }
}
