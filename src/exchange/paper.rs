//! Simulated venue for manual mode and tests
//!
//! Fills every order at the requested price (or the latest close when no
//! price is given), tracks the resulting positions, and keeps a record of
//! every submitted order for inspection.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::info;

use super::ExchangeClient;
use crate::error::{BotError, Result};
use crate::types::{Candle, Direction, ExchangePosition, OrderReceipt, OrderRequest, Symbol};

#[derive(Debug, Default)]
struct PaperState {
    equity: f64,
    candles: HashMap<(String, String), Vec<Candle>>,
    positions: Vec<ExchangePosition>,
    submitted: Vec<OrderRequest>,
    next_order_id: u64,
}

#[derive(Debug)]
pub struct PaperExchange {
    state: Mutex<PaperState>,
}

impl PaperExchange {
    pub fn new(equity: f64) -> Self {
        PaperExchange {
            state: Mutex::new(PaperState {
                equity,
                next_order_id: 1,
                ..PaperState::default()
            }),
        }
    }

    /// Preload the candle feed for one symbol and timeframe
    pub async fn load_candles(&self, symbol: &Symbol, timeframe: &str, candles: Vec<Candle>) {
        let mut state = self.state.lock().await;
        state
            .candles
            .insert((symbol.to_string(), timeframe.to_string()), candles);
    }

    pub async fn set_equity(&self, equity: f64) {
        self.state.lock().await.equity = equity;
    }

    pub async fn set_positions(&self, positions: Vec<ExchangePosition>) {
        self.state.lock().await.positions = positions;
    }

    /// Orders submitted so far, oldest first
    pub async fn submitted_orders(&self) -> Vec<OrderRequest> {
        self.state.lock().await.submitted.clone()
    }
}

#[async_trait]
impl ExchangeClient for PaperExchange {
    async fn fetch_candles(
        &self,
        symbol: &Symbol,
        timeframe: &str,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        let state = self.state.lock().await;
        let key = (symbol.to_string(), timeframe.to_string());
        let candles = state
            .candles
            .get(&key)
            .ok_or_else(|| BotError::DataUnavailable {
                symbol: symbol.to_string(),
                timeframe: timeframe.to_string(),
                reason: "no candles loaded".to_string(),
            })?;

        let start = candles.len().saturating_sub(limit);
        Ok(candles[start..].to_vec())
    }

    async fn account_equity(&self) -> Result<f64> {
        Ok(self.state.lock().await.equity)
    }

    async fn open_positions(&self) -> Result<Vec<ExchangePosition>> {
        Ok(self.state.lock().await.positions.clone())
    }

    async fn submit_order(&self, order: &OrderRequest) -> Result<OrderReceipt> {
        let mut state = self.state.lock().await;

        let fill_price = match order.price {
            Some(p) => p,
            None => {
                // Fall back to the most recent close on any loaded timeframe
                state
                    .candles
                    .iter()
                    .filter(|((s, _), _)| *s == order.symbol.as_str())
                    .filter_map(|(_, candles)| candles.last())
                    .map(|c| c.close)
                    .next()
                    .ok_or_else(|| {
                        BotError::Execution(format!(
                            "no market price available for {}",
                            order.symbol
                        ))
                    })?
            }
        };

        let order_id = format!("paper-{}", state.next_order_id);
        state.next_order_id += 1;

        state.positions.push(ExchangePosition {
            symbol: order.symbol.clone(),
            size: order.size,
            direction: if order.is_buy {
                Direction::Long
            } else {
                Direction::Short
            },
        });
        state.submitted.push(order.clone());

        info!(
            order_id = %order_id,
            symbol = %order.symbol,
            size = order.size,
            fill_price,
            "paper fill"
        );

        Ok(OrderReceipt {
            order_id,
            filled_price: fill_price,
            filled_size: order.size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono::Utc;

    fn candle(close: f64) -> Candle {
        Candle {
            datetime: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            open: close,
            high: close,
            low: close,
            close,
            volume: 100.0,
        }
    }

    #[tokio::test]
    async fn test_fetch_candles_respects_limit() {
        let exchange = PaperExchange::new(10_000.0);
        let symbol = Symbol::new("BTC");
        exchange
            .load_candles(&symbol, "1h", (0..100).map(|i| candle(i as f64)).collect())
            .await;

        let candles = exchange.fetch_candles(&symbol, "1h", 10).await.unwrap();
        assert_eq!(candles.len(), 10);
        assert_eq!(candles.last().unwrap().close, 99.0);
    }

    #[tokio::test]
    async fn test_missing_feed_is_data_unavailable() {
        let exchange = PaperExchange::new(10_000.0);
        let err = exchange
            .fetch_candles(&Symbol::new("ETH"), "1h", 10)
            .await
            .unwrap_err();
        assert!(matches!(err, BotError::DataUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_submit_order_tracks_position() {
        let exchange = PaperExchange::new(10_000.0);
        let symbol = Symbol::new("BTC");
        exchange.load_candles(&symbol, "1h", vec![candle(50_000.0)]).await;

        let receipt = exchange
            .submit_order(&OrderRequest {
                symbol: symbol.clone(),
                is_buy: true,
                size: 0.1,
                price: None,
                take_profit: 51_000.0,
                stop_loss: 49_500.0,
                leverage: 5.0,
            })
            .await
            .unwrap();

        assert_eq!(receipt.filled_price, 50_000.0);
        let positions = exchange.open_positions().await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].direction, Direction::Long);
        assert_eq!(exchange.submitted_orders().await.len(), 1);
    }
}
