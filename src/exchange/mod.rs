//! Exchange connectivity
//!
//! The engine talks to venues through the [`ExchangeClient`] trait so the
//! same bot loop drives a live REST venue, the paper exchange, and test
//! doubles. These four calls are the only places the tick suspends.

mod paper;
mod rest;

pub use paper::PaperExchange;
pub use rest::RestExchange;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Candle, ExchangePosition, OrderReceipt, OrderRequest, Symbol};

#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Fetch the most recent `limit` closed candles, oldest first
    async fn fetch_candles(
        &self,
        symbol: &Symbol,
        timeframe: &str,
        limit: usize,
    ) -> Result<Vec<Candle>>;

    /// Current account equity in USD
    async fn account_equity(&self) -> Result<f64>;

    /// Positions currently open on the venue
    async fn open_positions(&self) -> Result<Vec<ExchangePosition>>;

    /// Submit an entry order with attached take-profit and stop-loss
    async fn submit_order(&self, order: &OrderRequest) -> Result<OrderReceipt>;
}
