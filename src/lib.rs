//! Per-user perpetual futures trading engine
//!
//! Each user gets an isolated bot that periodically analyzes its
//! configured symbols, filters the resulting signals, sizes positions
//! against live account equity, and either surfaces opportunities
//! (manual mode) or submits orders with attached take-profit and
//! stop-loss levels (auto mode). A registry orchestrates the bots and
//! merges their event streams; a backtester replays the same decision
//! pipeline over historical candles.
//!
//! # Example
//! ```no_run
//! use std::sync::Arc;
//! use perpbot::config::{TradingConfig, UserProfile};
//! use perpbot::registry::BotRegistry;
//! use perpbot::risk::RiskLimits;
//! use perpbot::signal::TrendScoreAnalyzer;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let registry = BotRegistry::new(
//!         Arc::new(TrendScoreAnalyzer),
//!         RiskLimits::default(),
//!         "state",
//!     );
//!     let profile = UserProfile {
//!         user_id: "alice".to_string(),
//!         wallet_address: "0xabc".to_string(),
//!         encrypted_secret: None,
//!         paper: true,
//!         config: TradingConfig::default(),
//!     };
//!     registry.get_or_create(&profile).await?;
//!     registry.start("alice").await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod backtest;
pub mod bot;
pub mod config;
pub mod data;
pub mod error;
pub mod events;
pub mod exchange;
pub mod indicators;
pub mod registry;
pub mod risk;
pub mod signal;
pub mod tpsl;
pub mod types;

pub use error::{BotError, Result};
pub use types::{Candle, Direction, Opportunity, SignalAction, Symbol};
