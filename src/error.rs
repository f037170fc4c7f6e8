//! Error taxonomy for the trading engine.
//!
//! Risk-limit breaches are deliberately not part of this enum: a rejected
//! trade is a first-class gate result (`RiskDecision`), not a failure.

use thiserror::Error;

/// Errors raised by the decision-and-risk engine
#[derive(Debug, Error)]
pub enum BotError {
    /// Invalid or missing configuration; fatal to the operation that
    /// raised it, surfaced to the caller.
    #[error("configuration error: {0}")]
    Config(String),

    /// Wallet credential missing, malformed, or rejected by the exchange.
    /// Fatal to `start()`: the bot must not run unauthenticated.
    #[error("authentication error: {0}")]
    Auth(String),

    /// Candle fetch failed or history too short; the affected
    /// symbol/timeframe pair is skipped for the current tick.
    #[error("market data unavailable for {symbol} {timeframe}: {reason}")]
    DataUnavailable {
        symbol: String,
        timeframe: String,
        reason: String,
    },

    /// Order submission or balance query failed; aborts only the current
    /// trade attempt.
    #[error("execution error: {0}")]
    Execution(String),

    /// No bot is registered for the addressed user.
    #[error("unknown user: {0}")]
    UnknownUser(String),

    /// Risk state could not be read or written.
    #[error("persistence error: {0}")]
    Persistence(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BotError>;
