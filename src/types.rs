//! Core data types used across the trading engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// OHLCV candlestick data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub datetime: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Trading pair symbol
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Symbol(pub String);

impl Symbol {
    pub fn new(s: impl Into<String>) -> Self {
        Symbol(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position direction for a leveraged futures trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn opposite(&self) -> Direction {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }

    /// +1.0 for long, -1.0 for short; used to flip TP/SL offsets
    pub fn sign(&self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
        }
    }
}

/// Directional action reported by the signal analyzer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalAction {
    Long,
    Short,
    Neutral,
}

impl SignalAction {
    pub fn direction(&self) -> Option<Direction> {
        match self {
            SignalAction::Long => Some(Direction::Long),
            SignalAction::Short => Some(Direction::Short),
            SignalAction::Neutral => None,
        }
    }
}

/// Snapshot of indicator values attached to a signal
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub rsi: Option<f64>,
    pub atr: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub ema_fast: Option<f64>,
    pub ema_slow: Option<f64>,
    /// Recent close-to-close volatility as a percentage of price
    pub volatility_pct: Option<f64>,
}

/// Support/resistance and baseline levels derived from price structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TechnicalLevels {
    pub support: Option<f64>,
    pub resistance: Option<f64>,
    /// Midpoint of the rolling 26-bar high/low range
    pub baseline: Option<f64>,
    /// Midpoint of the rolling 9-bar high/low range
    pub conversion: Option<f64>,
}

/// A qualifying trade candidate produced by one analysis tick.
///
/// Transient: created during analysis, consumed by trade processing in the
/// same tick, replaced wholesale on the next tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    pub symbol: Symbol,
    pub timeframe: String,
    pub direction: Direction,
    pub score: f64,
    /// Last close at analysis time
    pub price: f64,
    pub indicators: IndicatorSnapshot,
    pub levels: TechnicalLevels,
}

/// A position the bot opened and still tracks locally
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenPosition {
    pub symbol: Symbol,
    pub direction: Direction,
    pub entry_price: f64,
    pub size: f64,
    pub take_profit: f64,
    pub stop_loss: f64,
    pub opened_at: DateTime<Utc>,
}

impl OpenPosition {
    pub fn notional(&self) -> f64 {
        self.size * self.entry_price
    }

    pub fn unrealized_pnl(&self, current_price: f64) -> f64 {
        (current_price - self.entry_price) * self.size * self.direction.sign()
    }
}

/// Completed trade record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub symbol: Symbol,
    pub direction: Direction,
    pub entry_price: f64,
    pub exit_price: f64,
    pub size: f64,
    pub pnl: f64,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
    pub reason: String,
}

/// Position sizing result, computed fresh per trade.
///
/// `risk_amount` is the dollar loss realized if price reaches the stop,
/// independent of leverage. Leverage only reduces `margin_required`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionSizing {
    /// Position size in asset units
    pub size: f64,
    /// Notional value in quote currency (size * price)
    pub notional_value: f64,
    /// Margin locked at the configured leverage
    pub margin_required: f64,
    /// Dollar amount at risk if the stop is hit
    pub risk_amount: f64,
}

/// Order submitted to the exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: Symbol,
    pub is_buy: bool,
    pub size: f64,
    /// None for market orders
    pub price: Option<f64>,
    pub take_profit: f64,
    pub stop_loss: f64,
    pub leverage: f64,
}

/// Exchange acknowledgement of a filled order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderReceipt {
    pub order_id: String,
    pub filled_price: f64,
    pub filled_size: f64,
}

/// Open position as reported by the exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangePosition {
    pub symbol: Symbol,
    pub size: f64,
    pub direction: Direction,
}

/// Aggregate statistics produced by a backtest run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub total_return: f64,
    pub max_drawdown: f64,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_sign_and_opposite() {
        assert_eq!(Direction::Long.sign(), 1.0);
        assert_eq!(Direction::Short.sign(), -1.0);
        assert_eq!(Direction::Long.opposite(), Direction::Short);
        assert_eq!(Direction::Short.opposite(), Direction::Long);
    }

    #[test]
    fn test_unrealized_pnl_flips_with_direction() {
        let base = OpenPosition {
            symbol: Symbol::new("BTC"),
            direction: Direction::Long,
            entry_price: 100.0,
            size: 2.0,
            take_profit: 110.0,
            stop_loss: 95.0,
            opened_at: Utc::now(),
        };
        assert_eq!(base.unrealized_pnl(105.0), 10.0);

        let short = OpenPosition {
            direction: Direction::Short,
            take_profit: 90.0,
            stop_loss: 105.0,
            ..base
        };
        assert_eq!(short.unrealized_pnl(105.0), -10.0);
    }
}
