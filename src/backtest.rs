//! Backtesting engine
//!
//! Replays the live decision pipeline (analyze, filter, TP/SL, sizing)
//! over historical candles with fee and slippage modeling. Entries use
//! T+1 execution: a signal on bar T fills at the open of bar T+1.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::config::TradingConfig;
use crate::risk::{calculate_position_size, SizingParams};
use crate::signal::{AnalyzerParams, SignalAnalyzer};
use crate::tpsl::{self, TpslInputs};
use crate::types::{Candle, ClosedTrade, Direction, OpenPosition, PerformanceMetrics, Symbol};

/// Indicator window passed to the analyzer per bar
const MAX_LOOKBACK: usize = 200;

/// Bars of warmup before the first signal is considered
const WARMUP_BARS: usize = 60;

#[derive(Debug, Clone, Copy)]
pub struct BacktestSettings {
    pub initial_capital: f64,
    /// Taker fee per side, as a fraction of notional
    pub fee_rate: f64,
    /// Adverse fill assumption applied to entries, as a fraction of price
    pub slippage: f64,
}

impl Default for BacktestSettings {
    fn default() -> Self {
        BacktestSettings {
            initial_capital: 10_000.0,
            fee_rate: 0.0005,
            slippage: 0.0005,
        }
    }
}

/// Signal waiting for next-bar execution
#[derive(Debug, Clone)]
struct PendingEntry {
    direction: Direction,
    stop_loss: f64,
    take_profit: f64,
}

#[derive(Debug, Clone, Default)]
pub struct BacktestResult {
    pub metrics: PerformanceMetrics,
    pub trades: Vec<ClosedTrade>,
    pub equity_curve: Vec<(DateTime<Utc>, f64)>,
    pub final_equity: f64,
}

pub struct Backtester {
    config: TradingConfig,
    settings: BacktestSettings,
    analyzer: Box<dyn SignalAnalyzer>,
}

impl Backtester {
    pub fn new(
        config: TradingConfig,
        settings: BacktestSettings,
        analyzer: Box<dyn SignalAnalyzer>,
    ) -> Self {
        Backtester {
            config,
            settings,
            analyzer,
        }
    }

    /// Replay one symbol's history through the decision pipeline
    pub fn run(&self, symbol: &Symbol, candles: &[Candle]) -> BacktestResult {
        if candles.len() <= WARMUP_BARS {
            info!(
                symbol = %symbol,
                bars = candles.len(),
                "not enough history to backtest"
            );
            return BacktestResult::default();
        }

        let params = AnalyzerParams::default();
        let timeframe = self.config.primary_timeframe().to_string();

        let mut equity = self.settings.initial_capital;
        let mut position: Option<OpenPosition> = None;
        let mut pending: Option<PendingEntry> = None;
        let mut trades: Vec<ClosedTrade> = Vec::new();
        let mut equity_curve: Vec<(DateTime<Utc>, f64)> = Vec::new();

        for i in WARMUP_BARS..candles.len() {
            let bar = &candles[i];

            // Pending entry from the previous bar fills at this bar's open
            if position.is_none() {
                if let Some(entry) = pending.take() {
                    // Slippage moves the fill against the trader
                    let fill =
                        bar.open * (1.0 + entry.direction.sign() * self.settings.slippage);
                    match calculate_position_size(
                        equity,
                        fill,
                        entry.stop_loss,
                        self.config.leverage,
                        &SizingParams::new(
                            self.config.risk_per_trade_pct,
                            self.config.max_position_pct,
                        ),
                    ) {
                        Ok(sizing) => {
                            equity -= sizing.notional_value * self.settings.fee_rate;
                            position = Some(OpenPosition {
                                symbol: symbol.clone(),
                                direction: entry.direction,
                                entry_price: fill,
                                size: sizing.size,
                                take_profit: entry.take_profit,
                                stop_loss: entry.stop_loss,
                                opened_at: bar.datetime,
                            });
                        }
                        Err(e) => debug!(symbol = %symbol, "entry skipped: {}", e),
                    }
                }
            }

            // Intra-bar exit check; when both levels fall inside the bar's
            // range the stop fills first (conservative)
            if let Some(pos) = &position {
                let exit = match pos.direction {
                    Direction::Long if bar.low <= pos.stop_loss => {
                        Some((pos.stop_loss, "stop_loss"))
                    }
                    Direction::Long if bar.high >= pos.take_profit => {
                        Some((pos.take_profit, "take_profit"))
                    }
                    Direction::Short if bar.high >= pos.stop_loss => {
                        Some((pos.stop_loss, "stop_loss"))
                    }
                    Direction::Short if bar.low <= pos.take_profit => {
                        Some((pos.take_profit, "take_profit"))
                    }
                    _ => None,
                };

                if let Some((exit_price, reason)) = exit {
                    if let Some(pos) = position.take() {
                        equity = self.close_position(
                            &mut trades,
                            pos,
                            exit_price,
                            bar.datetime,
                            reason,
                            equity,
                        );
                    }
                }
            }

            // Flat and nothing queued: look for a new signal
            if position.is_none() && pending.is_none() {
                let start = (i + 1).saturating_sub(MAX_LOOKBACK);
                let window = &candles[start..=i];
                let result = self.analyzer.analyze(window, &params, &timeframe);

                if let Some(direction) = result.action.direction() {
                    let qualifies = result.score >= self.config.min_score
                        && result.win_probability >= self.config.min_win_probability
                        && result.confluence >= self.config.min_confluence
                        && !self.rsi_blocked(direction, result.indicators.rsi);

                    if qualifies {
                        let levels = tpsl::calculate(&TpslInputs {
                            entry_price: bar.close,
                            direction,
                            mode: self.config.tpsl_mode,
                            default_tp_pct: self.config.default_tp_pct,
                            default_sl_pct: self.config.default_sl_pct,
                            atr_sl_multiplier: self.config.atr_sl_multiplier,
                            atr_tp_multiplier: self.config.atr_tp_multiplier,
                            min_risk_reward: self.config.min_risk_reward,
                            score: result.score,
                            indicators: &result.indicators,
                            levels: &result.levels,
                        });
                        pending = Some(PendingEntry {
                            direction,
                            stop_loss: levels.stop_loss,
                            take_profit: levels.take_profit,
                        });
                    }
                }
            }

            // Mark to market
            let marked = match &position {
                Some(pos) => equity + pos.unrealized_pnl(bar.close),
                None => equity,
            };
            equity_curve.push((bar.datetime, marked));

            if equity <= 0.0 {
                info!(symbol = %symbol, bar = i, "equity exhausted, stopping replay");
                break;
            }
        }

        // Force-close anything still open at the end of the data
        if let Some(pos) = position.take() {
            if let Some(last) = candles.last() {
                equity = self.close_position(
                    &mut trades,
                    pos,
                    last.close,
                    last.datetime,
                    "end_of_data",
                    equity,
                );
                if let Some(point) = equity_curve.last_mut() {
                    point.1 = equity;
                }
            }
        }

        let metrics = calculate_metrics(&trades, &equity_curve, self.settings.initial_capital);
        info!(
            symbol = %symbol,
            trades = trades.len(),
            total_return = metrics.total_return,
            win_rate = metrics.win_rate,
            "backtest complete"
        );

        BacktestResult {
            metrics,
            trades,
            equity_curve,
            final_equity: equity,
        }
    }

    fn rsi_blocked(&self, direction: Direction, rsi: Option<f64>) -> bool {
        if !self.config.rsi_filter_enabled {
            return false;
        }
        match (direction, rsi) {
            (Direction::Long, Some(rsi)) => rsi >= self.config.rsi_overbought,
            (Direction::Short, Some(rsi)) => rsi <= self.config.rsi_oversold,
            _ => false,
        }
    }

    fn close_position(
        &self,
        trades: &mut Vec<ClosedTrade>,
        pos: OpenPosition,
        exit_price: f64,
        closed_at: DateTime<Utc>,
        reason: &str,
        equity: f64,
    ) -> f64 {
        let gross = (exit_price - pos.entry_price) * pos.size * pos.direction.sign();
        let exit_fee = exit_price * pos.size * self.settings.fee_rate;
        let pnl = gross - exit_fee;

        trades.push(ClosedTrade {
            symbol: pos.symbol,
            direction: pos.direction,
            entry_price: pos.entry_price,
            exit_price,
            size: pos.size,
            pnl,
            opened_at: pos.opened_at,
            closed_at,
            reason: reason.to_string(),
        });

        equity + pnl
    }
}

/// Aggregate trade and equity-curve statistics
pub fn calculate_metrics(
    trades: &[ClosedTrade],
    equity_curve: &[(DateTime<Utc>, f64)],
    initial_capital: f64,
) -> PerformanceMetrics {
    if trades.is_empty() || equity_curve.is_empty() {
        return PerformanceMetrics::default();
    }

    let final_equity = equity_curve
        .last()
        .map(|(_, e)| *e)
        .unwrap_or(initial_capital);
    let total_return = (final_equity - initial_capital) / initial_capital * 100.0;

    let mut peak = f64::MIN;
    let mut max_drawdown: f64 = 0.0;
    for (_, e) in equity_curve {
        if *e > peak {
            peak = *e;
        }
        if peak > 0.0 {
            max_drawdown = max_drawdown.max((peak - e) / peak * 100.0);
        }
    }

    let wins: Vec<f64> = trades.iter().filter(|t| t.pnl > 0.0).map(|t| t.pnl).collect();
    let losses: Vec<f64> = trades.iter().filter(|t| t.pnl <= 0.0).map(|t| t.pnl).collect();

    let gross_profit: f64 = wins.iter().sum();
    let gross_loss: f64 = losses.iter().map(|p| p.abs()).sum();
    let profit_factor = if gross_loss > 0.0 {
        gross_profit / gross_loss
    } else if gross_profit > 0.0 {
        f64::INFINITY
    } else {
        0.0
    };

    let avg = |v: &[f64]| {
        if v.is_empty() {
            0.0
        } else {
            v.iter().sum::<f64>() / v.len() as f64
        }
    };

    PerformanceMetrics {
        total_return,
        max_drawdown,
        win_rate: wins.len() as f64 / trades.len() as f64 * 100.0,
        profit_factor,
        total_trades: trades.len(),
        winning_trades: wins.len(),
        losing_trades: losses.len(),
        avg_win: avg(&wins),
        avg_loss: avg(&losses),
        largest_win: wins.iter().cloned().fold(0.0, f64::max),
        largest_loss: losses.iter().cloned().fold(0.0, f64::min),
    }
}
