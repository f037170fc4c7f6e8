//! Risk management
//!
//! Position sizing, the pre-trade gate, and persisted daily limits.
//! One `RiskManager` instance per user; daily state is a small JSON file
//! written with an atomic overwrite so a crash cannot leave a torn file.
//!
//! # Leverage semantics
//!
//! Sizing is risk-preserving under leverage:
//!
//! ```text
//! risk_amount    = equity * risk_per_trade%
//! position_value = risk_amount / stop_distance%
//! margin         = position_value / leverage
//! ```
//!
//! The dollar loss at the stop equals `risk_amount` for any leverage;
//! leverage changes capital efficiency, never risk.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::{BotError, Result};
use crate::types::PositionSizing;

/// Exchange-imposed minimum order notional in USD
pub const DEFAULT_MIN_NOTIONAL_USD: f64 = 10.0;

/// Daily trading limits. A zero value disables that check.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskLimits {
    pub max_daily_trades: u32,
    /// Daily loss as a percentage of the day's starting balance
    pub daily_loss_limit_pct: f64,
    /// Drawdown from the tracked peak balance
    pub max_drawdown_pct: f64,
    pub max_consecutive_losses: u32,
    /// Minimum acceptable risk/reward ratio when one is supplied
    pub min_risk_reward: f64,
}

impl Default for RiskLimits {
    fn default() -> Self {
        RiskLimits {
            max_daily_trades: 10,
            daily_loss_limit_pct: 5.0,
            max_drawdown_pct: 15.0,
            max_consecutive_losses: 3,
            min_risk_reward: 1.0,
        }
    }
}

/// Per-day risk state, persisted across process restarts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyRiskState {
    pub date: NaiveDate,
    pub trades_count: u32,
    pub total_pnl: f64,
    pub wins: u32,
    pub losses: u32,
    pub consecutive_losses: u32,
    pub peak_balance: f64,
    pub start_balance: f64,
    pub is_stopped: bool,
    pub stop_reason: Option<String>,
}

impl DailyRiskState {
    fn fresh(date: NaiveDate, balance: f64) -> Self {
        DailyRiskState {
            date,
            trades_count: 0,
            total_pnl: 0.0,
            wins: 0,
            losses: 0,
            consecutive_losses: 0,
            peak_balance: balance,
            start_balance: balance,
            is_stopped: false,
            stop_reason: None,
        }
    }
}

/// One named gate check, reported whether it passed or not
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskCheck {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

impl RiskCheck {
    fn new(name: &str, passed: bool, detail: impl Into<String>) -> Self {
        RiskCheck {
            name: name.to_string(),
            passed,
            detail: detail.into(),
        }
    }
}

/// Gate verdict: the full diagnostic list plus a copy of the daily stats.
///
/// Every check is evaluated even after one fails; callers need the
/// complete picture, not the first failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskDecision {
    pub allowed: bool,
    pub checks: Vec<RiskCheck>,
    pub daily_stats: DailyRiskState,
}

/// Optional attributes of the trade being gated
#[derive(Debug, Clone, Copy, Default)]
pub struct TradeParams {
    pub risk_reward: Option<f64>,
}

/// Sizing knobs taken from the user's live trading config
#[derive(Debug, Clone, Copy)]
pub struct SizingParams {
    pub risk_per_trade_pct: f64,
    pub max_position_pct: f64,
    pub min_notional_usd: f64,
}

impl SizingParams {
    pub fn new(risk_per_trade_pct: f64, max_position_pct: f64) -> Self {
        SizingParams {
            risk_per_trade_pct,
            max_position_pct,
            min_notional_usd: DEFAULT_MIN_NOTIONAL_USD,
        }
    }
}

/// Compute position size from equity, stop distance, and leverage.
///
/// Clamp order: the risk-implied notional is first capped at the
/// max-position percentage of equity, then raised to the exchange minimum
/// notional. The minimum dominates when the two conflict.
pub fn calculate_position_size(
    equity: f64,
    entry_price: f64,
    stop_price: f64,
    leverage: f64,
    params: &SizingParams,
) -> Result<PositionSizing> {
    if equity <= 0.0 {
        return Err(BotError::Execution(format!(
            "cannot size position with non-positive equity {:.2}",
            equity
        )));
    }
    if entry_price <= 0.0 || leverage <= 0.0 {
        return Err(BotError::Execution(
            "entry price and leverage must be positive".to_string(),
        ));
    }

    let stop_distance = (entry_price - stop_price).abs() / entry_price;
    if stop_distance == 0.0 {
        return Err(BotError::Execution(
            "stop price equals entry price".to_string(),
        ));
    }

    let risk_amount = equity * params.risk_per_trade_pct / 100.0;
    let mut position_value = risk_amount / stop_distance;

    let max_value = equity * params.max_position_pct / 100.0;
    if position_value > max_value {
        warn!(
            position_value,
            max_value, "risk-implied notional exceeds max position cap, reducing"
        );
        position_value = max_value;
    }

    if position_value < params.min_notional_usd {
        warn!(
            position_value,
            min_notional = params.min_notional_usd,
            "notional below exchange minimum, raising"
        );
        position_value = params.min_notional_usd;
    }

    Ok(PositionSizing {
        size: position_value / entry_price,
        notional_value: position_value,
        margin_required: position_value / leverage,
        // Recomputed after clamping so it reflects the actual exposure
        risk_amount: position_value * stop_distance,
    })
}

/// Per-user risk gate with persisted daily state
#[derive(Debug)]
pub struct RiskManager {
    limits: RiskLimits,
    state: DailyRiskState,
    state_path: Option<PathBuf>,
}

impl RiskManager {
    /// In-memory manager (backtests, tests)
    pub fn new(limits: RiskLimits) -> Self {
        RiskManager {
            limits,
            state: DailyRiskState::fresh(Utc::now().date_naive(), 0.0),
            state_path: None,
        }
    }

    /// Manager persisting state under `state_dir`, keyed by user.
    ///
    /// Reloads an existing state file so a stopped bot stays stopped
    /// across process restarts.
    pub fn with_persistence(
        limits: RiskLimits,
        state_dir: impl AsRef<Path>,
        user_id: &str,
    ) -> Result<Self> {
        let dir = state_dir.as_ref();
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("risk_{}.json", user_id));

        let state = if path.exists() {
            let contents = fs::read_to_string(&path)?;
            serde_json::from_str(&contents)?
        } else {
            DailyRiskState::fresh(Utc::now().date_naive(), 0.0)
        };

        Ok(RiskManager {
            limits,
            state,
            state_path: Some(path),
        })
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    pub fn daily_stats(&self) -> &DailyRiskState {
        &self.state
    }

    pub fn is_stopped(&self) -> bool {
        self.state.is_stopped
    }

    /// Evaluate the full gate. Updates peak-balance tracking and persists
    /// on every call.
    pub fn can_trade(&mut self, account_balance: f64, params: &TradeParams) -> RiskDecision {
        self.roll_date_if_needed(account_balance);

        if self.state.start_balance == 0.0 && account_balance > 0.0 {
            self.state.start_balance = account_balance;
        }
        if account_balance > self.state.peak_balance {
            self.state.peak_balance = account_balance;
        }

        let mut checks = Vec::with_capacity(6);

        checks.push(RiskCheck::new(
            "bot_stopped",
            !self.state.is_stopped,
            self.state
                .stop_reason
                .clone()
                .unwrap_or_else(|| "not stopped".to_string()),
        ));

        // Daily trade count
        let limit = self.limits.max_daily_trades;
        let passed = limit == 0 || self.state.trades_count < limit;
        checks.push(RiskCheck::new(
            "daily_trades",
            passed,
            format!("{}/{}", self.state.trades_count, limit),
        ));

        // Daily loss
        let loss_pct = if self.state.total_pnl < 0.0 && self.state.start_balance > 0.0 {
            -self.state.total_pnl / self.state.start_balance * 100.0
        } else {
            0.0
        };
        let limit = self.limits.daily_loss_limit_pct;
        let passed = limit == 0.0 || loss_pct < limit;
        if !passed && !self.state.is_stopped {
            self.stop_internal(format!(
                "daily loss {:.2}% breached limit {:.2}%",
                loss_pct, limit
            ));
        }
        checks.push(RiskCheck::new(
            "daily_loss",
            passed,
            format!("{:.2}% of {:.2}% limit", loss_pct, limit),
        ));

        // Drawdown from peak
        let drawdown_pct = if self.state.peak_balance > 0.0 {
            (self.state.peak_balance - account_balance) / self.state.peak_balance * 100.0
        } else {
            0.0
        };
        let limit = self.limits.max_drawdown_pct;
        let passed = limit == 0.0 || drawdown_pct < limit;
        if !passed && !self.state.is_stopped {
            self.stop_internal(format!(
                "drawdown {:.2}% breached limit {:.2}%",
                drawdown_pct, limit
            ));
        }
        checks.push(RiskCheck::new(
            "drawdown",
            passed,
            format!("{:.2}% of {:.2}% limit", drawdown_pct, limit),
        ));

        // Consecutive losses
        let limit = self.limits.max_consecutive_losses;
        let passed = limit == 0 || self.state.consecutive_losses < limit;
        if !passed && !self.state.is_stopped {
            self.stop_internal(format!(
                "{} consecutive losses reached limit {}",
                self.state.consecutive_losses, limit
            ));
        }
        checks.push(RiskCheck::new(
            "consecutive_losses",
            passed,
            format!("{}/{}", self.state.consecutive_losses, limit),
        ));

        // Risk/reward, only when supplied
        if let Some(rr) = params.risk_reward {
            let limit = self.limits.min_risk_reward;
            let passed = limit == 0.0 || rr >= limit;
            checks.push(RiskCheck::new(
                "risk_reward",
                passed,
                format!("{:.2} vs minimum {:.2}", rr, limit),
            ));
        }

        // A breach above may have stopped the bot; the stop itself also
        // forbids this trade.
        let allowed = !self.state.is_stopped && checks.iter().all(|c| c.passed);

        self.persist();

        RiskDecision {
            allowed,
            checks,
            daily_stats: self.state.clone(),
        }
    }

    /// Record a completed trade outcome and re-evaluate stop conditions
    pub fn record_trade(&mut self, pnl: f64, is_win: bool) {
        self.state.trades_count += 1;
        self.state.total_pnl += pnl;

        if is_win {
            self.state.wins += 1;
            self.state.consecutive_losses = 0;
        } else {
            self.state.losses += 1;
            self.state.consecutive_losses += 1;

            let limit = self.limits.max_consecutive_losses;
            if limit > 0 && self.state.consecutive_losses >= limit && !self.state.is_stopped {
                self.stop_internal(format!(
                    "{} consecutive losses reached limit {}",
                    self.state.consecutive_losses, limit
                ));
            }
        }

        self.persist();
    }

    /// Sticky halt: rejects every trade until `restart_bot`
    pub fn stop_bot(&mut self, reason: impl Into<String>) {
        self.stop_internal(reason.into());
        self.persist();
    }

    /// Explicit operator clear of a halt. Also resets the loss streak so
    /// the gate doesn't re-trip on the next call.
    pub fn restart_bot(&mut self) {
        info!("risk manager restarted by operator");
        self.state.is_stopped = false;
        self.state.stop_reason = None;
        self.state.consecutive_losses = 0;
        self.persist();
    }

    /// Reinitialize the daily window at `new_balance`
    pub fn reset_daily_stats(&mut self, new_balance: f64) {
        self.state = DailyRiskState::fresh(Utc::now().date_naive(), new_balance);
        self.persist();
    }

    fn stop_internal(&mut self, reason: String) {
        warn!(reason = %reason, "risk manager stopping bot");
        self.state.is_stopped = true;
        self.state.stop_reason = Some(reason);
    }

    fn roll_date_if_needed(&mut self, balance: f64) {
        let today = Utc::now().date_naive();
        if self.state.date != today {
            info!(from = %self.state.date, to = %today, "daily risk window rollover");
            // A sticky stop survives the rollover; only limits reset
            let was_stopped = self.state.is_stopped;
            let reason = self.state.stop_reason.clone();
            self.state = DailyRiskState::fresh(today, balance);
            self.state.is_stopped = was_stopped;
            self.state.stop_reason = reason;
        }
    }

    /// Atomic overwrite: write a temp file, then rename over the target
    fn persist(&self) {
        let Some(path) = &self.state_path else {
            return;
        };

        let result = (|| -> Result<()> {
            let json = serde_json::to_string_pretty(&self.state)?;
            let tmp = path.with_extension("json.tmp");
            fs::write(&tmp, json)?;
            fs::rename(&tmp, path)?;
            Ok(())
        })();

        if let Err(e) = result {
            warn!(error = %e, path = %path.display(), "failed to persist risk state");
        }
    }
}
