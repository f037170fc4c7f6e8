//! Per-user bot engine
//!
//! One `BotInstance` owns one user's analysis loop: every interval it
//! fetches candles for the configured symbols, scores them, filters the
//! results, and (in auto mode) sizes and submits orders for the best
//! opportunities. The loop is driven by a spawned tokio task; a
//! tick-in-progress flag guarantees ticks never overlap even when one
//! runs longer than the interval.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{ConfigPatch, TradingConfig, TradingMode};
use crate::error::Result;
use crate::events::{BotEvent, LogBuffer, LogEntry, LogLevel, TradeEvent, LOG_BUFFER_CAPACITY};
use crate::exchange::ExchangeClient;
use crate::risk::{
    calculate_position_size, DailyRiskState, RiskManager, SizingParams, TradeParams,
};
use crate::signal::{AnalyzerParams, SignalAnalyzer};
use crate::tpsl::{self, TpslInputs};
use crate::types::{Direction, ExchangePosition, Opportunity, OrderRequest, Symbol};

/// Candle window requested per symbol and timeframe
const CANDLE_FETCH_LIMIT: usize = 200;

/// Pairs with less history than this are skipped rather than analyzed on
/// a half-warmed indicator set
const MIN_CANDLES_FOR_ANALYSIS: usize = 60;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Trade-frequency state: cooldowns, rolling-window caps, and the
/// loss-streak pause.
///
/// `check` only prunes expired timestamps, so calling it twice in a row
/// gives the same answer; only `record` consumes capacity.
#[derive(Debug, Default)]
struct CooldownTracker {
    last_by_symbol: HashMap<String, DateTime<Utc>>,
    last_global: Option<DateTime<Utc>>,
    /// Trade timestamps within the last 24 hours, oldest first
    recent: VecDeque<DateTime<Utc>>,
    paused_until: Option<DateTime<Utc>>,
}

impl CooldownTracker {
    /// Returns the blocking reason, or None when a trade is allowed now
    fn check(
        &mut self,
        symbol: &str,
        now: DateTime<Utc>,
        config: &TradingConfig,
    ) -> Option<String> {
        self.prune(now);

        if let Some(until) = self.paused_until {
            if now < until {
                return Some(format!(
                    "paused after loss streak, resumes in {}s",
                    (until - now).num_seconds()
                ));
            }
        }

        if config.symbol_cooldown_secs > 0 {
            if let Some(last) = self.last_by_symbol.get(symbol) {
                let elapsed = (now - *last).num_seconds();
                if elapsed < config.symbol_cooldown_secs as i64 {
                    return Some(format!(
                        "{} cooldown, {}s of {}s elapsed",
                        symbol, elapsed, config.symbol_cooldown_secs
                    ));
                }
            }
        }

        if config.global_cooldown_secs > 0 {
            if let Some(last) = self.last_global {
                let elapsed = (now - last).num_seconds();
                if elapsed < config.global_cooldown_secs as i64 {
                    return Some(format!(
                        "global cooldown, {}s of {}s elapsed",
                        elapsed, config.global_cooldown_secs
                    ));
                }
            }
        }

        if config.max_trades_per_hour > 0 {
            let hour_ago = now - Duration::hours(1);
            let in_last_hour = self.recent.iter().filter(|t| **t > hour_ago).count();
            if in_last_hour >= config.max_trades_per_hour as usize {
                return Some(format!(
                    "hourly cap reached ({}/h)",
                    config.max_trades_per_hour
                ));
            }
        }

        if config.max_trades_per_day > 0 && self.recent.len() >= config.max_trades_per_day as usize
        {
            return Some(format!(
                "daily cap reached ({}/day)",
                config.max_trades_per_day
            ));
        }

        None
    }

    fn record(&mut self, symbol: &str, now: DateTime<Utc>) {
        self.last_by_symbol.insert(symbol.to_string(), now);
        self.last_global = Some(now);
        self.recent.push_back(now);
    }

    fn pause_for(&mut self, secs: u64, now: DateTime<Utc>) {
        self.paused_until = Some(now + Duration::seconds(secs as i64));
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let day_ago = now - Duration::hours(24);
        while self.recent.front().is_some_and(|t| *t <= day_ago) {
            self.recent.pop_front();
        }
    }
}

/// Snapshot of a bot's runtime state
#[derive(Debug, Clone, Serialize)]
pub struct BotStatus {
    pub user_id: String,
    pub running: bool,
    pub mode: TradingMode,
    pub symbols: Vec<String>,
    pub primary_timeframe: String,
    pub tick_count: u64,
    pub last_analysis_at: Option<DateTime<Utc>>,
    pub last_signal: Option<Opportunity>,
    pub opportunities: Vec<Opportunity>,
    pub active_positions: Vec<ExchangePosition>,
    pub daily_stats: DailyRiskState,
}

/// Outcome of the most recent tick. Replaced wholesale each tick,
/// survives stop/start, gone with the instance on destroy.
#[derive(Debug, Clone, Default)]
struct TickSnapshot {
    last_analysis_at: Option<DateTime<Utc>>,
    last_signal: Option<Opportunity>,
    opportunities: Vec<Opportunity>,
    active_positions: Vec<ExchangePosition>,
}

/// Resets the tick-in-progress flag when a tick exits by any path
struct TickGuard<'a>(&'a AtomicBool);

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct BotInstance {
    user_id: String,
    config: RwLock<TradingConfig>,
    analyzer: Arc<dyn SignalAnalyzer>,
    exchange: Arc<dyn ExchangeClient>,
    risk: Mutex<RiskManager>,
    cooldowns: Mutex<CooldownTracker>,
    last_tick: Mutex<TickSnapshot>,
    events: broadcast::Sender<BotEvent>,
    logs: Mutex<LogBuffer>,
    running: AtomicBool,
    tick_in_progress: AtomicBool,
    tick_count: AtomicU64,
    stop_signal: Notify,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl BotInstance {
    /// Build a bot. The config is validated and its timeframe preset
    /// applied; an invalid config is rejected here, never mid-tick.
    pub fn new(
        user_id: impl Into<String>,
        mut config: TradingConfig,
        analyzer: Arc<dyn SignalAnalyzer>,
        exchange: Arc<dyn ExchangeClient>,
        risk: RiskManager,
    ) -> Result<Arc<Self>> {
        config
            .validate()
            .map_err(crate::error::BotError::Config)?;
        config.apply_timeframe_preset();

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Arc::new(BotInstance {
            user_id: user_id.into(),
            config: RwLock::new(config),
            analyzer,
            exchange,
            risk: Mutex::new(risk),
            cooldowns: Mutex::new(CooldownTracker::default()),
            last_tick: Mutex::new(TickSnapshot::default()),
            events,
            logs: Mutex::new(LogBuffer::new(LOG_BUFFER_CAPACITY)),
            running: AtomicBool::new(false),
            tick_in_progress: AtomicBool::new(false),
            tick_count: AtomicU64::new(0),
            stop_signal: Notify::new(),
            task: Mutex::new(None),
        }))
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BotEvent> {
        self.events.subscribe()
    }

    /// Start the analysis loop. The first tick fires immediately.
    ///
    /// Returns false when the bot is already running; the loop is left
    /// untouched.
    pub async fn start(self: &Arc<Self>) -> bool {
        if self.running.swap(true, Ordering::SeqCst) {
            self.log(LogLevel::Warn, "start requested but bot is already running")
                .await;
            return false;
        }

        self.log(LogLevel::Info, "bot started").await;
        let bot = Arc::clone(self);
        let handle = tokio::spawn(async move {
            while bot.running.load(Ordering::SeqCst) {
                bot.run_once().await;

                // Interval is re-read every cycle so config patches take
                // effect without a restart
                let interval_ms = bot.config.read().await.analysis_interval_ms;
                tokio::select! {
                    _ = tokio::time::sleep(std::time::Duration::from_millis(interval_ms)) => {}
                    _ = bot.stop_signal.notified() => break,
                }
            }
        });
        *self.task.lock().await = Some(handle);
        true
    }

    /// Stop the loop. An in-flight tick finishes; no new tick starts.
    ///
    /// Returns false when the bot was not running.
    pub async fn stop(&self) -> bool {
        if !self.running.swap(false, Ordering::SeqCst) {
            return false;
        }
        // notify_one stores a permit, so a stop racing an in-flight tick
        // still wakes the next wait instead of sleeping a full interval
        self.stop_signal.notify_one();
        if let Some(handle) = self.task.lock().await.take() {
            let _ = handle.await;
        }
        self.log(LogLevel::Info, "bot stopped").await;
        true
    }

    /// Stop and release the bot. The log buffer is cleared; risk state
    /// stays on disk so a later bot for the same user resumes any sticky
    /// halt.
    pub async fn destroy(&self) {
        self.stop().await;
        self.logs.lock().await.clear();
        info!(user = %self.user_id, "bot destroyed");
    }

    /// Apply a partial config update to the live bot.
    ///
    /// The patch is validated against a merged copy first, so a bad patch
    /// leaves the running config untouched.
    pub async fn update_config(&self, patch: ConfigPatch) -> Result<()> {
        let mut config = self.config.write().await;

        let mut candidate = config.clone();
        let timeframes_changed = patch.apply(&mut candidate);
        candidate
            .validate()
            .map_err(crate::error::BotError::Config)?;
        if timeframes_changed {
            candidate.apply_timeframe_preset();
        }

        *config = candidate;
        drop(config);

        self.log(LogLevel::Info, "configuration updated").await;
        Ok(())
    }

    pub async fn config(&self) -> TradingConfig {
        self.config.read().await.clone()
    }

    pub async fn status(&self) -> BotStatus {
        let config = self.config.read().await;
        let risk = self.risk.lock().await;
        let last = self.last_tick.lock().await;
        BotStatus {
            user_id: self.user_id.clone(),
            running: self.is_running(),
            mode: config.mode,
            symbols: config.symbols.clone(),
            primary_timeframe: config.primary_timeframe().to_string(),
            tick_count: self.tick_count.load(Ordering::SeqCst),
            last_analysis_at: last.last_analysis_at,
            last_signal: last.last_signal.clone(),
            opportunities: last.opportunities.clone(),
            active_positions: last.active_positions.clone(),
            daily_stats: risk.daily_stats().clone(),
        }
    }

    /// Most recent log entries, newest last
    pub async fn logs(&self, limit: usize) -> Vec<LogEntry> {
        self.logs.lock().await.tail(limit)
    }

    /// Clear a sticky risk halt
    pub async fn restart_risk(&self) {
        self.risk.lock().await.restart_bot();
        self.log(LogLevel::Info, "risk halt cleared by operator").await;
    }

    /// Feed a settled trade outcome back into the risk state. Trips the
    /// loss-streak pause when the consecutive-loss limit is reached.
    pub async fn record_trade_result(&self, pnl: f64, is_win: bool) {
        let (streak, limit) = {
            let mut risk = self.risk.lock().await;
            risk.record_trade(pnl, is_win);
            (
                risk.daily_stats().consecutive_losses,
                risk.limits().max_consecutive_losses,
            )
        };

        let pause_secs = self.config.read().await.loss_streak_pause_secs;
        if !is_win && limit > 0 && streak >= limit && pause_secs > 0 {
            self.cooldowns.lock().await.pause_for(pause_secs, Utc::now());
            self.log(
                LogLevel::Warn,
                format!("{} consecutive losses, pausing for {}s", streak, pause_secs),
            )
            .await;
        }
    }

    /// Run a single analysis tick.
    ///
    /// Skips immediately if the previous tick is still in flight.
    pub async fn run_once(&self) {
        if self.tick_in_progress.swap(true, Ordering::SeqCst) {
            self.log(LogLevel::Warn, "previous tick still running, skipping")
                .await;
            return;
        }
        let _guard = TickGuard(&self.tick_in_progress);

        let tick = self.tick_count.fetch_add(1, Ordering::SeqCst) + 1;
        let config = self.config.read().await.clone();

        // In multi-timeframe mode the primary produces the candidate and
        // the rest only confirm; otherwise every configured timeframe is
        // its own candidate source
        let pair_timeframes: Vec<String> = if config.multi_timeframe_enabled {
            vec![config.primary_timeframe().to_string()]
        } else {
            config.scan_timeframes().to_vec()
        };

        let mut opportunities = Vec::new();
        for symbol_str in &config.symbols {
            let symbol = Symbol::new(symbol_str.clone());
            for timeframe in &pair_timeframes {
                match self.analyze_pair(&symbol, timeframe, &config).await {
                    Ok(Some(opp)) => opportunities.push(opp),
                    Ok(None) => {}
                    Err(e) => {
                        self.log(
                            LogLevel::Warn,
                            format!("analysis failed for {} {}: {}", symbol, timeframe, e),
                        )
                        .await;
                    }
                }
            }
        }

        // Best first; equal scores keep symbol order
        opportunities.sort_by(|a, b| b.score.total_cmp(&a.score));

        for opp in &opportunities {
            self.emit(BotEvent::signal(opp.clone()));
        }
        self.emit(BotEvent::analysis(tick, opportunities.len()));
        {
            let mut last = self.last_tick.lock().await;
            last.last_analysis_at = Some(Utc::now());
            if let Some(best) = opportunities.first() {
                last.last_signal = Some(best.clone());
            }
            last.opportunities = opportunities.clone();
        }
        debug!(
            user = %self.user_id,
            tick,
            opportunities = opportunities.len(),
            "analysis tick complete"
        );

        if config.mode == TradingMode::Manual {
            if !opportunities.is_empty() {
                self.log(
                    LogLevel::Info,
                    format!(
                        "{} opportunit{} surfaced (manual mode, no orders placed)",
                        opportunities.len(),
                        if opportunities.len() == 1 { "y" } else { "ies" }
                    ),
                )
                .await;
            }
            return;
        }

        // Account state is only needed once orders can flow; a signed
        // endpoint outage skips the trade attempt, not the analysis
        let equity = match self.exchange.account_equity().await {
            Ok(e) => e,
            Err(e) => {
                self.log(LogLevel::Error, format!("equity fetch failed: {}", e))
                    .await;
                return;
            }
        };
        let open_positions = match self.exchange.open_positions().await {
            Ok(p) => p,
            Err(e) => {
                self.log(LogLevel::Error, format!("position fetch failed: {}", e))
                    .await;
                return;
            }
        };
        self.last_tick.lock().await.active_positions = open_positions.clone();

        self.execute_opportunities(opportunities, equity, &config, &open_positions)
            .await;
    }

    /// Analyze one (symbol, timeframe) pair, with confirmation
    /// timeframes when multi-timeframe mode is enabled.
    async fn analyze_pair(
        &self,
        symbol: &Symbol,
        timeframe: &str,
        config: &TradingConfig,
    ) -> Result<Option<Opportunity>> {
        let params = AnalyzerParams::default();

        let candles = self
            .exchange
            .fetch_candles(symbol, timeframe, CANDLE_FETCH_LIMIT)
            .await?;
        if candles.len() < MIN_CANDLES_FOR_ANALYSIS {
            self.log(
                LogLevel::Warn,
                format!(
                    "{} {}: {} candles, need {}",
                    symbol,
                    timeframe,
                    candles.len(),
                    MIN_CANDLES_FOR_ANALYSIS
                ),
            )
            .await;
            return Ok(None);
        }

        let result = self.analyzer.analyze(&candles, &params, timeframe);
        let Some(direction) = result.action.direction() else {
            return Ok(None);
        };

        if result.score < config.min_score
            || result.win_probability < config.min_win_probability
            || result.confluence < config.min_confluence
        {
            debug!(
                symbol = %symbol,
                score = result.score,
                win_probability = result.win_probability,
                confluence = result.confluence,
                "signal below thresholds"
            );
            return Ok(None);
        }

        if config.rsi_filter_enabled {
            if let Some(rsi) = result.indicators.rsi {
                let blocked = match direction {
                    Direction::Long => rsi >= config.rsi_overbought,
                    Direction::Short => rsi <= config.rsi_oversold,
                };
                if blocked {
                    self.log(
                        LogLevel::Info,
                        format!("{}: RSI {:.1} blocks {:?} entry", symbol, rsi, direction),
                    )
                    .await;
                    return Ok(None);
                }
            }
        }

        if config.multi_timeframe_enabled {
            // The candidate's own timeframe counts as one confirmation
            let mut confirmations: u32 = 1;
            for tf in config.scan_timeframes() {
                if tf == timeframe {
                    continue;
                }
                let tf_candles = self
                    .exchange
                    .fetch_candles(symbol, tf, CANDLE_FETCH_LIMIT)
                    .await?;
                if tf_candles.len() < MIN_CANDLES_FOR_ANALYSIS {
                    continue;
                }
                let tf_result = self.analyzer.analyze(&tf_candles, &params, tf);
                if tf_result.action == result.action {
                    confirmations += 1;
                }
            }
            if confirmations < config.mtf_min_confirmations {
                self.log(
                    LogLevel::Info,
                    format!(
                        "{}: {}/{} timeframe confirmations, skipping",
                        symbol, confirmations, config.mtf_min_confirmations
                    ),
                )
                .await;
                return Ok(None);
            }
        }

        let price = match candles.last() {
            Some(c) => c.close,
            None => return Ok(None),
        };

        Ok(Some(Opportunity {
            symbol: symbol.clone(),
            timeframe: timeframe.to_string(),
            direction,
            score: result.score,
            price,
            indicators: result.indicators,
            levels: result.levels,
        }))
    }

    async fn execute_opportunities(
        &self,
        opportunities: Vec<Opportunity>,
        equity: f64,
        config: &TradingConfig,
        open_positions: &[ExchangePosition],
    ) {
        let mut held: HashSet<String> = open_positions
            .iter()
            .map(|p| p.symbol.to_string())
            .collect();
        let mut slots = config
            .max_concurrent_trades
            .saturating_sub(open_positions.len());

        for opp in opportunities {
            if slots == 0 {
                debug!(user = %self.user_id, "concurrent trade limit reached");
                break;
            }
            if held.contains(opp.symbol.as_str()) {
                debug!(symbol = %opp.symbol, "position already open, skipping");
                continue;
            }

            if let Some(reason) =
                self.cooldowns
                    .lock()
                    .await
                    .check(opp.symbol.as_str(), Utc::now(), config)
            {
                self.log(LogLevel::Info, format!("{}: {}", opp.symbol, reason))
                    .await;
                continue;
            }

            let tpsl = tpsl::calculate(&TpslInputs {
                entry_price: opp.price,
                direction: opp.direction,
                mode: config.tpsl_mode,
                default_tp_pct: config.default_tp_pct,
                default_sl_pct: config.default_sl_pct,
                atr_sl_multiplier: config.atr_sl_multiplier,
                atr_tp_multiplier: config.atr_tp_multiplier,
                min_risk_reward: config.min_risk_reward,
                score: opp.score,
                indicators: &opp.indicators,
                levels: &opp.levels,
            });

            let decision = self.risk.lock().await.can_trade(
                equity,
                &TradeParams {
                    risk_reward: Some(tpsl.risk_reward),
                },
            );
            if !decision.allowed {
                let failed: Vec<&str> = decision
                    .checks
                    .iter()
                    .filter(|c| !c.passed)
                    .map(|c| c.name.as_str())
                    .collect();
                self.log(
                    LogLevel::Warn,
                    format!("{}: blocked by risk gate ({})", opp.symbol, failed.join(", ")),
                )
                .await;
                if decision.daily_stats.is_stopped {
                    break;
                }
                continue;
            }

            let sizing = match calculate_position_size(
                equity,
                opp.price,
                tpsl.stop_loss,
                config.leverage,
                &SizingParams::new(config.risk_per_trade_pct, config.max_position_pct),
            ) {
                Ok(s) => s,
                Err(e) => {
                    self.log(LogLevel::Warn, format!("{}: sizing failed: {}", opp.symbol, e))
                        .await;
                    continue;
                }
            };

            let order = OrderRequest {
                symbol: opp.symbol.clone(),
                is_buy: opp.direction == Direction::Long,
                size: sizing.size,
                price: None,
                take_profit: tpsl.take_profit,
                stop_loss: tpsl.stop_loss,
                leverage: config.leverage,
            };

            match self.exchange.submit_order(&order).await {
                Ok(receipt) => {
                    self.cooldowns
                        .lock()
                        .await
                        .record(opp.symbol.as_str(), Utc::now());
                    held.insert(opp.symbol.to_string());
                    slots -= 1;

                    info!(
                        user = %self.user_id,
                        symbol = %opp.symbol,
                        direction = ?opp.direction,
                        size = receipt.filled_size,
                        price = receipt.filled_price,
                        tp = tpsl.take_profit,
                        sl = tpsl.stop_loss,
                        "order filled"
                    );
                    self.log(
                        LogLevel::Info,
                        format!(
                            "opened {:?} {} size {:.6} @ {:.2} (TP {:.2} / SL {:.2})",
                            opp.direction,
                            opp.symbol,
                            receipt.filled_size,
                            receipt.filled_price,
                            tpsl.take_profit,
                            tpsl.stop_loss
                        ),
                    )
                    .await;
                    self.emit(BotEvent::trade(TradeEvent {
                        symbol: opp.symbol.clone(),
                        direction: opp.direction,
                        size: receipt.filled_size,
                        entry_price: receipt.filled_price,
                        take_profit: tpsl.take_profit,
                        stop_loss: tpsl.stop_loss,
                        order_id: receipt.order_id,
                    }));
                }
                Err(e) => {
                    self.log(
                        LogLevel::Error,
                        format!("{}: order failed: {}", opp.symbol, e),
                    )
                    .await;
                }
            }
        }
    }

    async fn log(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Info => info!(user = %self.user_id, "{}", message),
            LogLevel::Warn => warn!(user = %self.user_id, "{}", message),
            LogLevel::Error => tracing::error!(user = %self.user_id, "{}", message),
        }
        self.logs.lock().await.push(level, message.clone());
        self.emit(BotEvent::log(level, message));
    }

    fn emit(&self, event: BotEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::PaperExchange;
    use crate::risk::RiskLimits;
    use crate::signal::SignalResult;
    use crate::types::{Candle, IndicatorSnapshot, SignalAction, TechnicalLevels};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn quiet_config() -> TradingConfig {
        TradingConfig {
            symbol_cooldown_secs: 300,
            global_cooldown_secs: 60,
            max_trades_per_hour: 2,
            max_trades_per_day: 3,
            ..TradingConfig::default()
        }
    }

    #[test]
    fn test_cooldown_fresh_tracker_allows() {
        let mut tracker = CooldownTracker::default();
        assert!(tracker.check("BTC", now(), &quiet_config()).is_none());
    }

    #[test]
    fn test_cooldown_check_is_idempotent() {
        let mut tracker = CooldownTracker::default();
        let config = quiet_config();

        // Checking twice without recording does not consume capacity
        assert!(tracker.check("BTC", now(), &config).is_none());
        assert!(tracker.check("BTC", now(), &config).is_none());
    }

    #[test]
    fn test_symbol_cooldown_blocks_then_expires() {
        let mut tracker = CooldownTracker::default();
        let config = quiet_config();
        tracker.record("BTC", now());

        let reason = tracker.check("BTC", now() + Duration::seconds(100), &config);
        assert!(reason.is_some());

        // Other symbols only see the shorter global cooldown
        let reason = tracker.check("ETH", now() + Duration::seconds(100), &config);
        assert!(reason.is_none());

        let reason = tracker.check("BTC", now() + Duration::seconds(301), &config);
        assert!(reason.is_none());
    }

    #[test]
    fn test_global_cooldown_spans_symbols() {
        let mut tracker = CooldownTracker::default();
        let config = quiet_config();
        tracker.record("BTC", now());

        let reason = tracker.check("ETH", now() + Duration::seconds(30), &config);
        assert!(reason.is_some());
        assert!(reason.unwrap().contains("global cooldown"));
    }

    #[test]
    fn test_hourly_cap() {
        let mut tracker = CooldownTracker::default();
        let config = quiet_config();
        tracker.record("BTC", now());
        tracker.record("ETH", now() + Duration::seconds(600));

        // 2 trades within the hour, cap is 2
        let reason = tracker.check("SOL", now() + Duration::seconds(1200), &config);
        assert!(reason.unwrap().contains("hourly cap"));

        // Past the hour window the cap frees up
        let reason = tracker.check("SOL", now() + Duration::hours(2), &config);
        assert!(reason.is_none());
    }

    #[test]
    fn test_daily_cap() {
        let mut tracker = CooldownTracker::default();
        let config = TradingConfig {
            symbol_cooldown_secs: 0,
            global_cooldown_secs: 0,
            max_trades_per_hour: 0,
            max_trades_per_day: 3,
            ..TradingConfig::default()
        };

        for (i, sym) in ["A", "B", "C"].iter().enumerate() {
            tracker.record(sym, now() + Duration::hours(i as i64));
        }

        let reason = tracker.check("D", now() + Duration::hours(4), &config);
        assert!(reason.unwrap().contains("daily cap"));

        // Entries age out of the 24h window
        let reason = tracker.check("D", now() + Duration::hours(26), &config);
        assert!(reason.is_none());
    }

    #[test]
    fn test_loss_streak_pause() {
        let mut tracker = CooldownTracker::default();
        let config = quiet_config();
        tracker.pause_for(900, now());

        let reason = tracker.check("BTC", now() + Duration::seconds(100), &config);
        assert!(reason.unwrap().contains("pause"));

        let reason = tracker.check("BTC", now() + Duration::seconds(901), &config);
        assert!(reason.is_none());
    }

    /// Analyzer returning a canned result regardless of input
    struct FixedAnalyzer {
        action: SignalAction,
        score: f64,
    }

    impl SignalAnalyzer for FixedAnalyzer {
        fn analyze(&self, _: &[Candle], _: &AnalyzerParams, _: &str) -> SignalResult {
            SignalResult {
                action: self.action,
                score: self.score,
                win_probability: 80.0,
                confluence: 5,
                indicators: IndicatorSnapshot {
                    rsi: Some(55.0),
                    ..IndicatorSnapshot::default()
                },
                levels: TechnicalLevels::default(),
            }
        }
    }

    fn make_candles(n: usize, close: f64) -> Vec<Candle> {
        (0..n)
            .map(|i| Candle {
                datetime: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                    + Duration::minutes(15 * i as i64),
                open: close,
                high: close * 1.001,
                low: close * 0.999,
                close,
                volume: 100.0,
            })
            .collect()
    }

    async fn paper_bot(
        action: SignalAction,
        mode: TradingMode,
    ) -> (Arc<BotInstance>, Arc<PaperExchange>) {
        let exchange = Arc::new(PaperExchange::new(10_000.0));
        let symbol = Symbol::new("BTC");
        exchange
            .load_candles(&symbol, "15m", make_candles(100, 50_000.0))
            .await;

        let config = TradingConfig {
            symbols: vec!["BTC".to_string()],
            mode,
            symbol_cooldown_secs: 0,
            global_cooldown_secs: 0,
            ..TradingConfig::default()
        };
        let bot = BotInstance::new(
            "alice",
            config,
            Arc::new(FixedAnalyzer { action, score: 8.0 }),
            exchange.clone(),
            RiskManager::new(RiskLimits::default()),
        )
        .unwrap();
        (bot, exchange)
    }

    #[tokio::test]
    async fn test_auto_mode_tick_places_order() {
        let (bot, exchange) = paper_bot(SignalAction::Long, TradingMode::Auto).await;
        let mut events = bot.subscribe();

        bot.run_once().await;

        let orders = exchange.submitted_orders().await;
        assert_eq!(orders.len(), 1);
        assert!(orders[0].is_buy);
        assert!(orders[0].stop_loss < 50_000.0);
        assert!(orders[0].take_profit > 50_000.0);

        // Signal event precedes the trade event on the stream
        let mut saw_signal = false;
        let mut saw_trade = false;
        while let Ok(event) = events.try_recv() {
            match event {
                BotEvent::Signal { .. } => saw_signal = true,
                BotEvent::Trade { .. } => {
                    assert!(saw_signal);
                    saw_trade = true;
                }
                _ => {}
            }
        }
        assert!(saw_trade);
    }

    #[tokio::test]
    async fn test_manual_mode_surfaces_signal_without_order() {
        let (bot, exchange) = paper_bot(SignalAction::Long, TradingMode::Manual).await;

        bot.run_once().await;

        assert!(exchange.submitted_orders().await.is_empty());
        let logs = bot.logs(10).await;
        assert!(logs.iter().any(|l| l.message.contains("manual mode")));
    }

    #[tokio::test]
    async fn test_neutral_signal_produces_nothing() {
        let (bot, exchange) = paper_bot(SignalAction::Neutral, TradingMode::Auto).await;
        bot.run_once().await;
        assert!(exchange.submitted_orders().await.is_empty());
    }

    #[tokio::test]
    async fn test_existing_position_blocks_reentry() {
        let (bot, exchange) = paper_bot(SignalAction::Long, TradingMode::Auto).await;
        exchange
            .set_positions(vec![crate::types::ExchangePosition {
                symbol: Symbol::new("BTC"),
                size: 0.1,
                direction: Direction::Long,
            }])
            .await;

        bot.run_once().await;
        assert!(exchange.submitted_orders().await.is_empty());
    }

    #[tokio::test]
    async fn test_tick_counter_advances() {
        let (bot, _) = paper_bot(SignalAction::Neutral, TradingMode::Manual).await;
        bot.run_once().await;
        bot.run_once().await;
        assert_eq!(bot.status().await.tick_count, 2);
    }

    #[tokio::test]
    async fn test_update_config_rejects_invalid_patch() {
        let (bot, _) = paper_bot(SignalAction::Neutral, TradingMode::Manual).await;

        let patch = ConfigPatch {
            leverage: Some(-1.0),
            ..ConfigPatch::default()
        };
        assert!(bot.update_config(patch).await.is_err());
        // Live config untouched
        assert_eq!(bot.config().await.leverage, 5.0);
    }

    #[tokio::test]
    async fn test_concurrent_limit_takes_best_scores_first() {
        let exchange = Arc::new(PaperExchange::new(10_000.0));

        /// Scores differ per symbol; the bot must pick the best
        struct PerSymbolAnalyzer;
        impl SignalAnalyzer for PerSymbolAnalyzer {
            fn analyze(&self, candles: &[Candle], _: &AnalyzerParams, _: &str) -> SignalResult {
                // Encode the score in the volume of the last candle
                let score = candles.last().map(|c| c.volume / 10.0).unwrap_or(0.0);
                SignalResult {
                    action: SignalAction::Long,
                    score,
                    win_probability: 80.0,
                    confluence: 5,
                    indicators: IndicatorSnapshot {
                        rsi: Some(55.0),
                        ..IndicatorSnapshot::default()
                    },
                    levels: TechnicalLevels::default(),
                }
            }
        }

        // BTC scores 5, ETH scores 8, SOL scores 3
        for (sym, score) in [("BTC", 5.0), ("ETH", 8.0), ("SOL", 3.0)] {
            let mut candles = make_candles(100, 100.0);
            if let Some(last) = candles.last_mut() {
                last.volume = score * 10.0;
            }
            exchange.load_candles(&Symbol::new(sym), "15m", candles).await;
        }

        let config = TradingConfig {
            symbols: vec!["BTC".to_string(), "ETH".to_string(), "SOL".to_string()],
            mode: TradingMode::Auto,
            max_concurrent_trades: 1,
            symbol_cooldown_secs: 0,
            global_cooldown_secs: 0,
            ..TradingConfig::default()
        };
        let bot = BotInstance::new(
            "bob",
            config,
            Arc::new(PerSymbolAnalyzer),
            exchange.clone(),
            RiskManager::new(RiskLimits::default()),
        )
        .unwrap();

        bot.run_once().await;

        let orders = exchange.submitted_orders().await;
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].symbol.as_str(), "ETH");
    }

    #[tokio::test]
    async fn test_every_configured_timeframe_is_scanned() {
        let exchange = Arc::new(PaperExchange::new(10_000.0));
        let symbol = Symbol::new("BTC");
        exchange
            .load_candles(&symbol, "15m", make_candles(100, 50_000.0))
            .await;
        exchange
            .load_candles(&symbol, "1h", make_candles(100, 50_000.0))
            .await;

        let config = TradingConfig {
            symbols: vec!["BTC".to_string()],
            timeframes: vec!["15m".to_string(), "1h".to_string()],
            mode: TradingMode::Manual,
            ..TradingConfig::default()
        };
        let bot = BotInstance::new(
            "alice",
            config,
            Arc::new(FixedAnalyzer {
                action: SignalAction::Long,
                score: 8.0,
            }),
            exchange,
            RiskManager::new(RiskLimits::default()),
        )
        .unwrap();

        bot.run_once().await;

        let mut timeframes: Vec<String> = bot
            .status()
            .await
            .opportunities
            .iter()
            .map(|o| o.timeframe.clone())
            .collect();
        timeframes.sort();
        assert_eq!(timeframes, vec!["15m".to_string(), "1h".to_string()]);
    }

    /// Candles load fine while the signed account endpoints are down
    struct DownAccountExchange(Arc<PaperExchange>);

    #[async_trait::async_trait]
    impl ExchangeClient for DownAccountExchange {
        async fn fetch_candles(
            &self,
            symbol: &Symbol,
            timeframe: &str,
            limit: usize,
        ) -> Result<Vec<Candle>> {
            self.0.fetch_candles(symbol, timeframe, limit).await
        }

        async fn account_equity(&self) -> Result<f64> {
            Err(crate::error::BotError::Execution(
                "account endpoint down".to_string(),
            ))
        }

        async fn open_positions(&self) -> Result<Vec<ExchangePosition>> {
            Err(crate::error::BotError::Execution(
                "account endpoint down".to_string(),
            ))
        }

        async fn submit_order(&self, order: &OrderRequest) -> Result<crate::types::OrderReceipt> {
            self.0.submit_order(order).await
        }
    }

    #[tokio::test]
    async fn test_analysis_survives_account_endpoint_outage() {
        let paper = Arc::new(PaperExchange::new(10_000.0));
        paper
            .load_candles(&Symbol::new("BTC"), "15m", make_candles(100, 50_000.0))
            .await;

        let config = TradingConfig {
            symbols: vec!["BTC".to_string()],
            mode: TradingMode::Auto,
            ..TradingConfig::default()
        };
        let bot = BotInstance::new(
            "alice",
            config,
            Arc::new(FixedAnalyzer {
                action: SignalAction::Long,
                score: 8.0,
            }),
            Arc::new(DownAccountExchange(paper)),
            RiskManager::new(RiskLimits::default()),
        )
        .unwrap();
        let mut events = bot.subscribe();

        bot.run_once().await;

        // Signals and the analysis summary still go out; only the trade
        // attempt is lost
        let mut saw_signal = false;
        let mut saw_analysis = false;
        while let Ok(event) = events.try_recv() {
            match event {
                BotEvent::Signal { .. } => saw_signal = true,
                BotEvent::Analysis { .. } => saw_analysis = true,
                BotEvent::Trade { .. } => panic!("no order should fill without equity"),
                _ => {}
            }
        }
        assert!(saw_signal);
        assert!(saw_analysis);
        assert_eq!(bot.status().await.opportunities.len(), 1);
    }

    #[tokio::test]
    async fn test_start_and_stop_report_noops() {
        let (bot, _) = paper_bot(SignalAction::Neutral, TradingMode::Manual).await;

        assert!(!bot.stop().await);
        assert!(bot.start().await);
        assert!(!bot.start().await);
        assert!(bot.stop().await);
        assert!(!bot.stop().await);
    }

    #[tokio::test]
    async fn test_destroy_clears_log_buffer() {
        let (bot, _) = paper_bot(SignalAction::Long, TradingMode::Manual).await;
        bot.run_once().await;
        assert!(!bot.logs(10).await.is_empty());

        bot.destroy().await;
        assert!(bot.logs(10).await.is_empty());
    }
}
