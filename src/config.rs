//! Configuration management
//!
//! Typed per-user trading configuration with layered merge precedence
//! (defaults < stored profile < runtime patch) and one-shot boundary
//! validation, plus the engine-level JSON config file with environment
//! variable support for credentials.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::risk::RiskLimits;

/// Execution mode for a bot instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    /// Opportunities are executed automatically
    Auto,
    /// Opportunities are surfaced for a human decision; no orders placed
    Manual,
}

/// Take-profit / stop-loss calculation mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TpslMode {
    /// Fixed percentage offsets from entry
    Percent,
    /// ATR multiples, TP scaled by signal strength
    Atr,
    /// Cloud/baseline levels with RSI and volatility adjustment
    Ichimoku,
    /// Raw cloud/baseline levels, minimum risk/reward for the target
    IchimokuPure,
    /// Level-based stop with a score-scaled reward multiplier
    Auto,
}

/// Per-user trading configuration.
///
/// All percentage fields are expressed in percent (2.0 = 2%), matching the
/// JSON profiles operators edit by hand.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TradingConfig {
    pub symbols: Vec<String>,
    /// Ordered; the first entry is the primary timeframe
    pub timeframes: Vec<String>,
    pub leverage: f64,
    pub max_concurrent_trades: usize,
    pub mode: TradingMode,
    pub analysis_interval_ms: u64,
    /// Minimum signal score, 0-10 scale
    pub min_score: f64,
    pub min_win_probability: f64,
    /// Minimum count of agreeing indicators
    pub min_confluence: u32,
    pub tpsl_mode: TpslMode,
    pub default_tp_pct: f64,
    pub default_sl_pct: f64,
    /// Fraction of equity risked per trade, in percent
    pub risk_per_trade_pct: f64,
    /// Cap on position notional as a percentage of equity
    pub max_position_pct: f64,
    pub atr_sl_multiplier: f64,
    pub atr_tp_multiplier: f64,
    /// Minimum risk/reward ratio for level-derived targets
    pub min_risk_reward: f64,
    pub rsi_filter_enabled: bool,
    pub rsi_overbought: f64,
    pub rsi_oversold: f64,
    pub multi_timeframe_enabled: bool,
    /// Confirmation timeframes scanned when multi-timeframe mode is on
    pub mtf_timeframes: Vec<String>,
    /// Qualifying signals need at least this many agreeing timeframes
    /// (the primary counts as one)
    pub mtf_min_confirmations: u32,
    /// Minimum spacing between two trades on the same symbol; 0 disables
    pub symbol_cooldown_secs: u64,
    /// Minimum spacing between any two trades; 0 disables
    pub global_cooldown_secs: u64,
    /// 0 disables
    pub max_trades_per_hour: u32,
    /// 0 disables
    pub max_trades_per_day: u32,
    /// Pause after the consecutive-loss limit trips; 0 disables
    pub loss_streak_pause_secs: u64,
}

impl Default for TradingConfig {
    fn default() -> Self {
        TradingConfig {
            symbols: vec!["BTC".to_string(), "ETH".to_string()],
            timeframes: vec!["15m".to_string()],
            leverage: 5.0,
            max_concurrent_trades: 3,
            mode: TradingMode::Manual,
            analysis_interval_ms: 60_000,
            min_score: 4.0,
            min_win_probability: 55.0,
            min_confluence: 2,
            tpsl_mode: TpslMode::Auto,
            default_tp_pct: 2.0,
            default_sl_pct: 1.0,
            risk_per_trade_pct: 1.0,
            max_position_pct: 20.0,
            atr_sl_multiplier: 1.5,
            atr_tp_multiplier: 2.5,
            min_risk_reward: 1.5,
            rsi_filter_enabled: true,
            rsi_overbought: 70.0,
            rsi_oversold: 30.0,
            multi_timeframe_enabled: false,
            mtf_timeframes: vec!["15m".to_string(), "1h".to_string(), "4h".to_string()],
            mtf_min_confirmations: 2,
            symbol_cooldown_secs: 300,
            global_cooldown_secs: 60,
            max_trades_per_hour: 6,
            max_trades_per_day: 20,
            loss_streak_pause_secs: 900,
        }
    }
}

impl TradingConfig {
    /// The timeframe presets and runtime state key off this
    pub fn primary_timeframe(&self) -> &str {
        self.timeframes.first().map(|s| s.as_str()).unwrap_or("15m")
    }

    /// Timeframes scanned by one analysis tick
    pub fn scan_timeframes(&self) -> &[String] {
        if self.multi_timeframe_enabled {
            &self.mtf_timeframes
        } else {
            &self.timeframes
        }
    }

    /// Validate invariants once at the boundary.
    ///
    /// Percentages must fall in (0, 100], leverage and the analysis
    /// interval must be positive.
    pub fn validate(&self) -> Result<(), String> {
        if self.symbols.is_empty() {
            return Err("at least one symbol is required".to_string());
        }
        if self.timeframes.is_empty() {
            return Err("at least one timeframe is required".to_string());
        }
        if self.leverage <= 0.0 {
            return Err(format!("leverage must be positive, got {}", self.leverage));
        }
        if self.analysis_interval_ms == 0 {
            return Err("analysis_interval_ms must be positive".to_string());
        }
        for (name, pct) in [
            ("default_tp_pct", self.default_tp_pct),
            ("default_sl_pct", self.default_sl_pct),
            ("risk_per_trade_pct", self.risk_per_trade_pct),
            ("max_position_pct", self.max_position_pct),
        ] {
            if pct <= 0.0 || pct > 100.0 {
                return Err(format!("{} must be in (0, 100], got {}", name, pct));
            }
        }
        if self.rsi_filter_enabled && self.rsi_oversold >= self.rsi_overbought {
            return Err(format!(
                "rsi_oversold ({}) must be below rsi_overbought ({})",
                self.rsi_oversold, self.rsi_overbought
            ));
        }
        if self.multi_timeframe_enabled && self.mtf_timeframes.is_empty() {
            return Err("multi-timeframe mode requires mtf_timeframes".to_string());
        }
        Ok(())
    }

    /// Apply the preset for the primary timeframe.
    ///
    /// Skipped in multi-timeframe mode, where no single timeframe preset
    /// applies.
    pub fn apply_timeframe_preset(&mut self) {
        if self.multi_timeframe_enabled {
            return;
        }
        if let Some(preset) = TimeframePreset::lookup(self.primary_timeframe()) {
            self.min_score = preset.min_score;
            self.min_win_probability = preset.min_win_probability;
            self.analysis_interval_ms = preset.analysis_interval_ms;
        }
    }
}

/// Partial update applied over a live configuration.
///
/// Shallow merge: only fields present in the patch change; everything else
/// keeps its current value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigPatch {
    pub symbols: Option<Vec<String>>,
    pub timeframes: Option<Vec<String>>,
    pub leverage: Option<f64>,
    pub max_concurrent_trades: Option<usize>,
    pub mode: Option<TradingMode>,
    pub analysis_interval_ms: Option<u64>,
    pub min_score: Option<f64>,
    pub min_win_probability: Option<f64>,
    pub min_confluence: Option<u32>,
    pub tpsl_mode: Option<TpslMode>,
    pub default_tp_pct: Option<f64>,
    pub default_sl_pct: Option<f64>,
    pub risk_per_trade_pct: Option<f64>,
    pub max_position_pct: Option<f64>,
    pub atr_sl_multiplier: Option<f64>,
    pub atr_tp_multiplier: Option<f64>,
    pub min_risk_reward: Option<f64>,
    pub rsi_filter_enabled: Option<bool>,
    pub rsi_overbought: Option<f64>,
    pub rsi_oversold: Option<f64>,
    pub multi_timeframe_enabled: Option<bool>,
    pub mtf_timeframes: Option<Vec<String>>,
    pub mtf_min_confirmations: Option<u32>,
    pub symbol_cooldown_secs: Option<u64>,
    pub global_cooldown_secs: Option<u64>,
    pub max_trades_per_hour: Option<u32>,
    pub max_trades_per_day: Option<u32>,
    pub loss_streak_pause_secs: Option<u64>,
}

impl ConfigPatch {
    /// Merge into `config`. Returns true if the timeframe set changed,
    /// which requires the preset to be reapplied.
    pub fn apply(self, config: &mut TradingConfig) -> bool {
        let mut timeframes_changed = false;

        macro_rules! merge {
            ($field:ident) => {
                if let Some(v) = self.$field {
                    config.$field = v;
                }
            };
        }

        if let Some(tfs) = self.timeframes {
            if tfs != config.timeframes {
                timeframes_changed = true;
            }
            config.timeframes = tfs;
        }

        merge!(symbols);
        merge!(leverage);
        merge!(max_concurrent_trades);
        merge!(mode);
        merge!(analysis_interval_ms);
        merge!(min_score);
        merge!(min_win_probability);
        merge!(min_confluence);
        merge!(tpsl_mode);
        merge!(default_tp_pct);
        merge!(default_sl_pct);
        merge!(risk_per_trade_pct);
        merge!(max_position_pct);
        merge!(atr_sl_multiplier);
        merge!(atr_tp_multiplier);
        merge!(min_risk_reward);
        merge!(rsi_filter_enabled);
        merge!(rsi_overbought);
        merge!(rsi_oversold);
        merge!(multi_timeframe_enabled);
        merge!(mtf_timeframes);
        merge!(mtf_min_confirmations);
        merge!(symbol_cooldown_secs);
        merge!(global_cooldown_secs);
        merge!(max_trades_per_hour);
        merge!(max_trades_per_day);
        merge!(loss_streak_pause_secs);

        timeframes_changed
    }
}

/// Signal thresholds and cadence tuned per timeframe.
///
/// Shorter timeframes are noisier, so they demand a higher score and are
/// re-analyzed more often.
#[derive(Debug, Clone, Copy)]
pub struct TimeframePreset {
    pub min_score: f64,
    pub min_win_probability: f64,
    pub analysis_interval_ms: u64,
}

impl TimeframePreset {
    pub fn lookup(timeframe: &str) -> Option<TimeframePreset> {
        let preset = match timeframe {
            "1m" => TimeframePreset {
                min_score: 6.0,
                min_win_probability: 65.0,
                analysis_interval_ms: 30_000,
            },
            "5m" => TimeframePreset {
                min_score: 5.0,
                min_win_probability: 60.0,
                analysis_interval_ms: 60_000,
            },
            "15m" => TimeframePreset {
                min_score: 4.0,
                min_win_probability: 55.0,
                analysis_interval_ms: 180_000,
            },
            "1h" => TimeframePreset {
                min_score: 3.5,
                min_win_probability: 55.0,
                analysis_interval_ms: 600_000,
            },
            "4h" => TimeframePreset {
                min_score: 3.0,
                min_win_probability: 50.0,
                analysis_interval_ms: 1_800_000,
            },
            "1d" => TimeframePreset {
                min_score: 3.0,
                min_win_probability: 50.0,
                analysis_interval_ms: 3_600_000,
            },
            _ => return None,
        };
        Some(preset)
    }
}

/// One user entry in the engine config file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    pub wallet_address: String,
    /// Base64 sealed credential envelope; see `auth::open_secret`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encrypted_secret: Option<String>,
    /// Run against the simulated venue instead of the live one
    #[serde(default)]
    pub paper: bool,
    #[serde(default)]
    pub config: TradingConfig,
}

/// Top-level engine configuration loaded by the binary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub users: Vec<UserProfile>,
    #[serde(default)]
    pub risk: RiskLimits,
    #[serde(default = "default_state_dir")]
    pub state_dir: String,
}

fn default_state_dir() -> String {
    "state".to_string()
}

impl EngineConfig {
    /// Load configuration from a JSON file.
    ///
    /// Per-user configs are validated here so a bad profile fails at
    /// startup rather than mid-tick.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref()).context("Failed to read config file")?;
        let config: EngineConfig =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;

        for user in &config.users {
            config_error(&user.user_id, user.config.validate())?;
        }

        Ok(config)
    }
}

fn config_error(user: &str, result: Result<(), String>) -> Result<()> {
    result.map_err(|e| anyhow::anyhow!("invalid config for user {}: {}", user, e))
}
