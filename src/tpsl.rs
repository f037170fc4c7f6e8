//! Take-profit / stop-loss calculation.
//!
//! A small state machine over [`TpslMode`]: fixed percentages, ATR
//! multiples, technical-level stops, or level stops with a score-scaled
//! reward target. Every mode degrades to the percentage calculation when
//! its required inputs are missing, and all results are clamped to the
//! numeric safety bounds before prices are derived.
//!
//! Level selection follows a priority cascade, independently for the stop
//! and the target: technical level (conversion/baseline from the signal
//! module) > raw swing support/resistance > percentage fallback. A
//! candidate level whose distance from entry falls outside the allowed
//! band is rejected and the cascade proceeds.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::TpslMode;
use crate::types::{Direction, IndicatorSnapshot, TechnicalLevels};

/// Stop-loss distance bounds as a percent of entry price
pub const MIN_SL_PCT: f64 = 0.3;
pub const MAX_SL_PCT: f64 = 5.0;

/// Take-profit distance bounds as a percent of entry price
pub const MIN_TP_PCT: f64 = 0.5;
pub const MAX_TP_PCT: f64 = 15.0;

/// Which source produced a chosen level, for auditability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelSource {
    /// Conversion/baseline level from the signal module
    Technical,
    /// Raw swing support/resistance
    SupportResistance,
    /// ATR multiple
    Atr,
    /// Configured fixed percentage
    Percent,
    /// Derived from the stop distance and a reward ratio
    RiskReward,
}

/// Inputs to one TP/SL computation
#[derive(Debug, Clone)]
pub struct TpslInputs<'a> {
    pub entry_price: f64,
    pub direction: Direction,
    pub mode: TpslMode,
    pub default_tp_pct: f64,
    pub default_sl_pct: f64,
    pub atr_sl_multiplier: f64,
    pub atr_tp_multiplier: f64,
    pub min_risk_reward: f64,
    /// Signal score, 0-10; scales the reward target in auto mode
    pub score: f64,
    pub indicators: &'a IndicatorSnapshot,
    pub levels: &'a TechnicalLevels,
}

/// Chosen exit levels plus provenance
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TpslResult {
    pub stop_loss: f64,
    pub take_profit: f64,
    pub sl_pct: f64,
    pub tp_pct: f64,
    pub sl_source: LevelSource,
    pub tp_source: LevelSource,
    /// Take-profit distance divided by stop-loss distance
    pub risk_reward: f64,
}

/// Compute stop-loss and take-profit for a candidate trade
pub fn calculate(inputs: &TpslInputs) -> TpslResult {
    let (sl_pct, sl_source, tp_pct, tp_source) = match inputs.mode {
        TpslMode::Percent => percent_mode(inputs),
        TpslMode::Atr => atr_mode(inputs),
        TpslMode::IchimokuPure => level_mode(inputs, false),
        TpslMode::Ichimoku => level_mode(inputs, true),
        TpslMode::Auto => auto_mode(inputs),
    };

    let sl_pct = sl_pct.clamp(MIN_SL_PCT, MAX_SL_PCT);
    let tp_pct = tp_pct.clamp(MIN_TP_PCT, MAX_TP_PCT);

    let sign = inputs.direction.sign();
    let stop_loss = inputs.entry_price * (1.0 - sign * sl_pct / 100.0);
    let take_profit = inputs.entry_price * (1.0 + sign * tp_pct / 100.0);

    TpslResult {
        stop_loss,
        take_profit,
        sl_pct,
        tp_pct,
        sl_source,
        tp_source,
        risk_reward: tp_pct / sl_pct,
    }
}

fn percent_mode(inputs: &TpslInputs) -> (f64, LevelSource, f64, LevelSource) {
    (
        inputs.default_sl_pct,
        LevelSource::Percent,
        inputs.default_tp_pct,
        LevelSource::Percent,
    )
}

fn atr_mode(inputs: &TpslInputs) -> (f64, LevelSource, f64, LevelSource) {
    let atr_pct = match inputs.indicators.atr {
        Some(atr) if atr > 0.0 && inputs.entry_price > 0.0 => atr / inputs.entry_price * 100.0,
        _ => {
            debug!("ATR unavailable, falling back to percent TP/SL");
            return percent_mode(inputs);
        }
    };

    let sl_pct = atr_pct * inputs.atr_sl_multiplier;
    // Stronger signals run further: 0.8x at score 0 up to 1.5x at score 10
    let strength = 0.8 + (inputs.score.clamp(0.0, 10.0) / 10.0) * 0.7;
    let tp_pct = atr_pct * inputs.atr_tp_multiplier * strength;

    (sl_pct, LevelSource::Atr, tp_pct, LevelSource::Atr)
}

/// Level-based stop and opposing-level target.
///
/// With `adjusted` the stop distance is tightened on strong confirming RSI
/// and widened on contrary RSI or high volatility.
fn level_mode(inputs: &TpslInputs, adjusted: bool) -> (f64, LevelSource, f64, LevelSource) {
    let (mut sl_pct, sl_source) = match protective_level(inputs) {
        Some((pct, source)) => (pct, source),
        None => (inputs.default_sl_pct, LevelSource::Percent),
    };

    if adjusted {
        sl_pct *= adjustment_factor(inputs);
    }

    let (tp_pct, tp_source) = match opposing_level(inputs) {
        Some((pct, source)) => (pct, source),
        None => (sl_pct * inputs.min_risk_reward, LevelSource::RiskReward),
    };

    (sl_pct, sl_source, tp_pct, tp_source)
}

/// Adjusted level stop with a score-scaled reward multiplier target
fn auto_mode(inputs: &TpslInputs) -> (f64, LevelSource, f64, LevelSource) {
    let (mut sl_pct, sl_source) = match protective_level(inputs) {
        Some((pct, source)) => (pct, source),
        None => (inputs.default_sl_pct, LevelSource::Percent),
    };
    sl_pct *= adjustment_factor(inputs);

    // Reward multiplier grows with signal score: 1.5x at 0 up to 3.0x at 10
    let reward_mult = 1.5 + (inputs.score.clamp(0.0, 10.0) / 10.0) * 1.5;
    let tp_pct = sl_pct * reward_mult;

    (sl_pct, sl_source, tp_pct, LevelSource::RiskReward)
}

/// Stop-side cascade: nearest protective level whose distance falls inside
/// the stop band. Long positions protect below entry, shorts above.
fn protective_level(inputs: &TpslInputs) -> Option<(f64, LevelSource)> {
    let technical = [inputs.levels.conversion, inputs.levels.baseline];
    let raw = match inputs.direction {
        Direction::Long => inputs.levels.support,
        Direction::Short => inputs.levels.resistance,
    };

    nearest_in_band(
        inputs,
        &technical,
        protective_distance,
        MIN_SL_PCT,
        MAX_SL_PCT,
    )
    .map(|pct| (pct, LevelSource::Technical))
    .or_else(|| {
        nearest_in_band(inputs, &[raw], protective_distance, MIN_SL_PCT, MAX_SL_PCT)
            .map(|pct| (pct, LevelSource::SupportResistance))
    })
}

/// Target-side cascade: nearest opposing level inside the take-profit band
fn opposing_level(inputs: &TpslInputs) -> Option<(f64, LevelSource)> {
    let raw = match inputs.direction {
        Direction::Long => inputs.levels.resistance,
        Direction::Short => inputs.levels.support,
    };

    nearest_in_band(
        inputs,
        &[inputs.levels.baseline, inputs.levels.conversion],
        opposing_distance,
        MIN_TP_PCT,
        MAX_TP_PCT,
    )
    .map(|pct| (pct, LevelSource::Technical))
    .or_else(|| {
        nearest_in_band(inputs, &[raw], opposing_distance, MIN_TP_PCT, MAX_TP_PCT)
            .map(|pct| (pct, LevelSource::SupportResistance))
    })
}

/// Percent distance from entry to a level on the protective side, or None
/// if the level sits on the wrong side
fn protective_distance(inputs: &TpslInputs, level: f64) -> Option<f64> {
    let offset = (inputs.entry_price - level) * inputs.direction.sign();
    if offset > 0.0 {
        Some(offset / inputs.entry_price * 100.0)
    } else {
        None
    }
}

/// Percent distance from entry to a level on the profit side
fn opposing_distance(inputs: &TpslInputs, level: f64) -> Option<f64> {
    let offset = (level - inputs.entry_price) * inputs.direction.sign();
    if offset > 0.0 {
        Some(offset / inputs.entry_price * 100.0)
    } else {
        None
    }
}

fn nearest_in_band(
    inputs: &TpslInputs,
    candidates: &[Option<f64>],
    distance: fn(&TpslInputs, f64) -> Option<f64>,
    min_pct: f64,
    max_pct: f64,
) -> Option<f64> {
    candidates
        .iter()
        .flatten()
        .filter_map(|&level| distance(inputs, level))
        .filter(|&pct| pct >= min_pct && pct <= max_pct)
        .min_by(|a, b| a.total_cmp(b))
}

/// Stop-distance multiplier from RSI extremity and volatility.
///
/// Confirming RSI (momentum already with the trade) tightens the stop;
/// contrary RSI or high volatility widens it.
fn adjustment_factor(inputs: &TpslInputs) -> f64 {
    let mut factor: f64 = 1.0;

    if let Some(rsi) = inputs.indicators.rsi {
        let confirming = match inputs.direction {
            Direction::Long => rsi >= 60.0,
            Direction::Short => rsi <= 40.0,
        };
        let contrary = match inputs.direction {
            Direction::Long => rsi <= 40.0,
            Direction::Short => rsi >= 60.0,
        };
        if confirming {
            factor *= 0.85;
        } else if contrary {
            factor *= 1.25;
        }
    }

    if let Some(vol) = inputs.indicators.volatility_pct {
        if vol > 2.0 {
            factor *= 1.2;
        }
    }

    factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn base_inputs<'a>(
        indicators: &'a IndicatorSnapshot,
        levels: &'a TechnicalLevels,
    ) -> TpslInputs<'a> {
        TpslInputs {
            entry_price: 100.0,
            direction: Direction::Long,
            mode: TpslMode::Percent,
            default_tp_pct: 2.0,
            default_sl_pct: 1.0,
            atr_sl_multiplier: 1.5,
            atr_tp_multiplier: 2.5,
            min_risk_reward: 1.5,
            score: 5.0,
            indicators,
            levels,
        }
    }

    #[test]
    fn test_percent_mode_exact_levels() {
        let indicators = IndicatorSnapshot::default();
        let levels = TechnicalLevels::default();
        let result = calculate(&base_inputs(&indicators, &levels));

        assert_relative_eq!(result.stop_loss, 99.0);
        assert_relative_eq!(result.take_profit, 102.0);
        assert_eq!(result.sl_source, LevelSource::Percent);
        assert_eq!(result.tp_source, LevelSource::Percent);
        assert_relative_eq!(result.risk_reward, 2.0);
    }

    #[test]
    fn test_direction_flips_offsets() {
        let indicators = IndicatorSnapshot::default();
        let levels = TechnicalLevels::default();
        let mut inputs = base_inputs(&indicators, &levels);
        inputs.direction = Direction::Short;
        let result = calculate(&inputs);

        assert_relative_eq!(result.stop_loss, 101.0);
        assert_relative_eq!(result.take_profit, 98.0);
    }

    #[test]
    fn test_atr_mode_uses_atr_distance() {
        let indicators = IndicatorSnapshot {
            atr: Some(1.0), // 1% of entry
            ..IndicatorSnapshot::default()
        };
        let levels = TechnicalLevels::default();
        let mut inputs = base_inputs(&indicators, &levels);
        inputs.mode = TpslMode::Atr;
        let result = calculate(&inputs);

        assert_relative_eq!(result.sl_pct, 1.5);
        assert_eq!(result.sl_source, LevelSource::Atr);
        // score 5 -> strength 1.15 -> tp 2.5 * 1.15 = 2.875%
        assert_relative_eq!(result.tp_pct, 2.875, epsilon = 1e-9);
    }

    #[test]
    fn test_atr_mode_falls_back_without_atr() {
        let indicators = IndicatorSnapshot::default();
        let levels = TechnicalLevels::default();
        let mut inputs = base_inputs(&indicators, &levels);
        inputs.mode = TpslMode::Atr;
        let result = calculate(&inputs);

        assert_eq!(result.sl_source, LevelSource::Percent);
        assert_relative_eq!(result.sl_pct, 1.0);
    }

    #[test]
    fn test_pure_level_mode_uses_nearest_support() {
        let indicators = IndicatorSnapshot::default();
        let levels = TechnicalLevels {
            support: Some(97.0),
            resistance: Some(104.0),
            baseline: Some(98.5), // nearer protective level, inside band
            conversion: None,
        };
        let mut inputs = base_inputs(&indicators, &levels);
        inputs.mode = TpslMode::IchimokuPure;
        let result = calculate(&inputs);

        assert_eq!(result.sl_source, LevelSource::Technical);
        assert_relative_eq!(result.sl_pct, 1.5, epsilon = 1e-9);
        // Baseline is below entry so it cannot be a target; resistance wins
        assert_eq!(result.tp_source, LevelSource::SupportResistance);
        assert_relative_eq!(result.tp_pct, 4.0, epsilon = 1e-9);
    }

    #[test]
    fn test_pure_level_mode_rrr_fallback_for_target() {
        let indicators = IndicatorSnapshot::default();
        let levels = TechnicalLevels {
            support: None,
            resistance: None,
            baseline: Some(99.0),
            conversion: None,
        };
        let mut inputs = base_inputs(&indicators, &levels);
        inputs.mode = TpslMode::IchimokuPure;
        let result = calculate(&inputs);

        assert_eq!(result.tp_source, LevelSource::RiskReward);
        assert!(result.risk_reward >= inputs.min_risk_reward - 1e-9);
    }

    #[test]
    fn test_cascade_rejects_out_of_band_levels() {
        let indicators = IndicatorSnapshot::default();
        // Technical levels way too far (>5%); raw support inside the band
        let levels = TechnicalLevels {
            support: Some(98.0),
            resistance: None,
            baseline: Some(90.0),
            conversion: Some(89.0),
        };
        let mut inputs = base_inputs(&indicators, &levels);
        inputs.mode = TpslMode::IchimokuPure;
        let result = calculate(&inputs);

        assert_eq!(result.sl_source, LevelSource::SupportResistance);
        assert_relative_eq!(result.sl_pct, 2.0, epsilon = 1e-9);
    }

    #[test]
    fn test_auto_mode_scales_reward_with_score() {
        let indicators = IndicatorSnapshot::default();
        let levels = TechnicalLevels {
            baseline: Some(99.0),
            ..TechnicalLevels::default()
        };

        let mut weak = base_inputs(&indicators, &levels);
        weak.mode = TpslMode::Auto;
        weak.score = 0.0;
        let weak_result = calculate(&weak);

        let mut strong = base_inputs(&indicators, &levels);
        strong.mode = TpslMode::Auto;
        strong.score = 10.0;
        let strong_result = calculate(&strong);

        assert!(strong_result.tp_pct > weak_result.tp_pct);
        assert_relative_eq!(weak_result.risk_reward, 1.5, epsilon = 1e-9);
        assert_relative_eq!(strong_result.risk_reward, 3.0, epsilon = 1e-9);
    }

    #[test]
    fn test_adjustment_tightens_on_confirming_rsi() {
        let confirming = IndicatorSnapshot {
            rsi: Some(65.0),
            ..IndicatorSnapshot::default()
        };
        let contrary = IndicatorSnapshot {
            rsi: Some(35.0),
            ..IndicatorSnapshot::default()
        };
        let levels = TechnicalLevels {
            baseline: Some(98.0),
            ..TechnicalLevels::default()
        };

        let mut inputs = base_inputs(&confirming, &levels);
        inputs.mode = TpslMode::Ichimoku;
        let tightened = calculate(&inputs);

        let mut inputs = base_inputs(&contrary, &levels);
        inputs.mode = TpslMode::Ichimoku;
        let widened = calculate(&inputs);

        assert!(tightened.sl_pct < widened.sl_pct);
    }

    #[test]
    fn test_bounds_hold_across_modes_and_directions() {
        let indicator_sets = [
            IndicatorSnapshot::default(),
            IndicatorSnapshot {
                rsi: Some(80.0),
                atr: Some(9.0), // 9% ATR would breach bounds unclamped
                volatility_pct: Some(5.0),
                ..IndicatorSnapshot::default()
            },
        ];
        let levels = TechnicalLevels {
            support: Some(99.8),
            resistance: Some(100.1),
            baseline: Some(99.9),
            conversion: Some(50.0),
        };

        for indicators in &indicator_sets {
            for mode in [
                TpslMode::Percent,
                TpslMode::Atr,
                TpslMode::Ichimoku,
                TpslMode::IchimokuPure,
                TpslMode::Auto,
            ] {
                for direction in [Direction::Long, Direction::Short] {
                    for score in [0.0, 5.0, 10.0] {
                        let mut inputs = base_inputs(indicators, &levels);
                        inputs.mode = mode;
                        inputs.direction = direction;
                        inputs.score = score;
                        let result = calculate(&inputs);

                        assert!(
                            result.sl_pct >= MIN_SL_PCT && result.sl_pct <= MAX_SL_PCT,
                            "sl_pct {} out of bounds for {:?}",
                            result.sl_pct,
                            mode
                        );
                        assert!(
                            result.tp_pct >= MIN_TP_PCT && result.tp_pct <= MAX_TP_PCT,
                            "tp_pct {} out of bounds for {:?}",
                            result.tp_pct,
                            mode
                        );
                    }
                }
            }
        }
    }
}
