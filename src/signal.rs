//! Signal analysis seam and the built-in trend-score analyzer.
//!
//! The decision loop consumes signals through the [`SignalAnalyzer`]
//! trait; the indicator math behind it is replaceable. The built-in
//! [`TrendScoreAnalyzer`] combines EMA cross, MACD, RSI, and baseline
//! structure into a directional score on a 0-10 scale with a confluence
//! count of agreeing indicators.

use serde::{Deserialize, Serialize};

use crate::indicators;
use crate::types::{Candle, IndicatorSnapshot, SignalAction, TechnicalLevels};

/// Number of indicator votes cast by the built-in analyzer
const VOTE_COUNT: u32 = 5;

/// Indicator periods the analyzer runs with
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerParams {
    pub ema_fast: usize,
    pub ema_slow: usize,
    pub rsi_period: usize,
    pub atr_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub volatility_period: usize,
    pub swing_lookback: usize,
}

impl Default for AnalyzerParams {
    fn default() -> Self {
        AnalyzerParams {
            ema_fast: 9,
            ema_slow: 21,
            rsi_period: 14,
            atr_period: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            volatility_period: 20,
            swing_lookback: 40,
        }
    }
}

/// Output of one signal analysis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalResult {
    pub action: SignalAction,
    /// 0-10; higher means stronger directional agreement
    pub score: f64,
    /// Heuristic win probability in percent
    pub win_probability: f64,
    /// Count of indicators agreeing with the action's direction
    pub confluence: u32,
    pub indicators: IndicatorSnapshot,
    pub levels: TechnicalLevels,
}

impl SignalResult {
    fn neutral(indicators: IndicatorSnapshot, levels: TechnicalLevels) -> Self {
        SignalResult {
            action: SignalAction::Neutral,
            score: 0.0,
            win_probability: 0.0,
            confluence: 0,
            indicators,
            levels,
        }
    }
}

/// Signal computation seam.
///
/// Pure computation over a candle window; network-facing collaborators
/// live behind [`crate::exchange::ExchangeClient`] instead.
pub trait SignalAnalyzer: Send + Sync {
    fn analyze(&self, candles: &[Candle], params: &AnalyzerParams, timeframe: &str)
        -> SignalResult;
}

/// Built-in trend/momentum analyzer.
///
/// Five directional votes: EMA cross, MACD vs its signal line, RSI above
/// or below the midline, close vs the 26-bar baseline, and conversion vs
/// baseline. Three or more agreeing votes produce a directional action;
/// the score scales with the vote margin.
#[derive(Debug, Default, Clone)]
pub struct TrendScoreAnalyzer;

impl SignalAnalyzer for TrendScoreAnalyzer {
    fn analyze(
        &self,
        candles: &[Candle],
        params: &AnalyzerParams,
        timeframe: &str,
    ) -> SignalResult {
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let warmup = params
            .macd_slow
            .max(params.ema_slow)
            .max(params.rsi_period)
            + params.macd_signal;

        if closes.len() < warmup {
            tracing::debug!(
                timeframe,
                candles = closes.len(),
                required = warmup,
                "insufficient history for analysis"
            );
            return SignalResult::neutral(IndicatorSnapshot::default(), TechnicalLevels::default());
        }

        let last_close = closes[closes.len() - 1];

        let ema_fast = last_of(&indicators::ema(&closes, params.ema_fast));
        let ema_slow = last_of(&indicators::ema(&closes, params.ema_slow));
        let rsi = last_of(&indicators::rsi(&closes, params.rsi_period));
        let atr = last_of(&indicators::atr(candles, params.atr_period));
        let (macd_line, signal_line) = indicators::macd(
            &closes,
            params.macd_fast,
            params.macd_slow,
            params.macd_signal,
        );
        let macd = last_of(&macd_line);
        let macd_signal = last_of(&signal_line);
        let baseline = last_of(&indicators::rolling_midpoint(candles, 26));
        let conversion = last_of(&indicators::rolling_midpoint(candles, 9));
        let (support, resistance) = indicators::swing_levels(candles, params.swing_lookback);
        let volatility = indicators::volatility_pct(&closes, params.volatility_period);

        let snapshot = IndicatorSnapshot {
            rsi,
            atr,
            macd,
            macd_signal,
            ema_fast,
            ema_slow,
            volatility_pct: volatility,
        };
        let levels = TechnicalLevels {
            support,
            resistance,
            baseline,
            conversion,
        };

        // Directional votes
        let mut bull: u32 = 0;
        let mut bear: u32 = 0;
        let mut vote = |is_bull: bool| {
            if is_bull {
                bull += 1;
            } else {
                bear += 1;
            }
        };

        match (ema_fast, ema_slow) {
            (Some(fast), Some(slow)) => vote(fast > slow),
            _ => return SignalResult::neutral(snapshot, levels),
        }
        match (macd, macd_signal) {
            (Some(m), Some(s)) => vote(m > s),
            _ => return SignalResult::neutral(snapshot, levels),
        }
        match rsi {
            Some(r) => vote(r > 50.0),
            None => return SignalResult::neutral(snapshot, levels),
        }
        match baseline {
            Some(b) => vote(last_close > b),
            None => return SignalResult::neutral(snapshot, levels),
        }
        match (conversion, baseline) {
            (Some(c), Some(b)) => vote(c > b),
            _ => return SignalResult::neutral(snapshot, levels),
        }

        let (action, confluence) = if bull > bear && bull * 2 > VOTE_COUNT {
            (SignalAction::Long, bull)
        } else if bear > bull && bear * 2 > VOTE_COUNT {
            (SignalAction::Short, bear)
        } else {
            return SignalResult::neutral(snapshot, levels);
        };

        // Vote margin sets the score: 3/5 -> 6.0 ... 5/5 -> 10.0
        let score = confluence as f64 * 10.0 / VOTE_COUNT as f64;
        let win_probability = (35.0 + 9.0 * confluence as f64).min(95.0);

        SignalResult {
            action,
            score,
            win_probability,
            confluence,
            indicators: snapshot,
            levels,
        }
    }
}

fn last_of(series: &[Option<f64>]) -> Option<f64> {
    series.last().copied().flatten()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn make_candles(closes: &[f64]) -> Vec<Candle> {
        let start = Utc::now() - Duration::hours(closes.len() as i64);
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Candle {
                datetime: start + Duration::hours(i as i64),
                open: close * 0.999,
                high: close * 1.004,
                low: close * 0.996,
                close,
                volume: 1000.0,
            })
            .collect()
    }

    #[test]
    fn test_insufficient_history_is_neutral() {
        let candles = make_candles(&[100.0; 10]);
        let result =
            TrendScoreAnalyzer.analyze(&candles, &AnalyzerParams::default(), "15m");
        assert_eq!(result.action, SignalAction::Neutral);
        assert_eq!(result.score, 0.0);
    }

    #[test]
    fn test_strong_uptrend_scores_long() {
        let closes: Vec<f64> = (0..120).map(|i| 100.0 * 1.01f64.powi(i)).collect();
        let candles = make_candles(&closes);
        let result =
            TrendScoreAnalyzer.analyze(&candles, &AnalyzerParams::default(), "15m");

        assert_eq!(result.action, SignalAction::Long);
        assert!(result.score >= 6.0);
        assert!(result.confluence >= 3);
        assert!(result.indicators.rsi.unwrap() > 50.0);
    }

    #[test]
    fn test_strong_downtrend_scores_short() {
        let closes: Vec<f64> = (0..120).map(|i| 100.0 * 0.99f64.powi(i)).collect();
        let candles = make_candles(&closes);
        let result =
            TrendScoreAnalyzer.analyze(&candles, &AnalyzerParams::default(), "15m");

        assert_eq!(result.action, SignalAction::Short);
        assert!(result.score >= 6.0);
    }

    #[test]
    fn test_score_bounds() {
        let closes: Vec<f64> = (0..150)
            .map(|i| 100.0 + ((i * 13) % 17) as f64 - 8.0)
            .collect();
        let candles = make_candles(&closes);
        let result =
            TrendScoreAnalyzer.analyze(&candles, &AnalyzerParams::default(), "1h");
        assert!(result.score >= 0.0 && result.score <= 10.0);
        assert!(result.win_probability <= 95.0);
    }
}
