//! Technical indicators powered by the `ta` crate
//!
//! Thin wrappers that return `Vec<Option<f64>>` aligned with the input
//! series; entries inside the warmup window are `None`. Only the
//! indicators the signal analyzer and TP/SL calculator consume live here.

use ta::indicators::{
    AverageTrueRange, ExponentialMovingAverage, MovingAverageConvergenceDivergence,
    RelativeStrengthIndex,
};
use ta::{DataItem, Next};

use crate::types::Candle;

/// Type alias for two-line indicators (line1, line2)
pub type DualLineOutput = (Vec<Option<f64>>, Vec<Option<f64>>);

/// Create a DataItem from a candle for use with ta indicators
fn make_data_item(candle: &Candle) -> Option<DataItem> {
    DataItem::builder()
        .open(candle.open)
        .high(candle.high)
        .low(candle.low)
        .close(candle.close)
        .volume(candle.volume)
        .build()
        .ok()
}

/// Calculate Exponential Moving Average
pub fn ema(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if values.is_empty() || period == 0 {
        return vec![];
    }

    let mut indicator = match ExponentialMovingAverage::new(period) {
        Ok(i) => i,
        Err(_) => return vec![None; values.len()],
    };

    let mut result = Vec::with_capacity(values.len());
    for (i, &value) in values.iter().enumerate() {
        let ema_val = indicator.next(value);
        if i + 1 >= period {
            result.push(Some(ema_val));
        } else {
            result.push(None);
        }
    }

    result
}

/// Calculate Relative Strength Index
pub fn rsi(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if values.is_empty() || period == 0 {
        return vec![];
    }

    let mut indicator = match RelativeStrengthIndex::new(period) {
        Ok(i) => i,
        Err(_) => return vec![None; values.len()],
    };

    let mut result = Vec::with_capacity(values.len());
    for (i, &value) in values.iter().enumerate() {
        let rsi_val = indicator.next(value);
        if i + 1 >= period {
            result.push(Some(rsi_val));
        } else {
            result.push(None);
        }
    }

    result
}

/// Calculate MACD line and signal line
pub fn macd(
    values: &[f64],
    fast_period: usize,
    slow_period: usize,
    signal_period: usize,
) -> DualLineOutput {
    if values.is_empty() {
        return (vec![], vec![]);
    }

    let mut indicator =
        match MovingAverageConvergenceDivergence::new(fast_period, slow_period, signal_period) {
            Ok(i) => i,
            Err(_) => return (vec![None; values.len()], vec![None; values.len()]),
        };

    let warmup = slow_period + signal_period;
    let mut macd_line = Vec::with_capacity(values.len());
    let mut signal_line = Vec::with_capacity(values.len());

    for (i, &value) in values.iter().enumerate() {
        let out = indicator.next(value);
        if i + 1 >= warmup {
            macd_line.push(Some(out.macd));
            signal_line.push(Some(out.signal));
        } else {
            macd_line.push(None);
            signal_line.push(None);
        }
    }

    (macd_line, signal_line)
}

/// Calculate Average True Range over OHLC candles
pub fn atr(candles: &[Candle], period: usize) -> Vec<Option<f64>> {
    if candles.is_empty() || period == 0 {
        return vec![];
    }

    let mut indicator = match AverageTrueRange::new(period) {
        Ok(i) => i,
        Err(_) => return vec![None; candles.len()],
    };

    let mut result = Vec::with_capacity(candles.len());
    for (i, candle) in candles.iter().enumerate() {
        let atr_val = match make_data_item(candle) {
            Some(item) => indicator.next(&item),
            None => {
                result.push(None);
                continue;
            }
        };
        if i + 1 >= period {
            result.push(Some(atr_val));
        } else {
            result.push(None);
        }
    }

    result
}

/// Rolling midpoint of the high/low range over `period` bars.
///
/// With period 9 this is the Ichimoku conversion line, with period 26 the
/// baseline; both are used as technical stop/target levels.
pub fn rolling_midpoint(candles: &[Candle], period: usize) -> Vec<Option<f64>> {
    if candles.is_empty() || period == 0 {
        return vec![];
    }

    let mut result = Vec::with_capacity(candles.len());
    for i in 0..candles.len() {
        if i + 1 < period {
            result.push(None);
            continue;
        }
        let window = &candles[i + 1 - period..=i];
        let highest = window.iter().map(|c| c.high).fold(f64::MIN, f64::max);
        let lowest = window.iter().map(|c| c.low).fold(f64::MAX, f64::min);
        result.push(Some((highest + lowest) / 2.0));
    }

    result
}

/// Nearest swing support below and resistance above the last close.
///
/// A swing point is a local extreme over a 2-bar neighborhood within the
/// lookback window. Returns (support, resistance).
pub fn swing_levels(candles: &[Candle], lookback: usize) -> (Option<f64>, Option<f64>) {
    if candles.len() < 5 {
        return (None, None);
    }

    let last_close = candles[candles.len() - 1].close;
    let start = candles.len().saturating_sub(lookback);
    let mut support: Option<f64> = None;
    let mut resistance: Option<f64> = None;

    for i in (start + 2)..(candles.len() - 2) {
        let low = candles[i].low;
        if low < candles[i - 1].low
            && low < candles[i - 2].low
            && low < candles[i + 1].low
            && low < candles[i + 2].low
            && low < last_close
        {
            support = Some(support.map_or(low, |s: f64| s.max(low)));
        }

        let high = candles[i].high;
        if high > candles[i - 1].high
            && high > candles[i - 2].high
            && high > candles[i + 1].high
            && high > candles[i + 2].high
            && high > last_close
        {
            resistance = Some(resistance.map_or(high, |r: f64| r.min(high)));
        }
    }

    (support, resistance)
}

/// Close-to-close volatility over the trailing `period` bars, as a
/// percentage of the last close
pub fn volatility_pct(closes: &[f64], period: usize) -> Option<f64> {
    if closes.len() < period + 1 || period < 2 {
        return None;
    }

    let window = &closes[closes.len() - period - 1..];
    let returns: Vec<f64> = window
        .windows(2)
        .map(|pair| (pair[1] - pair[0]) / pair[0])
        .collect();

    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance =
        returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (returns.len() - 1) as f64;

    Some(variance.sqrt() * 100.0)
}
