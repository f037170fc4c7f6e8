//! Historical data loading
//!
//! Loads OHLCV candles from CSV files for backtesting. Files follow the
//! `datetime,open,high,low,close,volume` layout with a header row.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::types::Candle;

/// Conventional file name for one symbol/timeframe pair
pub fn csv_path(data_dir: impl AsRef<Path>, symbol: &str, timeframe: &str) -> PathBuf {
    data_dir
        .as_ref()
        .join(format!("{}_{}.csv", symbol, timeframe))
}

fn valid_candle(c: &Candle) -> bool {
    c.open > 0.0
        && c.high > 0.0
        && c.low > 0.0
        && c.close > 0.0
        && c.high >= c.low
        && c.volume >= 0.0
}

/// Load candles from a CSV file, sorted by timestamp with duplicates
/// removed. Rows with impossible prices are skipped with a warning.
pub fn load_csv(path: impl AsRef<Path>) -> Result<Vec<Candle>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open CSV file {:?}", path))?;

    let mut candles = Vec::new();
    let mut invalid_count = 0;

    for (row_idx, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("Failed to read row {}", row_idx + 1))?;

        let dt_str = record.get(0).context("Missing datetime column")?;
        let datetime = dt_str
            .parse::<DateTime<Utc>>()
            .or_else(|_| {
                // Tolerate timestamps without a timezone, assuming UTC
                chrono::NaiveDateTime::parse_from_str(dt_str, "%Y-%m-%d %H:%M:%S")
                    .map(|ndt| DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc))
            })
            .with_context(|| format!("Failed to parse datetime: {}", dt_str))?;

        let field = |idx: usize, name: &str| -> Result<f64> {
            record
                .get(idx)
                .with_context(|| format!("Missing {} column", name))?
                .parse()
                .with_context(|| format!("Failed to parse {}", name))
        };

        let candle = Candle {
            datetime,
            open: field(1, "open")?,
            high: field(2, "high")?,
            low: field(3, "low")?,
            close: field(4, "close")?,
            volume: field(5, "volume")?,
        };

        if valid_candle(&candle) {
            candles.push(candle);
        } else {
            invalid_count += 1;
            warn!(
                "Skipping invalid candle at row {} in {:?}",
                row_idx + 2, // 1-indexed plus header row
                path.file_name().unwrap_or_default()
            );
        }
    }

    if invalid_count > 0 {
        warn!(
            "Skipped {} invalid candles out of {} in {:?}",
            invalid_count,
            invalid_count + candles.len(),
            path.file_name().unwrap_or_default()
        );
    }

    candles.sort_by_key(|c| c.datetime);
    candles.dedup_by_key(|c| c.datetime);
    Ok(candles)
}

/// Keep candles within `[start, end]`; a None bound is open
pub fn filter_candles_by_date(
    candles: Vec<Candle>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> Vec<Candle> {
    candles
        .into_iter()
        .filter(|c| {
            let after_start = start.is_none_or(|s| c.datetime >= s);
            let before_end = end.is_none_or(|e| c.datetime <= e);
            after_start && before_end
        })
        .collect()
}

/// Parse `YYYY-MM-DD` or `YYYY-MM-DD HH:MM:SS` into a UTC timestamp
pub fn parse_date(s: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = s.parse::<DateTime<Utc>>() {
        return Ok(dt);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Ok(DateTime::from_naive_utc_and_offset(ndt, Utc));
    }
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("Failed to parse date: {}", s))?;
    let ndt = date
        .and_hms_opt(0, 0, 0)
        .context("Invalid time components")?;
    Ok(DateTime::from_naive_utc_and_offset(ndt, Utc))
}
