//! Backtest command
//!
//! Loads historical candles from CSV and replays them through the same
//! analyzer, TP/SL, and sizing pipeline the live bots run.

use anyhow::{Context, Result};
use tracing::info;

use perpbot::backtest::{BacktestSettings, Backtester};
use perpbot::config::{EngineConfig, TradingConfig};
use perpbot::data;
use perpbot::signal::TrendScoreAnalyzer;
use perpbot::types::Symbol;

#[allow(clippy::too_many_arguments)]
pub fn run(
    config_path: Option<String>,
    user: Option<String>,
    symbol: String,
    timeframe: String,
    data_dir: String,
    capital: f64,
    start: Option<String>,
    end: Option<String>,
) -> Result<()> {
    let mut trading_config = match &config_path {
        Some(path) => {
            let engine = EngineConfig::from_file(path)
                .with_context(|| format!("Failed to load config from {}", path))?;
            let profile = match &user {
                Some(id) => engine
                    .users
                    .iter()
                    .find(|u| &u.user_id == id)
                    .with_context(|| format!("No user {} in {}", id, path))?,
                None => engine.users.first().context("Config has no users")?,
            };
            profile.config.clone()
        }
        None => TradingConfig::default(),
    };

    trading_config.timeframes = vec![timeframe.clone()];
    trading_config.apply_timeframe_preset();

    let path = data::csv_path(&data_dir, &symbol, &timeframe);
    let candles = data::load_csv(&path)?;
    info!(symbol = %symbol, timeframe = %timeframe, bars = candles.len(), "loaded history");

    let start = start.as_deref().map(data::parse_date).transpose()?;
    let end = end.as_deref().map(data::parse_date).transpose()?;
    let candles = data::filter_candles_by_date(candles, start, end);
    if candles.is_empty() {
        anyhow::bail!("No candles in the requested date range");
    }

    let settings = BacktestSettings {
        initial_capital: capital,
        ..BacktestSettings::default()
    };
    let backtester = Backtester::new(trading_config, settings, Box::new(TrendScoreAnalyzer));
    let result = backtester.run(&Symbol::new(symbol.clone()), &candles);

    let m = &result.metrics;
    println!();
    println!("Backtest: {} {} ({} bars)", symbol, timeframe, candles.len());
    println!("----------------------------------------------");
    println!("Initial capital:   {:>12.2}", capital);
    println!("Final equity:      {:>12.2}", result.final_equity);
    println!("Total return:      {:>11.2}%", m.total_return);
    println!("Max drawdown:      {:>11.2}%", m.max_drawdown);
    println!(
        "Trades:            {:>12} ({} wins / {} losses)",
        m.total_trades, m.winning_trades, m.losing_trades
    );
    println!("Win rate:          {:>11.2}%", m.win_rate);
    println!("Profit factor:     {:>12.2}", m.profit_factor);
    println!("Avg win / loss:    {:>9.2} / {:.2}", m.avg_win, m.avg_loss);
    println!(
        "Largest win / loss:{:>9.2} / {:.2}",
        m.largest_win, m.largest_loss
    );
    println!();

    Ok(())
}
