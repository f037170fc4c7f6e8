//! Trading engine entry point
//!
//! Two subcommands:
//! - run: start bots for every user in the engine config
//! - backtest: replay the decision pipeline over historical CSV data

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "perpbot")]
#[command(about = "Per-user perpetual futures trading bots with risk management", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the trading engine for every configured user
    Run {
        /// Path to the engine configuration file
        #[arg(short, long, default_value = "configs/engine.json")]
        config: String,

        /// Global stats logging interval in seconds
        #[arg(long, default_value = "60")]
        stats_interval: u64,
    },

    /// Backtest the decision pipeline on historical data
    Backtest {
        /// Engine config whose first user's trading config is used;
        /// defaults apply when omitted
        #[arg(short, long)]
        config: Option<String>,

        /// User whose trading config to borrow from the engine config
        #[arg(short, long)]
        user: Option<String>,

        /// Symbol to backtest
        #[arg(short, long, default_value = "BTC")]
        symbol: String,

        /// Timeframe (1m, 5m, 15m, 1h, 4h, 1d)
        #[arg(short, long, default_value = "15m")]
        timeframe: String,

        /// Directory holding {symbol}_{timeframe}.csv files
        #[arg(short, long, default_value = "data")]
        data_dir: String,

        /// Initial capital
        #[arg(long, default_value = "10000")]
        capital: f64,

        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        start: Option<String>,

        /// End date (YYYY-MM-DD)
        #[arg(long)]
        end: Option<String>,
    },
}

fn setup_logging(verbose: bool, command_name: &str) -> Result<()> {
    std::fs::create_dir_all("logs")?;

    let log_filename = format!(
        "{}_{}.log",
        command_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let log_path = PathBuf::from("logs").join(&log_filename);

    let level = if verbose { "debug" } else { "info" };
    let filter_str = format!(
        "{},hyper=warn,hyper_util=warn,reqwest=warn,rustls=warn,h2=warn",
        level
    );
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    let file_appender = tracing_appender::rolling::never("logs", &log_filename);

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(true);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_appender)
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    info!("Logging initialized");
    info!("Log file: {}", log_path.display());
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let command_name = match &cli.command {
        Commands::Run { .. } => "run",
        Commands::Backtest { .. } => "backtest",
    };
    setup_logging(cli.verbose, command_name)?;

    match cli.command {
        Commands::Run {
            config,
            stats_interval,
        } => commands::run::run(config, stats_interval),

        Commands::Backtest {
            config,
            user,
            symbol,
            timeframe,
            data_dir,
            capital,
            start,
            end,
        } => commands::backtest::run(config, user, symbol, timeframe, data_dir, capital, start, end),
    }
}
