//! Run command
//!
//! Boots a bot per configured user, logs aggregate stats on an interval,
//! and shuts every bot down cleanly on Ctrl+C.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{error, info};

use perpbot::config::EngineConfig;
use perpbot::registry::BotRegistry;
use perpbot::signal::TrendScoreAnalyzer;

pub fn run(config_path: String, stats_interval_secs: u64) -> Result<()> {
    dotenv::dotenv().ok();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    runtime.block_on(run_async(config_path, stats_interval_secs))
}

async fn run_async(config_path: String, stats_interval_secs: u64) -> Result<()> {
    let config = EngineConfig::from_file(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;

    info!(
        users = config.users.len(),
        state_dir = %config.state_dir,
        "starting trading engine"
    );

    let registry = Arc::new(BotRegistry::new(
        Arc::new(TrendScoreAnalyzer),
        config.risk.clone(),
        config.state_dir.clone(),
    ));

    for profile in &config.users {
        match registry.get_or_create(profile).await {
            Ok(_) => {
                registry.start(&profile.user_id).await?;
                info!(
                    user = %profile.user_id,
                    symbols = ?profile.config.symbols,
                    mode = ?profile.config.mode,
                    "bot running"
                );
            }
            Err(e) => {
                // One bad profile must not take the engine down
                error!(user = %profile.user_id, error = %e, "failed to start bot");
            }
        }
    }

    let stats_registry = Arc::clone(&registry);
    let stats_task = tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(stats_interval_secs.max(1)));
        ticker.tick().await; // first tick fires immediately, skip it
        loop {
            ticker.tick().await;
            let stats = stats_registry.global_stats().await;
            info!(
                bots = stats.total_bots,
                running = stats.running_bots,
                trades_today = stats.trades_today,
                pnl_today = stats.pnl_today,
                "engine stats"
            );
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    info!("shutdown requested, stopping all bots");

    stats_task.abort();
    registry.stop_all().await;
    info!("all bots stopped");
    Ok(())
}
