use anyhow::Result;
use clap::Parser;
use rand::Rng;
use std::time::Duration;
use tracing::{error, info, warn};

mod config;
mod db;
mod engine;
mod kalshi;
mod market;
mod signals;
mod tracker;

use config::Config;
use db::Database;
use engine::Engine;
use kalshi::KalshiClient;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing / logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    config.validate()?;

    if config.dry_run() {
        info!("🟡 DRY RUN mode – no real orders will be placed");
    } else {
        info!("🔴 LIVE mode – real orders WILL be placed on Kalshi");
    }

    // Open the trade log
    let db = Database::open(&config.database_path)?;
    info!("Trade log opened: {}", config.database_path);

    let kalshi = KalshiClient::new(&config.kalshi_api_url, config.kalshi_api_key.clone())?;

    // Settlement-check mode: reconcile and report, then exit.
    if config.check_settlements {
        tracker::check_and_report(&db, &kalshi).await?;
        return Ok(());
    }

    match kalshi.get_balance().await {
        Ok(balance) => {
            info!("Account balance: ${:.2}", balance);
            if config.live && balance < 10.0 {
                warn!("Low balance; consider adding funds before live trading");
            }
        }
        // Balance needs auth; a dry run without a key still works.
        Err(e) => warn!("Could not fetch account balance: {:#}", e),
    }

    let mut engine = Engine::new(config.clone(), db, kalshi)?;

    if config.run_continuous {
        info!(
            "Running continuously, {}s between cycles{}",
            config.poll_interval_secs,
            config
                .duration_minutes
                .map(|m| format!(" for {} minutes", m))
                .unwrap_or_default()
        );
        let deadline = config
            .duration_minutes
            .map(|m| tokio::time::Instant::now() + Duration::from_secs(m * 60));
        let mut poll = tokio::time::interval(Duration::from_secs(config.poll_interval_secs));

        loop {
            tokio::select! {
                _ = poll.tick() => {
                    // Small jitter so parallel instances (one per city) never
                    // hit the APIs in lockstep.
                    let jitter = rand::thread_rng().gen_range(0..750);
                    tokio::time::sleep(Duration::from_millis(jitter)).await;

                    if let Err(e) = engine.run_cycle().await {
                        error!("Cycle failed: {:#}", e);
                    }
                    if deadline.is_some_and(|d| tokio::time::Instant::now() >= d) {
                        info!("Duration reached, stopping");
                        break;
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted, shutting down");
                    break;
                }
            }
        }
    } else {
        info!("Running single pass...");
        if let Err(e) = engine.run_cycle().await {
            error!("Cycle failed: {:#}", e);
        }
    }

    engine.log_status();
    engine.shutdown().await?;
    info!("Done.");
    Ok(())
}
