// src/main.rs

use std::time::Duration;

use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use elara::config::Config;
use elara::Services;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();

    let level = config.log_level.parse().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting Elara companion core");
    info!("Model: {}", config.oracle_model);
    info!("Database: {}", config.database_url);

    let sweep_interval = Duration::from_secs(config.compression_sweep_secs);
    let services = Services::from_config(config).await?;

    // The REST shell mounts on top of `services.chat`; the core itself only
    // runs the maintenance loop that keeps long conversations bounded.
    let sweeper = tokio::spawn(compression_sweep(services.clone(), sweep_interval));
    info!(
        "Compression sweeper started - running every {} seconds",
        sweep_interval.as_secs()
    );

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
        _ = sweeper => {
            error!("Compression sweeper unexpectedly terminated");
        }
    }

    Ok(())
}

/// Periodically compress any pair whose active history grew past the
/// threshold.
async fn compression_sweep(services: Services, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let threshold = services.config.compression_threshold;
        let pairs = match services.history.pairs_over_threshold(threshold).await {
            Ok(pairs) => pairs,
            Err(e) => {
                warn!("compression sweep query failed: {}", e);
                continue;
            }
        };
        if pairs.is_empty() {
            continue;
        }

        info!(pairs = pairs.len(), "compression sweep found oversized conversations");
        for (character_id, user_id) in pairs {
            let character = match services.characters.fetch(&character_id).await {
                Ok(Some(character)) => character,
                Ok(None) => continue,
                Err(e) => {
                    warn!("sweep character fetch failed: {}", e);
                    continue;
                }
            };
            match services.compression.compress(&character, &user_id).await {
                Ok(report) => info!(
                    character_id = %character_id,
                    compressed = report.original_messages,
                    "sweep compressed conversation"
                ),
                Err(e) => warn!(character_id = %character_id, "sweep compression failed: {}", e),
            }
        }
    }
}
