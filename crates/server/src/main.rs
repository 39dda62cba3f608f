mod bootstrap;
mod controller;
mod crm;
mod notify;
mod scheduler;
mod sessions;

use std::sync::Arc;

use anyhow::Result;
use leadbot_core::config::{AppConfig, LoadOptions};
use leadbot_telegram::UpdateHandler;

use crate::bootstrap::BotRuntime;

fn init_logging(config: &AppConfig) {
    use leadbot_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

async fn run() -> Result<()> {
    // Load config and initialize logging before any other operations
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    for BotRuntime { bot_id, poller, controller } in app.bots {
        let handler: Arc<dyn UpdateHandler> = controller;
        tracing::info!(bot_id = %bot_id, "starting update poller");
        tokio::spawn(async move {
            poller.run(handler).await;
        });
    }

    tracing::info!("leadbot-server started");
    wait_for_shutdown().await?;
    tracing::info!("leadbot-server stopping");

    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
