mod config;
mod hub;
mod identity;
mod message;
mod quote;
mod relay;
mod router;
mod server;
mod transport;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use teloxide::prelude::*;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,rp_relay=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let bot = Bot::new(&config.telegram.bot_token);
    let me = bot
        .get_me()
        .await
        .context("Failed to reach the Telegram API with the hub bot token")?;
    info!("Hub bot: @{}", me.username());
    info!("Public hostname: {}", config.server.public_hostname);
    info!("Webhook server: {}", config.server.bind_addr);

    let hub = Arc::new(hub::Hub {
        bot: bot.clone(),
        username: me.username().to_string(),
        public_hostname: config.server.public_hostname.clone(),
    });
    let state = Arc::new(server::AppState::new(bot));

    // The hub dispatcher handles registration; the webhook server handles
    // the registered character bots. Either one exiting is fatal.
    tokio::try_join!(hub::run(hub), server::run(state, &config.server.bind_addr))?;

    Ok(())
}
