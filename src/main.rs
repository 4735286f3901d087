//! kappabot - a Twitch chat bot.
//!
//! Connects to the Twitch Messaging Interface, joins its rooms, and runs
//! per-room plugins behind ACL checks.

mod acl;
mod bot;
mod client;
mod config;
mod db;
mod dictionary;
mod dispatcher;
mod error;
mod plugin;
mod queue;
mod room;
mod sender;
mod signal;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::bot::Bot;
use crate::config::Config;
use crate::plugin::PluginRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());

    let config = Config::load(&config_path).map_err(|e| {
        error!(path = %config_path, error = %e, "failed to load config");
        e
    })?;

    info!(
        username = %config.account.username,
        server = %config.server.host,
        "starting kappabot"
    );

    let bot = Bot::new(config, PluginRegistry::builtin()).await?;
    bot.run().await?;

    info!("kappabot stopped");
    Ok(())
}
