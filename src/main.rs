use anyhow::{Context, Result};
use serenity::{http::Http, model::gateway::GatewayIntents, Client};
use songbird::{SerenityInit, Songbird};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use airplay::{
    bot::{AirplayBot, DiscordSessions, PlayerRegistry},
    config::Config,
    sources::{youtube::verify_dependencies, FrameSourceRouter},
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("airplay=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    if std::env::args().any(|arg| arg == "--health-check") {
        verify_dependencies().await?;
        println!("OK");
        return Ok(());
    }

    info!("🎵 Starting Airplay v{}", env!("CARGO_PKG_VERSION"));

    let config = Arc::new(Config::load()?);
    info!("{}", config.summary());

    let songbird = Songbird::serenity();
    let http = Arc::new(Http::new(&config.discord_token));
    let shutdown = CancellationToken::new();

    let registry = Arc::new(PlayerRegistry::new(
        Arc::new(DiscordSessions::new(http, songbird.clone(), config.stream.clone())),
        Arc::new(FrameSourceRouter::with_defaults()),
        config.store.clone(),
        config.player.clone(),
        shutdown.clone(),
    ));

    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;

    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(AirplayBot::new(config.clone(), registry.clone()))
        .register_songbird_with(songbird)
        .await
        .context("while building Discord client")?;

    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", err);
            return;
        }

        info!("⚠️ Shutdown signal received, stopping players...");
        shutdown.cancel();
        registry.shutdown_all().await;
        shard_manager.shutdown_all().await;
    });

    info!("🚀 Bot started");
    client.start().await.context("while running Discord client")?;

    Ok(())
}
