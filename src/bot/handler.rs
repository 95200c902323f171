use serenity::{
    all::{ActivityData, Context, EventHandler, Guild, Ready, UnavailableGuild},
    async_trait,
};
use std::sync::Arc;
use tracing::{error, info};

use super::registry::PlayerRegistry;
use crate::config::Config;

/// Gateway handler: one guild player per guild the bot is in.
pub struct AirplayBot {
    config: Arc<Config>,
    registry: Arc<PlayerRegistry>,
}

impl AirplayBot {
    pub fn new(config: Arc<Config>, registry: Arc<PlayerRegistry>) -> Self {
        Self { config, registry }
    }
}

#[async_trait]
impl EventHandler for AirplayBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} is online", ready.user.name);
        info!("📊 Connected to {} guilds", ready.guilds.len());

        ctx.set_activity(Some(ActivityData::listening(format!("/{}", self.config.command_prefix))));
    }

    async fn guild_create(&self, _ctx: Context, guild: Guild, _is_new: Option<bool>) {
        if let Some(only) = self.config.guild_id {
            if guild.id.get() != only {
                return;
            }
        }

        if let Err(err) = self.registry.create(&guild.id.to_string()).await {
            error!("Failed to start player for guild {}: {:#}", guild.id, err);
        }
    }

    async fn guild_delete(&self, _ctx: Context, incomplete: UnavailableGuild, _full: Option<Guild>) {
        // Outages also emit guild_delete; only tear down when the bot was removed.
        if incomplete.unavailable {
            return;
        }

        if let Err(err) = self.registry.destroy(&incomplete.id.to_string()).await {
            error!("Failed to stop player for guild {}: {:#}", incomplete.id, err);
        }
    }
}
