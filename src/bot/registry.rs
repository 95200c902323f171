use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

use crate::{
    audio::{player::GuildPlayer, session::VoiceSession},
    config::{PlayerConfig, StoreConfig},
    sources::FrameSource,
    storage,
};

/// Opens the voice/text session backing a guild player.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open_session(&self, guild_id: &str) -> Result<Arc<dyn VoiceSession>>;
}

struct PlayerEntry {
    player: Arc<GuildPlayer>,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

/// Owns every guild player: created when the bot joins a guild, torn down
/// when it leaves. Each player's run loop gets a child of the registry's
/// shutdown token.
pub struct PlayerRegistry {
    players: DashMap<String, PlayerEntry>,
    sessions: Arc<dyn SessionFactory>,
    frames: Arc<dyn FrameSource>,
    store: StoreConfig,
    player_config: PlayerConfig,
    shutdown: CancellationToken,
}

impl PlayerRegistry {
    pub fn new(
        sessions: Arc<dyn SessionFactory>,
        frames: Arc<dyn FrameSource>,
        store: StoreConfig,
        player_config: PlayerConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            players: DashMap::new(),
            sessions,
            frames,
            store,
            player_config,
            shutdown,
        }
    }

    /// Returns the guild's player, starting one if needed.
    pub async fn create(&self, guild_id: &str) -> Result<Arc<GuildPlayer>> {
        if let Some(player) = self.get(guild_id) {
            return Ok(player);
        }

        let state = storage::open(&self.store, guild_id)
            .await
            .with_context(|| format!("while opening queue store for guild {guild_id}"))?;
        let session = self
            .sessions
            .open_session(guild_id)
            .await
            .with_context(|| format!("while opening voice session for guild {guild_id}"))?;

        let player = Arc::new(GuildPlayer::new(
            guild_id,
            state,
            session,
            self.frames.clone(),
            self.player_config.clone(),
        ));

        let raced = match self.players.entry(guild_id.to_string()) {
            Entry::Occupied(entry) => Some(entry.get().player.clone()),
            Entry::Vacant(entry) => {
                let shutdown = self.shutdown.child_token();
                let task = tokio::spawn(run_player(player.clone(), shutdown.clone()).instrument(info_span!(
                    "guild_player",
                    guild_id = %guild_id
                )));

                entry.insert(PlayerEntry {
                    player: player.clone(),
                    shutdown,
                    task,
                });
                None
            }
        };

        match raced {
            Some(existing) => {
                if let Err(err) = player.close().await {
                    warn!("Failed to close duplicate player for guild {}: {}", guild_id, err);
                }
                Ok(existing)
            }
            None => {
                info!("🎧 Player created for guild {}", guild_id);
                Ok(player)
            }
        }
    }

    pub fn get(&self, guild_id: &str) -> Option<Arc<GuildPlayer>> {
        self.players.get(guild_id).map(|entry| entry.player.clone())
    }

    /// Stops the guild's run loop and closes its session.
    ///
    /// Returns `false` when no player exists for the guild.
    pub async fn destroy(&self, guild_id: &str) -> Result<bool> {
        let Some((_, entry)) = self.players.remove(guild_id) else {
            return Ok(false);
        };

        entry.shutdown.cancel();
        if let Err(err) = entry.task.await {
            error!("Player task for guild {} failed: {}", guild_id, err);
        }

        entry
            .player
            .close()
            .await
            .with_context(|| format!("while closing player for guild {guild_id}"))?;

        info!("👋 Player destroyed for guild {}", guild_id);
        Ok(true)
    }

    /// Destroys every player, logging failures.
    pub async fn shutdown_all(&self) {
        let guilds: Vec<String> = self.players.iter().map(|entry| entry.key().clone()).collect();

        for guild_id in guilds {
            if let Err(err) = self.destroy(&guild_id).await {
                error!("{:#}", err);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}

async fn run_player(player: Arc<GuildPlayer>, shutdown: CancellationToken) {
    if let Err(err) = player.run(shutdown).await {
        error!("❌ Guild player exited: {}", err);
    }
}
