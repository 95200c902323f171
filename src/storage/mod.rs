//! # Storage Module
//!
//! Durable per-guild queue state for the guild players.
//!
//! Every guild owns one [`GuildPlayerState`]: the ordered song queue, the
//! song currently streaming and the last bound voice/text channels. Two
//! interchangeable backends implement it:
//!
//! - [`memory::MemoryGuildPlayerState`] keeps everything in process memory
//! - [`file::FileGuildPlayerState`] rewrites one JSON document per guild
//!
//! Both apply the same [`PlaylistState`](crate::audio::queue::PlaylistState)
//! rules, so swapping the backend never changes queue semantics.
//!
//! ```env
//! AIR_STORE_TYPE=file        # memory | file
//! AIR_STORE_DIR=./playlist   # <guild_id>.json per guild
//! ```

pub mod file;
pub mod memory;

use async_trait::async_trait;
use std::{path::PathBuf, sync::Arc};
use thiserror::Error;
use tracing::info;

use crate::{
    audio::queue::{PlayedSong, Song},
    config::{StoreConfig, StoreKind},
};

pub use file::FileGuildPlayerState;
pub use memory::MemoryGuildPlayerState;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The queue is empty. Expected when the play loop drains the queue.
    #[error("no songs available")]
    NoSongs,

    /// A 1-indexed position outside the current queue.
    #[error("invalid position {0}")]
    InvalidPosition(usize),

    #[error("while accessing {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("while decoding state from {}: {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("while encoding state: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Queue store contract for one guild.
///
/// All mutation goes through these operations. Each call is atomic on its
/// own; there are no multi-call transactions.
#[async_trait]
pub trait GuildPlayerState: Send + Sync {
    /// Adds a song at the head of the queue. Only used to resume playback.
    async fn prepend_song(&self, song: Song) -> Result<(), StoreError>;

    async fn append_song(&self, song: Song) -> Result<(), StoreError>;

    async fn append_songs(&self, songs: Vec<Song>) -> Result<(), StoreError> {
        for song in songs {
            self.append_song(song).await?;
        }
        Ok(())
    }

    /// Removes the song at the 1-indexed `position`.
    async fn remove_song(&self, position: usize) -> Result<Song, StoreError>;

    /// Empties the queue, leaving the current song and channels untouched.
    async fn clear_playlist(&self) -> Result<(), StoreError>;

    /// Snapshot of the queue in play order.
    async fn get_songs(&self) -> Result<Vec<Song>, StoreError>;

    async fn pop_first_song(&self) -> Result<Song, StoreError>;

    async fn set_voice_channel(&self, channel_id: &str) -> Result<(), StoreError>;
    async fn get_voice_channel(&self) -> Result<String, StoreError>;

    async fn set_text_channel(&self, channel_id: &str) -> Result<(), StoreError>;
    async fn get_text_channel(&self) -> Result<String, StoreError>;

    /// `None` means nothing is playing.
    async fn get_current_song(&self) -> Result<Option<PlayedSong>, StoreError>;
    async fn set_current_song(&self, song: Option<PlayedSong>) -> Result<(), StoreError>;
}

/// Opens the configured backend for a guild.
pub async fn open(config: &StoreConfig, guild_id: &str) -> Result<Arc<dyn GuildPlayerState>, StoreError> {
    match config.kind {
        StoreKind::Memory => Ok(Arc::new(MemoryGuildPlayerState::new())),
        StoreKind::File => {
            tokio::fs::create_dir_all(&config.dir)
                .await
                .map_err(|source| StoreError::Io {
                    path: config.dir.clone(),
                    source,
                })?;

            let path = config.dir.join(format!("{guild_id}.json"));
            let store = FileGuildPlayerState::open(path).await?;
            info!("📁 File store opened for guild {}", guild_id);
            Ok(Arc::new(store))
        }
    }
}
