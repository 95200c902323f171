use async_trait::async_trait;
use parking_lot::RwLock;

use super::{GuildPlayerState, StoreError};
use crate::audio::queue::{PlayedSong, PlaylistState, Song};

/// Queue store kept in process memory. Lost on restart.
#[derive(Debug, Default)]
pub struct MemoryGuildPlayerState {
    state: RwLock<PlaylistState>,
}

impl MemoryGuildPlayerState {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GuildPlayerState for MemoryGuildPlayerState {
    async fn prepend_song(&self, song: Song) -> Result<(), StoreError> {
        self.state.write().prepend(song);
        Ok(())
    }

    async fn append_song(&self, song: Song) -> Result<(), StoreError> {
        self.state.write().append(song);
        Ok(())
    }

    async fn append_songs(&self, songs: Vec<Song>) -> Result<(), StoreError> {
        self.state.write().songs.extend(songs);
        Ok(())
    }

    async fn remove_song(&self, position: usize) -> Result<Song, StoreError> {
        self.state.write().remove(position)
    }

    async fn clear_playlist(&self) -> Result<(), StoreError> {
        self.state.write().clear();
        Ok(())
    }

    async fn get_songs(&self) -> Result<Vec<Song>, StoreError> {
        Ok(self.state.read().snapshot())
    }

    async fn pop_first_song(&self) -> Result<Song, StoreError> {
        self.state.write().pop_first()
    }

    async fn set_voice_channel(&self, channel_id: &str) -> Result<(), StoreError> {
        self.state.write().voice_channel = channel_id.to_string();
        Ok(())
    }

    async fn get_voice_channel(&self) -> Result<String, StoreError> {
        Ok(self.state.read().voice_channel.clone())
    }

    async fn set_text_channel(&self, channel_id: &str) -> Result<(), StoreError> {
        self.state.write().text_channel = channel_id.to_string();
        Ok(())
    }

    async fn get_text_channel(&self) -> Result<String, StoreError> {
        Ok(self.state.read().text_channel.clone())
    }

    async fn get_current_song(&self) -> Result<Option<PlayedSong>, StoreError> {
        Ok(self.state.read().current_song.clone())
    }

    async fn set_current_song(&self, song: Option<PlayedSong>) -> Result<(), StoreError> {
        self.state.write().current_song = song;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::conformance;
    use std::sync::Arc;

    #[tokio::test]
    async fn memory_store_conformance() {
        let store = MemoryGuildPlayerState::new();
        conformance::run_all(&store).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn memory_store_concurrent_writes() {
        conformance::concurrent_writes(Arc::new(MemoryGuildPlayerState::new())).await;
    }
}
