use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::{fs, sync::Mutex};
use tracing::debug;

use super::{GuildPlayerState, StoreError};
use crate::audio::queue::{PlayedSong, PlaylistState, Song};

/// Queue store backed by one JSON document per guild.
///
/// Every operation is a read-modify-write of the whole document under an
/// exclusive lock. Writes go to a sibling temp file that is renamed over the
/// document, so a reader never observes a partially written state.
#[derive(Debug)]
pub struct FileGuildPlayerState {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileGuildPlayerState {
    /// Opens the document at `path`, creating an empty one when missing.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = Self {
            path: path.into(),
            lock: Mutex::new(()),
        };

        let exists = fs::try_exists(&store.path)
            .await
            .map_err(|source| io_error(&store.path, source))?;

        if exists {
            // Fail early on a corrupt document instead of on the first command.
            store.read().await?;
        } else {
            debug!("creating empty playlist file {}", store.path.display());
            store.write(&PlaylistState::default()).await?;
        }

        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> Result<PlaylistState, StoreError> {
        let content = fs::read(&self.path)
            .await
            .map_err(|source| io_error(&self.path, source))?;

        if content.iter().all(u8::is_ascii_whitespace) {
            return Ok(PlaylistState::default());
        }

        serde_json::from_slice(&content).map_err(|source| StoreError::Decode {
            path: self.path.clone(),
            source,
        })
    }

    async fn write(&self, state: &PlaylistState) -> Result<(), StoreError> {
        let content = serde_json::to_vec_pretty(state).map_err(StoreError::Encode)?;

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content)
            .await
            .map_err(|source| io_error(&tmp, source))?;
        fs::rename(&tmp, &self.path)
            .await
            .map_err(|source| io_error(&self.path, source))
    }

    /// Applies `change` and persists the result. Nothing is written when
    /// `change` fails.
    async fn update<T, F>(&self, change: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut PlaylistState) -> Result<T, StoreError> + Send,
        T: Send,
    {
        let _guard = self.lock.lock().await;

        let mut state = self.read().await?;
        let output = change(&mut state)?;
        self.write(&state).await?;

        Ok(output)
    }

    async fn view<T, F>(&self, select: F) -> Result<T, StoreError>
    where
        F: FnOnce(PlaylistState) -> T + Send,
    {
        let _guard = self.lock.lock().await;
        Ok(select(self.read().await?))
    }
}

fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[async_trait]
impl GuildPlayerState for FileGuildPlayerState {
    async fn prepend_song(&self, song: Song) -> Result<(), StoreError> {
        self.update(|state| {
            state.prepend(song);
            Ok(())
        })
        .await
    }

    async fn append_song(&self, song: Song) -> Result<(), StoreError> {
        self.update(|state| {
            state.append(song);
            Ok(())
        })
        .await
    }

    async fn append_songs(&self, songs: Vec<Song>) -> Result<(), StoreError> {
        self.update(|state| {
            state.songs.extend(songs);
            Ok(())
        })
        .await
    }

    async fn remove_song(&self, position: usize) -> Result<Song, StoreError> {
        self.update(|state| state.remove(position)).await
    }

    async fn clear_playlist(&self) -> Result<(), StoreError> {
        self.update(|state| {
            state.clear();
            Ok(())
        })
        .await
    }

    async fn get_songs(&self) -> Result<Vec<Song>, StoreError> {
        self.view(|state| state.songs.into_iter().collect()).await
    }

    async fn pop_first_song(&self) -> Result<Song, StoreError> {
        self.update(|state| state.pop_first()).await
    }

    async fn set_voice_channel(&self, channel_id: &str) -> Result<(), StoreError> {
        let channel_id = channel_id.to_string();
        self.update(|state| {
            state.voice_channel = channel_id;
            Ok(())
        })
        .await
    }

    async fn get_voice_channel(&self) -> Result<String, StoreError> {
        self.view(|state| state.voice_channel).await
    }

    async fn set_text_channel(&self, channel_id: &str) -> Result<(), StoreError> {
        let channel_id = channel_id.to_string();
        self.update(|state| {
            state.text_channel = channel_id;
            Ok(())
        })
        .await
    }

    async fn get_text_channel(&self) -> Result<String, StoreError> {
        self.view(|state| state.text_channel).await
    }

    async fn get_current_song(&self) -> Result<Option<PlayedSong>, StoreError> {
        self.view(|state| state.current_song).await
    }

    async fn set_current_song(&self, song: Option<PlayedSong>) -> Result<(), StoreError> {
        self.update(|state| {
            state.current_song = song;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::conformance::{self, song};
    use pretty_assertions::assert_eq;
    use std::{sync::Arc, time::Duration};

    #[tokio::test]
    async fn file_store_conformance() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileGuildPlayerState::open(dir.path().join("guild.json")).await.unwrap();
        conformance::run_all(&store).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn file_store_concurrent_writes() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileGuildPlayerState::open(dir.path().join("guild.json")).await.unwrap();
        conformance::concurrent_writes(Arc::new(store)).await;

        let reopened = FileGuildPlayerState::open(dir.path().join("guild.json")).await.unwrap();
        assert_eq!(reopened.get_songs().await.unwrap().len(), 20);
    }

    #[tokio::test]
    async fn state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guild.json");

        let played = PlayedSong::at(song("current"), Duration::from_secs(42));
        {
            let store = FileGuildPlayerState::open(&path).await.unwrap();
            store.append_songs(vec![song("a"), song("b")]).await.unwrap();
            store.set_current_song(Some(played.clone())).await.unwrap();
            store.set_voice_channel("voice").await.unwrap();
            store.set_text_channel("text").await.unwrap();
        }

        let reopened = FileGuildPlayerState::open(&path).await.unwrap();
        assert_eq!(reopened.get_songs().await.unwrap(), vec![song("a"), song("b")]);
        assert_eq!(reopened.get_current_song().await.unwrap(), Some(played));
        assert_eq!(reopened.get_voice_channel().await.unwrap(), "voice");
        assert_eq!(reopened.get_text_channel().await.unwrap(), "text");
    }

    #[tokio::test]
    async fn document_has_the_persisted_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guild.json");
        let store = FileGuildPlayerState::open(&path).await.unwrap();
        store.append_song(song("a")).await.unwrap();
        store.set_text_channel("text").await.unwrap();

        let value: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(value["songs"][0]["title"], "a");
        assert_eq!(value["current_song"], serde_json::Value::Null);
        assert_eq!(value["voice_channel"], "");
        assert_eq!(value["text_channel"], "text");
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn invalid_remove_leaves_document_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guild.json");
        let store = FileGuildPlayerState::open(&path).await.unwrap();
        store.append_songs(vec![song("a"), song("b")]).await.unwrap();
        let before = std::fs::read(&path).unwrap();

        assert!(matches!(store.remove_song(3).await, Err(StoreError::InvalidPosition(3))));
        assert!(matches!(store.remove_song(0).await, Err(StoreError::InvalidPosition(0))));

        assert_eq!(std::fs::read(&path).unwrap(), before);
    }

    #[tokio::test]
    async fn empty_file_reads_as_empty_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guild.json");
        std::fs::write(&path, "").unwrap();

        let store = FileGuildPlayerState::open(&path).await.unwrap();
        assert!(store.get_songs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guild.json");
        std::fs::write(&path, "{not json").unwrap();

        let err = FileGuildPlayerState::open(&path).await.unwrap_err();
        assert!(matches!(err, StoreError::Decode { .. }));
    }
}
