use serde::{Deserialize, Serialize};
use std::{collections::VecDeque, time::Duration};

use crate::storage::StoreError;

/// Kind of songs produced by the yt-dlp lookup.
pub const YT_DLP_KIND: &str = "yt-dlp";

/// A playable unit in a guild queue.
///
/// Songs are never mutated once queued. Resuming an interrupted song builds
/// a new value with an advanced `start_position`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Song {
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub url: String,
    pub playable: bool,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
    #[serde(with = "duration_ms", default)]
    pub start_position: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
}

impl Song {
    pub fn new(kind: impl Into<String>, title: impl Into<String>, url: impl Into<String>, duration: Duration) -> Self {
        Self {
            kind: kind.into(),
            title: title.into(),
            url: url.into(),
            playable: true,
            duration,
            start_position: Duration::ZERO,
            thumbnail_url: None,
        }
    }

    pub fn with_start_position(mut self, start_position: Duration) -> Self {
        self.start_position = start_position;
        self
    }

    pub fn with_thumbnail(mut self, thumbnail_url: String) -> Self {
        self.thumbnail_url = Some(thumbnail_url);
        self
    }

    /// Title when known, otherwise the URL.
    pub fn human_name(&self) -> &str {
        if self.title.is_empty() {
            &self.url
        } else {
            &self.title
        }
    }

    /// Builds the song that continues this one after `position` of playback.
    ///
    /// Returns `None` when the new offset reaches the song duration (when
    /// known), since nothing would be left to play.
    pub fn resumed_at(&self, position: Duration) -> Option<Song> {
        let start = self.start_position.saturating_add(position);
        if !self.duration.is_zero() && start >= self.duration {
            return None;
        }

        Some(self.clone().with_start_position(start))
    }
}

/// The song currently streaming plus its elapsed position.
///
/// `position` is measured from `song.start_position`, so the absolute offset
/// in the track is `start_position + position`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayedSong {
    #[serde(flatten)]
    pub song: Song,
    #[serde(with = "duration_ms", default)]
    pub position: Duration,
}

impl PlayedSong {
    pub fn new(song: Song) -> Self {
        Self {
            song,
            position: Duration::ZERO,
        }
    }

    pub fn at(song: Song, position: Duration) -> Self {
        Self { song, position }
    }
}

/// Full per-guild state: queue, current song and channel bindings.
///
/// This is the persisted layout of the file store and the in-memory layout
/// of the memory store, so both backends share the queue rules below.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistState {
    #[serde(default)]
    pub songs: VecDeque<Song>,
    #[serde(default)]
    pub current_song: Option<PlayedSong>,
    #[serde(default)]
    pub voice_channel: String,
    #[serde(default)]
    pub text_channel: String,
}

impl PlaylistState {
    pub fn append(&mut self, song: Song) {
        self.songs.push_back(song);
    }

    pub fn prepend(&mut self, song: Song) {
        self.songs.push_front(song);
    }

    /// Removes the song at a 1-indexed `position`.
    pub fn remove(&mut self, position: usize) -> Result<Song, StoreError> {
        if position == 0 || position > self.songs.len() {
            return Err(StoreError::InvalidPosition(position));
        }

        self.songs
            .remove(position - 1)
            .ok_or(StoreError::InvalidPosition(position))
    }

    pub fn pop_first(&mut self) -> Result<Song, StoreError> {
        self.songs.pop_front().ok_or(StoreError::NoSongs)
    }

    pub fn clear(&mut self) {
        self.songs.clear();
    }

    pub fn snapshot(&self) -> Vec<Song> {
        self.songs.iter().cloned().collect()
    }
}

/// Durations are stored as whole milliseconds.
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
