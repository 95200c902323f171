//! Contract between a guild player and the chat/voice platform.

use async_trait::async_trait;
use std::{sync::Arc, time::Duration};
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;

use super::queue::Song;

/// Receives the elapsed play time of the current song. Must not block.
pub type PositionCallback = Arc<dyn Fn(Duration) + Send + Sync>;

/// A frame container stream, as produced by a frame source.
pub type FrameReader = Box<dyn AsyncRead + Send + Unpin>;

/// Opaque reference to a posted "now playing" message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageHandle {
    pub channel_id: String,
    pub message_id: String,
}

impl MessageHandle {
    pub fn new(channel_id: impl Into<String>, message_id: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            message_id: message_id.into(),
        }
    }
}

/// Content of a "now playing" message.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayMessage {
    pub song: Song,
    /// Elapsed time inside the current play, not counting `song.start_position`.
    pub position: Duration,
}

impl PlayMessage {
    pub fn new(song: Song) -> Self {
        Self {
            song,
            position: Duration::ZERO,
        }
    }

    pub fn at(song: Song, position: Duration) -> Self {
        Self { song, position }
    }

    /// Absolute offset into the song.
    pub fn elapsed(&self) -> Duration {
        self.song.start_position + self.position
    }
}

/// One voice/text connection scoped to a guild.
///
/// `send_audio` consumes the whole frame container and returns once it is
/// exhausted, once `cancel` fires (returning `Ok`) or on failure.
#[async_trait]
pub trait VoiceSession: Send + Sync {
    async fn close(&self) -> anyhow::Result<()>;

    async fn send_message(&self, channel_id: &str, text: &str) -> anyhow::Result<()>;

    async fn send_play_message(&self, channel_id: &str, message: &PlayMessage) -> anyhow::Result<MessageHandle>;

    async fn edit_play_message(&self, handle: &MessageHandle, message: &PlayMessage) -> anyhow::Result<()>;

    async fn join_voice_channel(&self, channel_id: &str) -> anyhow::Result<()>;

    async fn leave_voice_channel(&self) -> anyhow::Result<()>;

    async fn send_audio(
        &self,
        cancel: CancellationToken,
        frames: FrameReader,
        on_position: PositionCallback,
    ) -> anyhow::Result<()>;
}
