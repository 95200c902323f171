//! # Audio Module
//!
//! Per-guild playback core of Airplay.
//!
//! ## Architecture
//!
//! ### [`queue`] - Data model
//! - `Song`, `PlayedSong` and the per-guild `PlaylistState`
//! - FIFO queue rules with 1-indexed positions
//!
//! ### [`streamer`] - Audio Frame Streamer
//! - Decodes the `[i16 LE length][payload]` frame container
//! - Bounded channel output with cooperative cancellation
//! - Position callback every N frames (50 × 20 ms ≈ 1 s)
//!
//! ### [`session`] - Voice Session contract
//! - Join/leave voice, messages, audio delivery
//!
//! ### [`player`] - Guild Player
//! - Trigger-driven run loop, one per guild
//! - Skip/stop through a per-song cancellation token
//! - Resume of the interrupted song after a restart
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use airplay::audio::queue::{Song, YT_DLP_KIND};
//! use std::time::Duration;
//!
//! # async fn example(player: &airplay::audio::player::GuildPlayer) -> anyhow::Result<()> {
//! let song = Song::new(YT_DLP_KIND, "Song", "https://youtu.be/dQw4w9WgXcQ", Duration::from_secs(212));
//! player.add_song(Some("text-channel"), Some("voice-channel"), vec![song]).await?;
//! player.skip_song();
//! # Ok(())
//! # }
//! ```

pub mod player;
pub mod queue;
pub mod session;
pub mod streamer;

#[cfg(test)]
pub(crate) mod testing;

pub use player::{GuildPlayer, PlayerError, Trigger, TriggerCommand};
pub use queue::{PlayedSong, Song};
pub use session::{FrameReader, MessageHandle, PlayMessage, PositionCallback, VoiceSession};
pub use streamer::{FrameStreamer, StreamError, StreamOutcome};
