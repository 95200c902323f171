use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fmt, path::PathBuf, str::FromStr, time::Duration};
use thiserror::Error;

use crate::audio::streamer::{FrameStreamer, DEFAULT_FRAMES_PER_UPDATE};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub guild_id: Option<u64>, // development guild for slash commands
    pub command_prefix: String,

    pub store: StoreConfig,
    pub player: PlayerConfig,
    pub stream: StreamConfig,
}

/// Queue store backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Memory,
    File,
}

#[derive(Debug, Error)]
#[error("unknown store type {0:?}, expected memory or file")]
pub struct UnknownStoreKind(String);

impl FromStr for StoreKind {
    type Err = UnknownStoreKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreKind::Memory),
            "file" => Ok(StoreKind::File),
            _ => Err(UnknownStoreKind(s.to_string())),
        }
    }
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreKind::Memory => f.write_str("memory"),
            StoreKind::File => f.write_str("file"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct StoreConfig {
    pub kind: StoreKind,
    /// Holds one `<guild_id>.json` per guild for the file backend.
    pub dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::Memory,
            dir: "./playlist".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PlayerConfig {
    /// Read buffer placed in front of every frame source.
    pub audio_buffer_size: usize,
    /// Pause between two songs.
    pub song_gap: Duration,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            audio_buffer_size: 1024 * 1024, // 1 MiB
            song_gap: Duration::from_millis(250),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct StreamConfig {
    pub frame_channel_capacity: usize,
    pub frames_per_update: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            frame_channel_capacity: 32,
            frames_per_update: DEFAULT_FRAMES_PER_UPDATE,
        }
    }
}

impl StreamConfig {
    pub fn streamer(&self) -> FrameStreamer {
        FrameStreamer::new(self.frames_per_update)
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any variable lookup, then validates it.
    pub fn from_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = Self {
            discord_token: lookup("AIR_DISCORD_TOKEN").context("AIR_DISCORD_TOKEN must be set")?,
            guild_id: match lookup("AIR_GUILD_ID") {
                Some(id) if !id.trim().is_empty() => {
                    Some(id.trim().parse().context("invalid value for AIR_GUILD_ID")?)
                }
                _ => None,
            },
            command_prefix: lookup("AIR_COMMAND_PREFIX").unwrap_or_else(|| "air".to_string()),

            store: StoreConfig {
                kind: parse_var(&lookup, "AIR_STORE_TYPE", "memory")?,
                dir: lookup("AIR_STORE_DIR")
                    .unwrap_or_else(|| "./playlist".to_string())
                    .into(),
            },

            player: PlayerConfig {
                audio_buffer_size: parse_var(&lookup, "AIR_AUDIO_BUFFER_SIZE", "1048576")?,
                song_gap: Duration::from_millis(parse_var(&lookup, "AIR_SONG_GAP_MS", "250")?),
            },

            stream: StreamConfig {
                frame_channel_capacity: parse_var(&lookup, "AIR_FRAME_CHANNEL_CAPACITY", "32")?,
                frames_per_update: parse_var(&lookup, "AIR_POSITION_UPDATE_FRAMES", "50")?,
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Rejects values the player cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.discord_token.trim().is_empty() {
            anyhow::bail!("Discord token must not be empty");
        }

        if self.player.audio_buffer_size == 0 {
            anyhow::bail!("Audio buffer size must be greater than 0");
        }

        if self.stream.frame_channel_capacity == 0 {
            anyhow::bail!("Frame channel capacity must be greater than 0");
        }

        if self.stream.frames_per_update == 0 {
            anyhow::bail!("Position update cadence must be at least 1 frame");
        }

        if self.store.kind == StoreKind::File && self.store.dir.as_os_str().is_empty() {
            anyhow::bail!("AIR_STORE_DIR must be set for the file store");
        }

        Ok(())
    }

    /// Token-free summary for logging.
    pub fn summary(&self) -> String {
        let store = match self.store.kind {
            StoreKind::Memory => "memory".to_string(),
            StoreKind::File => format!("file ({})", self.store.dir.display()),
        };

        format!(
            "Config Summary:\n  \
            Discord: prefix {} (Guild: {})\n  \
            Store: {}\n  \
            Audio: {} KiB buffer, {} frame channel, update every {} frames, {}ms gap",
            self.command_prefix,
            self.guild_id.map_or("global".to_string(), |id| id.to_string()),
            store,
            self.player.audio_buffer_size / 1024,
            self.stream.frame_channel_capacity,
            self.stream.frames_per_update,
            self.player.song_gap.as_millis(),
        )
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: &str) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(key)
        .unwrap_or_else(|| default.to_string())
        .trim()
        .parse()
        .with_context(|| format!("invalid value for {key}"))
}
