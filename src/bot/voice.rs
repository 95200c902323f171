use anyhow::{bail, Context as _, Result};
use async_trait::async_trait;
use serenity::{
    all::{ChannelId, GuildId, MessageId},
    builder::{CreateMessage, EditMessage},
    http::Http,
};
use songbird::{Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{dca::DcaSource, registry::SessionFactory};
use crate::{
    audio::{
        session::{FrameReader, MessageHandle, PlayMessage, PositionCallback, VoiceSession},
        streamer::{StreamError, StreamOutcome},
    },
    config::StreamConfig,
    ui::embeds::create_now_playing_embed,
};

/// Opens songbird-backed sessions for the registry.
pub struct DiscordSessions {
    http: Arc<Http>,
    songbird: Arc<Songbird>,
    stream: StreamConfig,
}

impl DiscordSessions {
    pub fn new(http: Arc<Http>, songbird: Arc<Songbird>, stream: StreamConfig) -> Self {
        Self { http, songbird, stream }
    }
}

#[async_trait]
impl SessionFactory for DiscordSessions {
    async fn open_session(&self, guild_id: &str) -> Result<Arc<dyn VoiceSession>> {
        let guild_id = GuildId::new(parse_id(guild_id, "guild")?);

        Ok(Arc::new(DiscordVoiceSession {
            guild_id,
            http: self.http.clone(),
            songbird: self.songbird.clone(),
            stream: self.stream.clone(),
        }))
    }
}

pub struct DiscordVoiceSession {
    guild_id: GuildId,
    http: Arc<Http>,
    songbird: Arc<Songbird>,
    stream: StreamConfig,
}

/// Wakes `send_audio` when songbird ends or drops the track.
struct TrackEnded(Arc<Notify>);

#[async_trait]
impl VoiceEventHandler for TrackEnded {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<Event> {
        self.0.notify_one();
        None
    }
}

fn parse_id(raw: &str, what: &str) -> Result<u64> {
    let id: u64 = raw
        .parse()
        .with_context(|| format!("invalid {what} id {raw:?}"))?;
    if id == 0 {
        bail!("invalid {what} id 0");
    }
    Ok(id)
}

fn channel_id(raw: &str) -> Result<ChannelId> {
    Ok(ChannelId::new(parse_id(raw, "channel")?))
}

#[async_trait]
impl VoiceSession for DiscordVoiceSession {
    async fn close(&self) -> Result<()> {
        if self.songbird.get(self.guild_id).is_some() {
            self.songbird
                .remove(self.guild_id)
                .await
                .context("while leaving voice on close")?;
        }
        Ok(())
    }

    async fn send_message(&self, channel: &str, text: &str) -> Result<()> {
        channel_id(channel)?
            .say(&self.http, text)
            .await
            .context("while sending message")?;
        Ok(())
    }

    async fn send_play_message(&self, channel: &str, message: &PlayMessage) -> Result<MessageHandle> {
        let sent = channel_id(channel)?
            .send_message(
                &self.http,
                CreateMessage::new().embed(create_now_playing_embed(message)),
            )
            .await
            .context("while sending now playing message")?;

        Ok(MessageHandle::new(channel, sent.id.get().to_string()))
    }

    async fn edit_play_message(&self, handle: &MessageHandle, message: &PlayMessage) -> Result<()> {
        let message_id = MessageId::new(parse_id(&handle.message_id, "message")?);

        channel_id(&handle.channel_id)?
            .edit_message(
                &self.http,
                message_id,
                EditMessage::new().embed(create_now_playing_embed(message)),
            )
            .await
            .context("while editing now playing message")?;
        Ok(())
    }

    async fn join_voice_channel(&self, channel: &str) -> Result<()> {
        let channel = channel_id(channel)?;

        self.songbird
            .join(self.guild_id, channel)
            .await
            .with_context(|| format!("while joining voice channel {channel}"))?;

        info!("🔊 Connected to voice channel {} in guild {}", channel, self.guild_id);
        Ok(())
    }

    async fn leave_voice_channel(&self) -> Result<()> {
        self.songbird
            .remove(self.guild_id)
            .await
            .context("while leaving voice channel")?;

        info!("👋 Disconnected from voice in guild {}", self.guild_id);
        Ok(())
    }

    async fn send_audio(
        &self,
        cancel: CancellationToken,
        frames: FrameReader,
        on_position: PositionCallback,
    ) -> Result<()> {
        let call = self
            .songbird
            .get(self.guild_id)
            .context("not connected to a voice channel")?;

        let (tx, rx) = mpsc::channel(self.stream.frame_channel_capacity);
        let ended = Arc::new(Notify::new());

        let track = {
            let mut call = call.lock().await;
            call.play_input(DcaSource::new(rx).into_input())
        };
        track
            .add_event(Event::Track(TrackEvent::End), TrackEnded(ended.clone()))
            .context("while watching track end")?;
        track
            .add_event(Event::Track(TrackEvent::Error), TrackEnded(ended.clone()))
            .context("while watching track errors")?;

        let outcome = self
            .stream
            .streamer()
            .stream(&cancel, frames, &tx, Some(&on_position))
            .await;
        drop(tx);

        match outcome {
            Ok(StreamOutcome::Completed { frames }) => {
                debug!("All {} frames queued, waiting for playback to end", frames);
                tokio::select! {
                    _ = ended.notified() => {}
                    _ = cancel.cancelled() => stop_track(&track),
                }
                Ok(())
            }
            Ok(StreamOutcome::Cancelled { .. }) => {
                stop_track(&track);
                Ok(())
            }
            Err(StreamError::ChannelClosed) => bail!("voice track ended before the stream finished"),
            Err(err) => {
                stop_track(&track);
                Err(err).context("while streaming frames")
            }
        }
    }
}

fn stop_track(track: &songbird::tracks::TrackHandle) {
    if let Err(err) = track.stop() {
        warn!("Failed to stop track: {}", err);
    }
}
