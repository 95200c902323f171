use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tokio::{
    io::BufReader,
    sync::{mpsc, watch, Mutex},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    queue::{PlayedSong, Song},
    session::{FrameReader, MessageHandle, PlayMessage, PositionCallback, VoiceSession},
};
use crate::{
    config::PlayerConfig,
    sources::FrameSource,
    storage::{GuildPlayerState, StoreError},
};

#[derive(Debug, Error)]
pub enum PlayerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("while {operation}: {source}")]
    Session {
        operation: &'static str,
        source: anyhow::Error,
    },

    #[error("while getting frame data for {title}: {source}")]
    FrameSource { title: String, source: anyhow::Error },

    #[error("no voice channel is bound")]
    NoVoiceChannel,

    #[error("player is already running")]
    AlreadyRunning,
}

impl PlayerError {
    fn session(operation: &'static str, source: anyhow::Error) -> Self {
        PlayerError::Session { operation, source }
    }

    pub fn is_invalid_position(&self) -> bool {
        matches!(self, PlayerError::Store(StoreError::InvalidPosition(_)))
    }

    pub fn is_no_songs(&self) -> bool {
        matches!(self, PlayerError::Store(StoreError::NoSongs))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerCommand {
    Play,
    Join,
    Leave,
}

/// Instruction for the run loop, with optional channel bindings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    pub command: TriggerCommand,
    pub voice_channel_id: Option<String>,
    pub text_channel_id: Option<String>,
}

impl Trigger {
    pub fn play(text_channel_id: Option<String>, voice_channel_id: Option<String>) -> Self {
        Self {
            command: TriggerCommand::Play,
            voice_channel_id,
            text_channel_id,
        }
    }

    pub fn join(voice_channel_id: String, text_channel_id: String) -> Self {
        Self {
            command: TriggerCommand::Join,
            voice_channel_id: Some(voice_channel_id),
            text_channel_id: Some(text_channel_id),
        }
    }

    pub fn leave() -> Self {
        Self {
            command: TriggerCommand::Leave,
            voice_channel_id: None,
            text_channel_id: None,
        }
    }
}

/// Playback state machine for one guild.
///
/// Control methods only touch the queue store and post triggers; the single
/// [`GuildPlayer::run`] loop owns the voice connection and streams songs one
/// at a time. Skip and stop cancel the in-flight song's token, which is a
/// child of the run loop's token and never cancels the loop itself.
pub struct GuildPlayer {
    guild_id: String,
    state: Arc<dyn GuildPlayerState>,
    session: Arc<dyn VoiceSession>,
    frames: Arc<dyn FrameSource>,
    config: PlayerConfig,

    triggers_tx: mpsc::UnboundedSender<Trigger>,
    triggers_rx: Mutex<mpsc::UnboundedReceiver<Trigger>>,
    song_cancel: parking_lot::Mutex<Option<CancellationToken>>,
}

impl GuildPlayer {
    pub(crate) fn new(
        guild_id: impl Into<String>,
        state: Arc<dyn GuildPlayerState>,
        session: Arc<dyn VoiceSession>,
        frames: Arc<dyn FrameSource>,
        config: PlayerConfig,
    ) -> Self {
        let (triggers_tx, triggers_rx) = mpsc::unbounded_channel();

        Self {
            guild_id: guild_id.into(),
            state,
            session,
            frames,
            config,
            triggers_tx,
            triggers_rx: Mutex::new(triggers_rx),
            song_cancel: parking_lot::Mutex::new(None),
        }
    }

    pub fn guild_id(&self) -> &str {
        &self.guild_id
    }

    /// Queues songs and asks the run loop to start playing.
    pub async fn add_song(
        &self,
        text_channel_id: Option<&str>,
        voice_channel_id: Option<&str>,
        songs: Vec<Song>,
    ) -> Result<(), PlayerError> {
        if songs.is_empty() {
            return Ok(());
        }

        let count = songs.len();
        self.state.append_songs(songs).await?;
        debug!("➕ Queued {} song(s)", count);

        self.post(Trigger::play(
            text_channel_id.map(str::to_string),
            voice_channel_id.map(str::to_string),
        ));
        Ok(())
    }

    /// Cancels the song being streamed, if any.
    pub fn skip_song(&self) {
        if let Some(cancel) = self.song_cancel.lock().as_ref() {
            cancel.cancel();
        }
    }

    /// Empties the queue and cancels the song being streamed.
    pub async fn stop(&self) -> Result<(), PlayerError> {
        self.state.clear_playlist().await?;
        self.skip_song();
        Ok(())
    }

    /// Removes the song at a 1-indexed queue position.
    pub async fn remove_song(&self, position: usize) -> Result<Song, PlayerError> {
        Ok(self.state.remove_song(position).await?)
    }

    /// Human-readable names of the queued songs, in play order.
    pub async fn get_playlist(&self) -> Result<Vec<String>, PlayerError> {
        let songs = self.state.get_songs().await?;
        Ok(songs.iter().map(|song| song.human_name().to_string()).collect())
    }

    pub async fn get_played_song(&self) -> Result<Option<PlayedSong>, PlayerError> {
        Ok(self.state.get_current_song().await?)
    }

    pub fn join_voice_channel(&self, voice_channel_id: &str, text_channel_id: &str) {
        self.post(Trigger::join(voice_channel_id.to_string(), text_channel_id.to_string()));
    }

    pub fn leave_voice_channel(&self) {
        self.post(Trigger::leave());
    }

    /// Posts a plain message to the bound text channel. Failures are logged.
    pub async fn send_message(&self, text: &str) {
        let channel = match self.state.get_text_channel().await {
            Ok(channel) if !channel.is_empty() => channel,
            Ok(_) => {
                warn!("No text channel bound, dropping message");
                return;
            }
            Err(err) => {
                error!("Failed to get text channel: {}", err);
                return;
            }
        };

        if let Err(err) = self.session.send_message(&channel, text).await {
            error!("Failed to send message: {:#}", err);
        }
    }

    /// Cancels the current song and closes the voice session.
    pub async fn close(&self) -> Result<(), PlayerError> {
        self.skip_song();
        self.session
            .close()
            .await
            .map_err(|source| PlayerError::session("closing session", source))
    }

    /// Runs the trigger loop until `shutdown` fires.
    ///
    /// A song left current by a previous run is queued again first, advanced
    /// by its recorded position. Failures while playing are logged and the
    /// loop goes back to waiting for triggers.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), PlayerError> {
        let mut triggers = self
            .triggers_rx
            .try_lock()
            .map_err(|_| PlayerError::AlreadyRunning)?;

        if let Err(err) = self.resume_current_song().await {
            warn!("Failed to restore the interrupted song: {}", err);
        }

        if !self.state.get_songs().await?.is_empty() {
            let voice_channel = self.state.get_voice_channel().await?;
            let text_channel = self.state.get_text_channel().await?;
            self.post(Trigger::play(non_empty(text_channel), non_empty(voice_channel)));
        }

        info!("🎧 Guild player started");

        loop {
            let trigger = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                trigger = triggers.recv() => match trigger {
                    Some(trigger) => trigger,
                    None => break,
                },
            };

            debug!("Received {:?} trigger", trigger.command);
            if let Err(err) = self.handle_trigger(&shutdown, trigger).await {
                error!("❌ Playback failed: {}", err);
            }
        }

        info!("🛑 Guild player stopped");
        Ok(())
    }

    fn post(&self, trigger: Trigger) {
        if self.triggers_tx.send(trigger).is_err() {
            debug!("Trigger dropped, player is gone");
        }
    }

    async fn resume_current_song(&self) -> Result<(), StoreError> {
        let Some(played) = self.state.get_current_song().await? else {
            return Ok(());
        };

        match played.song.resumed_at(played.position) {
            Some(song) => {
                info!(
                    "⏯️ Resuming {} at {:?}",
                    song.human_name(),
                    song.start_position
                );
                self.state.prepend_song(song).await?;
            }
            None => debug!("Interrupted song {} had already finished", played.song.human_name()),
        }

        self.state.set_current_song(None).await
    }

    async fn bind_channels(&self, trigger: &Trigger) -> Result<(), StoreError> {
        if let Some(text) = &trigger.text_channel_id {
            self.state.set_text_channel(text).await?;
        }
        if let Some(voice) = &trigger.voice_channel_id {
            self.state.set_voice_channel(voice).await?;
        }
        Ok(())
    }

    async fn handle_trigger(&self, shutdown: &CancellationToken, trigger: Trigger) -> Result<(), PlayerError> {
        match trigger.command {
            TriggerCommand::Play => {
                self.bind_channels(&trigger).await?;

                if self.state.get_songs().await?.is_empty() {
                    debug!("Playlist is empty, nothing to play");
                    return Ok(());
                }

                self.play_playlist(shutdown).await
            }
            TriggerCommand::Join => {
                self.bind_channels(&trigger).await?;

                let voice_channel = self.state.get_voice_channel().await?;
                if voice_channel.is_empty() {
                    return Err(PlayerError::NoVoiceChannel);
                }

                if !self.state.get_songs().await?.is_empty() {
                    return self.play_playlist(shutdown).await;
                }

                self.session
                    .join_voice_channel(&voice_channel)
                    .await
                    .map_err(|source| PlayerError::session("joining voice channel", source))
            }
            TriggerCommand::Leave => self
                .session
                .leave_voice_channel()
                .await
                .map_err(|source| PlayerError::session("leaving voice channel", source)),
        }
    }

    async fn play_playlist(&self, shutdown: &CancellationToken) -> Result<(), PlayerError> {
        let voice_channel = self.state.get_voice_channel().await?;
        if voice_channel.is_empty() {
            return Err(PlayerError::NoVoiceChannel);
        }
        let text_channel = self.state.get_text_channel().await?;

        debug!("Joining voice channel {}", voice_channel);
        self.session
            .join_voice_channel(&voice_channel)
            .await
            .map_err(|source| PlayerError::session("joining voice channel", source))?;

        let result = self.play_songs(shutdown, &text_channel).await;

        debug!("Leaving voice channel {}", voice_channel);
        if let Err(err) = self.session.leave_voice_channel().await {
            error!("Failed to leave voice channel: {:#}", err);
        }

        result
    }

    async fn play_songs(&self, shutdown: &CancellationToken, text_channel: &str) -> Result<(), PlayerError> {
        loop {
            if shutdown.is_cancelled() {
                return Ok(());
            }

            // Installed before popping so a stop racing the pop still cancels the song.
            let cancel = shutdown.child_token();
            *self.song_cancel.lock() = Some(cancel.clone());

            let song = match self.state.pop_first_song().await {
                Ok(song) => song,
                Err(StoreError::NoSongs) => {
                    debug!("Playlist is empty");
                    return Ok(());
                }
                Err(err) => return Err(err.into()),
            };

            let played = self.play_song(&cancel, text_channel, &song).await;

            // Interrupted by shutdown: keep the current song for the next run.
            if shutdown.is_cancelled() {
                return played;
            }

            let cleared = self.state.set_current_song(None).await;
            played?;
            cleared?;

            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.config.song_gap) => {}
            }
        }
    }

    async fn play_song(&self, cancel: &CancellationToken, text_channel: &str, song: &Song) -> Result<(), PlayerError> {
        self.state.set_current_song(Some(PlayedSong::new(song.clone()))).await?;
        info!("▶️ Playing {} ({})", song.human_name(), song.url);

        let handle = self
            .session
            .send_play_message(text_channel, &PlayMessage::new(song.clone()))
            .await
            .map_err(|source| PlayerError::session("sending now playing message", source))?;

        let reader = match self.frames.frame_data(cancel.clone(), song).await {
            Ok(reader) => reader,
            Err(_) if cancel.is_cancelled() => {
                debug!("Skipped {} before audio started", song.human_name());
                return Ok(());
            }
            Err(source) => {
                return Err(PlayerError::FrameSource {
                    title: song.human_name().to_string(),
                    source,
                })
            }
        };
        let reader: FrameReader = Box::new(BufReader::with_capacity(self.config.audio_buffer_size, reader));

        let (position_tx, position_rx) = watch::channel(Duration::ZERO);
        let position_tx = Arc::new(position_tx);
        let on_position: PositionCallback = {
            let position_tx = position_tx.clone();
            Arc::new(move |position| {
                position_tx.send_replace(position);
            })
        };

        let updates_done = CancellationToken::new();
        let updater = tokio::spawn(track_position(
            self.state.clone(),
            self.session.clone(),
            handle,
            song.clone(),
            position_rx,
            updates_done.clone(),
        ));

        debug!("Sending audio stream");
        let sent = self.session.send_audio(cancel.clone(), reader, on_position).await;

        updates_done.cancel();
        if let Err(err) = updater.await {
            warn!("Position updater failed: {}", err);
        }

        match sent {
            Ok(()) if cancel.is_cancelled() => {
                info!("⏭️ Skipped {}", song.human_name());
                Ok(())
            }
            Ok(()) => {
                debug!("Finished {}", song.human_name());
                Ok(())
            }
            Err(err) if cancel.is_cancelled() => {
                debug!("Audio stream ended by cancellation: {:#}", err);
                Ok(())
            }
            Err(source) => Err(PlayerError::session("sending audio", source)),
        }
    }
}

/// Persists each position tick and refreshes the now playing message.
///
/// Ticks arriving faster than the store and session keep up are coalesced.
/// Once `done` fires, a pending tick is still flushed.
async fn track_position(
    state: Arc<dyn GuildPlayerState>,
    session: Arc<dyn VoiceSession>,
    handle: MessageHandle,
    song: Song,
    mut positions: watch::Receiver<Duration>,
    done: CancellationToken,
) {
    loop {
        tokio::select! {
            changed = positions.changed() => {
                if changed.is_err() {
                    return;
                }
            }
            _ = done.cancelled() => {
                if !positions.has_changed().unwrap_or(false) {
                    return;
                }
            }
        }

        let position = *positions.borrow_and_update();

        if let Err(err) = state
            .set_current_song(Some(PlayedSong::at(song.clone(), position)))
            .await
        {
            error!("Failed to store current song position: {}", err);
        }

        if let Err(err) = session
            .edit_play_message(&handle, &PlayMessage::at(song.clone(), position))
            .await
        {
            error!("Failed to edit now playing message: {:#}", err);
        }
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}
