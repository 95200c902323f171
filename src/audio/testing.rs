//! In-process doubles for player and registry tests.

use anyhow::bail;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    io::Cursor,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{
    queue::{Song, YT_DLP_KIND},
    session::{FrameReader, MessageHandle, PlayMessage, PositionCallback, VoiceSession},
    streamer::{encode_frames, FrameStreamer, StreamOutcome},
};
use crate::sources::{FrameSource, MockFrameSource};

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Joined(String),
    Left,
    Message { channel: String, text: String },
    NowPlaying { channel: String, title: String },
    Edited { title: String, position: Duration },
    Closed,
}

/// Frames delivered by one `send_audio` call.
#[derive(Debug, Clone)]
pub struct Stream {
    pub frames: Vec<Bytes>,
    pub outcome: StreamOutcome,
}

impl Stream {
    /// Payload prefix shared by every frame of a [`song_frames`] container.
    pub fn title(&self) -> Option<String> {
        let first = self.frames.first()?;
        let text = String::from_utf8_lossy(first);
        text.rsplit_once('#').map(|(title, _)| title.to_string())
    }
}

/// Voice session that streams through a real [`FrameStreamer`] into a
/// consumer delaying every frame, standing in for real-time pacing.
pub struct RecordingSession {
    streamer: FrameStreamer,
    frame_delay: Duration,
    events: Mutex<Vec<SessionEvent>>,
    streams: Mutex<Vec<Stream>>,
    fail_join: AtomicBool,
    next_message: Mutex<u64>,
}

impl RecordingSession {
    pub fn new(frame_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            streamer: FrameStreamer::default(),
            frame_delay,
            events: Mutex::new(Vec::new()),
            streams: Mutex::new(Vec::new()),
            fail_join: AtomicBool::new(false),
            next_message: Mutex::new(0),
        })
    }

    pub fn fail_joins(&self, fail: bool) {
        self.fail_join.store(fail, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<SessionEvent> {
        self.events.lock().clone()
    }

    pub fn streams(&self) -> Vec<Stream> {
        self.streams.lock().clone()
    }

    pub fn played_titles(&self) -> Vec<String> {
        self.streams.lock().iter().filter_map(Stream::title).collect()
    }

    pub fn count(&self, matches: impl Fn(&SessionEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|event| matches(event)).count()
    }

    fn record(&self, event: SessionEvent) {
        self.events.lock().push(event);
    }
}

#[async_trait]
impl VoiceSession for RecordingSession {
    async fn close(&self) -> anyhow::Result<()> {
        self.record(SessionEvent::Closed);
        Ok(())
    }

    async fn send_message(&self, channel_id: &str, text: &str) -> anyhow::Result<()> {
        self.record(SessionEvent::Message {
            channel: channel_id.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn send_play_message(&self, channel_id: &str, message: &PlayMessage) -> anyhow::Result<MessageHandle> {
        self.record(SessionEvent::NowPlaying {
            channel: channel_id.to_string(),
            title: message.song.title.clone(),
        });

        let mut next = self.next_message.lock();
        *next += 1;
        Ok(MessageHandle::new(channel_id, next.to_string()))
    }

    async fn edit_play_message(&self, _handle: &MessageHandle, message: &PlayMessage) -> anyhow::Result<()> {
        self.record(SessionEvent::Edited {
            title: message.song.title.clone(),
            position: message.position,
        });
        Ok(())
    }

    async fn join_voice_channel(&self, channel_id: &str) -> anyhow::Result<()> {
        if self.fail_join.load(Ordering::SeqCst) {
            bail!("voice gateway unavailable");
        }
        self.record(SessionEvent::Joined(channel_id.to_string()));
        Ok(())
    }

    async fn leave_voice_channel(&self) -> anyhow::Result<()> {
        self.record(SessionEvent::Left);
        Ok(())
    }

    async fn send_audio(
        &self,
        cancel: CancellationToken,
        frames: FrameReader,
        on_position: PositionCallback,
    ) -> anyhow::Result<()> {
        let (tx, mut rx) = mpsc::channel::<Bytes>(4);
        let streamer = self.streamer;
        let delay = self.frame_delay;

        let producer = async move {
            let outcome = streamer.stream(&cancel, frames, &tx, Some(&on_position)).await;
            drop(tx);
            outcome
        };
        let consumer = async move {
            let mut received = Vec::new();
            while let Some(frame) = rx.recv().await {
                received.push(frame);
                tokio::time::sleep(delay).await;
            }
            received
        };

        let (outcome, frames) = tokio::join!(producer, consumer);
        let outcome = outcome?;
        self.streams.lock().push(Stream { frames, outcome });
        Ok(())
    }
}

/// Frame container whose payloads read `<title>#<index>`.
pub fn song_frames(title: &str, count: usize) -> Vec<u8> {
    encode_frames((0..count).map(|i| format!("{title}#{i}")))
}

pub fn song(title: &str) -> Song {
    Song::new(YT_DLP_KIND, title, format!("https://youtu.be/{title}"), Duration::from_secs(200))
}

/// Frame source serving a fixed number of frames per title, failing for
/// titles listed in `broken`. Every requested song is recorded.
pub fn frame_source(
    frame_counts: HashMap<String, usize>,
    broken: &[&str],
    requested: Arc<Mutex<Vec<Song>>>,
) -> Arc<dyn FrameSource> {
    let broken: Vec<String> = broken.iter().map(|title| title.to_string()).collect();
    let mut source = MockFrameSource::new();

    source.expect_frame_data().returning(move |_, song| {
        requested.lock().push(song.clone());
        if broken.contains(&song.title) {
            bail!("yt-dlp exited with status 1");
        }

        let count = frame_counts.get(&song.title).copied().unwrap_or(10);
        Ok(Box::new(Cursor::new(song_frames(&song.title, count))) as FrameReader)
    });

    Arc::new(source)
}

/// Polls `condition` until it holds, panicking after a few seconds.
pub async fn eventually(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
