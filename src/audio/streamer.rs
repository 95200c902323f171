//! Length-prefixed frame container streaming.
//!
//! The container is a plain sequence of `[i16 little-endian length][payload]`
//! records around pre-encoded Opus frames. The payload is opaque here: frames
//! are forwarded as-is onto a bounded channel whose consumer (the voice
//! connection) paces the stream in real time.

use bytes::{Bytes, BytesMut};
use std::{io, time::Duration};
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::session::PositionCallback;

/// Every frame in the container carries 20 ms of audio.
pub const FRAME_DURATION: Duration = Duration::from_millis(20);

/// 50 frames × 20 ms ≈ one position update per second.
pub const DEFAULT_FRAMES_PER_UPDATE: usize = 50;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("invalid frame length {0}")]
    InvalidFrameLength(i16),

    #[error("while reading frame data: {0}")]
    Read(#[source] io::Error),

    #[error("frame receiver closed before the stream ended")]
    ChannelClosed,
}

/// How a stream ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// Input exhausted, every frame was handed to the channel.
    Completed { frames: usize },
    /// Cancellation fired first; remaining input was left unread.
    Cancelled { frames: usize },
}

impl StreamOutcome {
    pub fn frames(&self) -> usize {
        match *self {
            StreamOutcome::Completed { frames } | StreamOutcome::Cancelled { frames } => frames,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FrameStreamer {
    frames_per_update: usize,
    frame_duration: Duration,
}

impl Default for FrameStreamer {
    fn default() -> Self {
        Self::new(DEFAULT_FRAMES_PER_UPDATE)
    }
}

impl FrameStreamer {
    pub fn new(frames_per_update: usize) -> Self {
        Self {
            frames_per_update: frames_per_update.max(1),
            frame_duration: FRAME_DURATION,
        }
    }

    pub fn frames_per_update(&self) -> usize {
        self.frames_per_update
    }

    /// Streams every frame of `reader` into `out`, in order.
    ///
    /// Reads and sends race against `cancel`; once it fires the call returns
    /// [`StreamOutcome::Cancelled`] without draining the input. A clean or
    /// truncated end of input while reading a length prefix ends the stream
    /// normally. A truncated payload or any other read error is returned.
    ///
    /// `on_position` receives `frames_sent × 20 ms` once every
    /// `frames_per_update` frames and must return without blocking.
    pub async fn stream<R>(
        &self,
        cancel: &CancellationToken,
        mut reader: R,
        out: &mpsc::Sender<Bytes>,
        on_position: Option<&PositionCallback>,
    ) -> Result<StreamOutcome, StreamError>
    where
        R: AsyncRead + Unpin,
    {
        let mut sent = 0usize;

        loop {
            let length = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(self.cancelled(sent)),
                length = reader.read_i16_le() => match length {
                    Ok(length) => length,
                    Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                        debug!("frame stream finished after {} frames", sent);
                        return Ok(StreamOutcome::Completed { frames: sent });
                    }
                    Err(e) => return Err(StreamError::Read(e)),
                },
            };

            let length = usize::try_from(length).map_err(|_| StreamError::InvalidFrameLength(length))?;
            let mut frame = BytesMut::zeroed(length);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(self.cancelled(sent)),
                read = reader.read_exact(&mut frame) => {
                    read.map_err(StreamError::Read)?;
                }
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(self.cancelled(sent)),
                delivered = out.send(frame.freeze()) => {
                    if delivered.is_err() {
                        return Err(StreamError::ChannelClosed);
                    }
                }
            }

            sent += 1;
            if let Some(callback) = on_position {
                if sent % self.frames_per_update == 0 {
                    callback(self.position_of(sent));
                }
            }
        }
    }

    fn position_of(&self, frames: usize) -> Duration {
        self.frame_duration
            .saturating_mul(u32::try_from(frames).unwrap_or(u32::MAX))
    }

    fn cancelled(&self, frames: usize) -> StreamOutcome {
        debug!("frame stream cancelled after {} frames", frames);
        StreamOutcome::Cancelled { frames }
    }
}

/// Builds a frame container from raw payloads.
#[cfg(test)]
pub(crate) fn encode_frames<I, F>(frames: I) -> Vec<u8>
where
    I: IntoIterator<Item = F>,
    F: AsRef<[u8]>,
{
    let mut container = Vec::new();
    for frame in frames {
        let frame = frame.as_ref();
        let length = i16::try_from(frame.len()).unwrap();
        container.extend_from_slice(&length.to_le_bytes());
        container.extend_from_slice(frame);
    }
    container
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::{
        io::Cursor,
        pin::Pin,
        sync::Arc,
        task::{Context, Poll},
        time::Instant,
    };
    use tokio::io::ReadBuf;

    fn numbered_frames(count: usize) -> Vec<Vec<u8>> {
        (0..count).map(|i| format!("frame-{i}").into_bytes()).collect()
    }

    async fn collect(mut rx: mpsc::Receiver<Bytes>) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        while let Some(frame) = rx.recv().await {
            frames.push(frame.to_vec());
        }
        frames
    }

    #[tokio::test]
    async fn delivers_every_frame_in_order() {
        let frames = numbered_frames(7);
        let (tx, rx) = mpsc::channel(16);

        let outcome = FrameStreamer::default()
            .stream(&CancellationToken::new(), Cursor::new(encode_frames(&frames)), &tx, None)
            .await
            .unwrap();
        drop(tx);

        assert_eq!(outcome, StreamOutcome::Completed { frames: 7 });
        assert_eq!(collect(rx).await, frames);
    }

    #[tokio::test]
    async fn truncated_length_prefix_ends_normally() {
        let mut container = encode_frames(numbered_frames(2));
        container.push(0x05);
        let (tx, rx) = mpsc::channel(16);

        let outcome = FrameStreamer::default()
            .stream(&CancellationToken::new(), Cursor::new(container), &tx, None)
            .await
            .unwrap();
        drop(tx);

        assert_eq!(outcome, StreamOutcome::Completed { frames: 2 });
        assert_eq!(collect(rx).await.len(), 2);
    }

    #[tokio::test]
    async fn truncated_payload_is_an_error() {
        let mut container = encode_frames(numbered_frames(1));
        container.extend_from_slice(&10i16.to_le_bytes());
        container.extend_from_slice(b"abc");
        let (tx, _rx) = mpsc::channel(16);

        let err = FrameStreamer::default()
            .stream(&CancellationToken::new(), Cursor::new(container), &tx, None)
            .await
            .unwrap_err();

        assert!(matches!(err, StreamError::Read(e) if e.kind() == io::ErrorKind::UnexpectedEof));
    }

    #[tokio::test]
    async fn negative_length_is_rejected() {
        let container = (-4i16).to_le_bytes().to_vec();
        let (tx, _rx) = mpsc::channel(16);

        let err = FrameStreamer::default()
            .stream(&CancellationToken::new(), Cursor::new(container), &tx, None)
            .await
            .unwrap_err();

        assert!(matches!(err, StreamError::InvalidFrameLength(-4)));
    }

    struct BrokenReader;

    impl AsyncRead for BrokenReader {
        fn poll_read(self: Pin<&mut Self>, _cx: &mut Context<'_>, _buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipeline died")))
        }
    }

    #[tokio::test]
    async fn read_errors_are_propagated() {
        let (tx, _rx) = mpsc::channel(16);

        let err = FrameStreamer::default()
            .stream(&CancellationToken::new(), BrokenReader, &tx, None)
            .await
            .unwrap_err();

        assert!(matches!(err, StreamError::Read(e) if e.kind() == io::ErrorKind::BrokenPipe));
    }

    #[tokio::test]
    async fn closed_receiver_is_an_error() {
        let (tx, rx) = mpsc::channel(16);
        drop(rx);

        let err = FrameStreamer::default()
            .stream(&CancellationToken::new(), Cursor::new(encode_frames(numbered_frames(3))), &tx, None)
            .await
            .unwrap_err();

        assert!(matches!(err, StreamError::ChannelClosed));
    }

    #[tokio::test]
    async fn cancelled_before_start_sends_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (tx, rx) = mpsc::channel(16);

        let outcome = FrameStreamer::default()
            .stream(&cancel, Cursor::new(encode_frames(numbered_frames(5))), &tx, None)
            .await
            .unwrap();
        drop(tx);

        assert_eq!(outcome, StreamOutcome::Cancelled { frames: 0 });
        assert!(collect(rx).await.is_empty());
    }

    #[tokio::test]
    async fn cancellation_unblocks_a_full_channel() {
        let cancel = CancellationToken::new();
        let (tx, _rx) = mpsc::channel(2);

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let started = Instant::now();
        let outcome = tokio::time::timeout(
            Duration::from_secs(2),
            FrameStreamer::default().stream(&cancel, Cursor::new(encode_frames(numbered_frames(100))), &tx, None),
        )
        .await
        .expect("cancellation should end the stream")
        .unwrap();

        assert_eq!(outcome, StreamOutcome::Cancelled { frames: 2 });
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn position_callback_fires_once_per_batch() {
        let positions = Arc::new(Mutex::new(Vec::new()));
        let recorded = positions.clone();
        let callback: PositionCallback = Arc::new(move |position| recorded.lock().push(position));

        let (tx, rx) = mpsc::channel(256);
        let outcome = FrameStreamer::default()
            .stream(
                &CancellationToken::new(),
                Cursor::new(encode_frames(numbered_frames(120))),
                &tx,
                Some(&callback),
            )
            .await
            .unwrap();
        drop(tx);

        assert_eq!(outcome.frames(), 120);
        assert_eq!(collect(rx).await.len(), 120);
        assert_eq!(*positions.lock(), vec![Duration::from_secs(1), Duration::from_secs(2)]);
    }

    #[tokio::test]
    async fn custom_batch_size_changes_cadence() {
        let positions = Arc::new(Mutex::new(Vec::new()));
        let recorded = positions.clone();
        let callback: PositionCallback = Arc::new(move |position| recorded.lock().push(position));

        let (tx, _rx) = mpsc::channel(64);
        FrameStreamer::new(10)
            .stream(
                &CancellationToken::new(),
                Cursor::new(encode_frames(numbered_frames(35))),
                &tx,
                Some(&callback),
            )
            .await
            .unwrap();

        assert_eq!(
            *positions.lock(),
            vec![
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(600)
            ]
        );
    }
}
