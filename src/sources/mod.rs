//! # Frame Sources
//!
//! A frame source turns a queued [`Song`] into a length-prefixed frame
//! container (see [`crate::audio::streamer`]). Sources are picked by the
//! song's `kind`, so new backends only need a [`FrameSource`] impl and a
//! registration in [`FrameSourceRouter`].

pub mod youtube;

use anyhow::bail;
use async_trait::async_trait;
use std::{collections::HashMap, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::audio::{
    queue::{Song, YT_DLP_KIND},
    session::FrameReader,
};

pub use youtube::YouTubeClient;

/// Produces the frame container for a song.
///
/// May block on external processes. `cancel` fires when the song is skipped
/// before or while the data is produced.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FrameSource: Send + Sync {
    async fn frame_data(&self, cancel: CancellationToken, song: &Song) -> anyhow::Result<FrameReader>;
}

/// Dispatches to the source registered for `Song::kind`.
#[derive(Default)]
pub struct FrameSourceRouter {
    sources: HashMap<String, Arc<dyn FrameSource>>,
}

impl FrameSourceRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, kind: impl Into<String>, source: Arc<dyn FrameSource>) -> Self {
        self.sources.insert(kind.into(), source);
        self
    }

    /// Router with every built-in source registered.
    pub fn with_defaults() -> Self {
        Self::new().with_source(YT_DLP_KIND, Arc::new(YouTubeClient::new()))
    }
}

#[async_trait]
impl FrameSource for FrameSourceRouter {
    async fn frame_data(&self, cancel: CancellationToken, song: &Song) -> anyhow::Result<FrameReader> {
        let Some(source) = self.sources.get(&song.kind) else {
            bail!("unknown song type {}", song.kind);
        };

        debug!("🎼 Fetching frames for {} via {}", song.human_name(), song.kind);
        source.frame_data(cancel, song).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{io::Cursor, time::Duration};
    use tokio::io::AsyncReadExt;

    fn song(kind: &str) -> Song {
        Song::new(kind, "Song", "https://example.com/song", Duration::from_secs(60))
    }

    #[tokio::test]
    async fn routes_by_song_kind() {
        let mut source = MockFrameSource::new();
        source
            .expect_frame_data()
            .withf(|_, song| song.kind == "test")
            .times(1)
            .returning(|_, _| Ok(Box::new(Cursor::new(b"frames".to_vec())) as FrameReader));

        let router = FrameSourceRouter::new().with_source("test", Arc::new(source));
        let mut reader = router.frame_data(CancellationToken::new(), &song("test")).await.unwrap();

        let mut data = Vec::new();
        reader.read_to_end(&mut data).await.unwrap();
        assert_eq!(data, b"frames");
    }

    #[tokio::test]
    async fn unknown_kind_is_rejected() {
        let router = FrameSourceRouter::new();
        let err = router
            .frame_data(CancellationToken::new(), &song("soundcloud"))
            .await
            .err()
            .unwrap();

        assert_eq!(err.to_string(), "unknown song type soundcloud");
    }

    #[tokio::test]
    async fn source_errors_pass_through() {
        let mut source = MockFrameSource::new();
        source
            .expect_frame_data()
            .returning(|_, _| Err(anyhow::anyhow!("yt-dlp exited with status 1")));

        let router = FrameSourceRouter::new().with_source(YT_DLP_KIND, Arc::new(source));
        let err = router
            .frame_data(CancellationToken::new(), &song(YT_DLP_KIND))
            .await
            .err()
            .unwrap();

        assert_eq!(err.to_string(), "yt-dlp exited with status 1");
    }
}
