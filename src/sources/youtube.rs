use anyhow::{bail, Context, Result};
use async_process::{Child, ChildStdout, Command, Stdio};
use async_trait::async_trait;
use std::{
    io,
    pin::Pin,
    task::{Context as TaskContext, Poll},
    time::Duration,
};
use tokio::io::{AsyncRead, ReadBuf};
use tokio_util::{
    compat::{Compat, FuturesAsyncReadCompatExt},
    sync::CancellationToken,
};
use tracing::{debug, info};

use super::FrameSource;
use crate::audio::{
    queue::{Song, YT_DLP_KIND},
    session::FrameReader,
};

/// Fields requested from `yt-dlp --print`, one output line each.
const LOOKUP_FIELDS: [&str; 5] = ["title", "original_url", "is_live", "duration", "thumbnail"];

/// yt-dlp metadata lookup and the `yt-dlp | ffmpeg | dca` pipeline.
#[derive(Debug, Clone, Default)]
pub struct YouTubeClient;

impl YouTubeClient {
    pub fn new() -> Self {
        Self
    }

    /// Resolves a URL or free-text query into playable songs.
    pub async fn lookup_songs(&self, input: &str) -> Result<Vec<Song>> {
        info!("🔍 Looking up: {}", input);

        let output = Command::new("yt-dlp")
            .args(lookup_args(input))
            .output()
            .await
            .context("while executing yt-dlp to get metadata")?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            bail!("yt-dlp error: {}", error.trim());
        }

        Ok(parse_lookup_output(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn spawn_pipeline(&self, song: &Song) -> Result<PipelineReader> {
        let mut ytdlp = spawn("yt-dlp", &download_args(song), Stdio::null())?;
        let ytdlp_out = take_stdout(&mut ytdlp, "yt-dlp")?.into_stdio().await?;

        let mut ffmpeg = spawn("ffmpeg", &transcode_args(song), ytdlp_out)?;
        let ffmpeg_out = take_stdout(&mut ffmpeg, "ffmpeg")?.into_stdio().await?;

        let mut dca = spawn("dca", &[], ffmpeg_out)?;
        let stdout = take_stdout(&mut dca, "dca")?;

        Ok(PipelineReader {
            stdout: stdout.compat(),
            _children: vec![ytdlp, ffmpeg, dca],
        })
    }
}

/// Checks that every pipeline stage is installed.
pub async fn verify_dependencies() -> Result<()> {
    for (program, flag) in [("yt-dlp", "--version"), ("ffmpeg", "-version")] {
        let output = Command::new(program)
            .arg(flag)
            .output()
            .await
            .with_context(|| format!("{program} is not installed or not in PATH"))?;

        if !output.status.success() {
            bail!("{program} cannot be executed");
        }
        debug!("✅ {} found", program);
    }

    // dca has no version flag.
    let which = Command::new("which")
        .arg("dca")
        .output()
        .await
        .context("while looking up dca")?;
    if !which.status.success() {
        bail!("dca is not installed or not in PATH");
    }
    debug!("✅ dca found");

    Ok(())
}

#[async_trait]
impl FrameSource for YouTubeClient {
    async fn frame_data(&self, cancel: CancellationToken, song: &Song) -> Result<FrameReader> {
        if cancel.is_cancelled() {
            bail!("cancelled before fetching {}", song.human_name());
        }

        debug!("🎵 Starting yt-dlp pipeline for {}", song.url);
        let reader = self.spawn_pipeline(song).await?;
        Ok(Box::new(reader))
    }
}

fn spawn(program: &str, args: &[String], stdin: impl Into<Stdio>) -> Result<Child> {
    Command::new(program)
        .args(args)
        .stdin(stdin)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("while spawning {program}"))
}

fn take_stdout(child: &mut Child, program: &str) -> Result<ChildStdout> {
    child
        .stdout
        .take()
        .with_context(|| format!("{program} stdout is not piped"))
}

/// Reads the last stage's output; dropping it kills every stage.
struct PipelineReader {
    stdout: Compat<ChildStdout>,
    _children: Vec<Child>,
}

impl AsyncRead for PipelineReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stdout).poll_read(cx, buf)
    }
}

fn lookup_args(input: &str) -> Vec<String> {
    let target = if input.starts_with("https://") {
        input.to_string()
    } else {
        format!("ytsearch:{input}")
    };

    vec![
        "--print".to_string(),
        LOOKUP_FIELDS.join(","),
        "--flat-playlist".to_string(),
        "--no-warnings".to_string(),
        target,
    ]
}

fn parse_lookup_output(stdout: &str) -> Vec<Song> {
    let lines: Vec<&str> = stdout.lines().collect();

    lines
        .chunks_exact(LOOKUP_FIELDS.len())
        .filter_map(|fields| {
            let [title, url, is_live, duration, thumbnail] = fields else {
                return None;
            };

            // Live streams have no end and cannot be resumed.
            if !matches!(*is_live, "False" | "NA") {
                return None;
            }

            let seconds = duration
                .parse::<f64>()
                .ok()
                .filter(|s| s.is_finite() && *s > 0.0)
                .unwrap_or(0.0);
            let mut song = Song::new(YT_DLP_KIND, *title, *url, Duration::from_secs_f64(seconds));
            if *thumbnail != "NA" {
                song = song.with_thumbnail(thumbnail.to_string());
            }
            Some(song)
        })
        .collect()
}

fn download_args(song: &Song) -> Vec<String> {
    [
        "-x",
        "-o",
        "-",
        "--force-overwrites",
        "--http-chunk-size",
        "100K",
        "--no-warnings",
        song.url.as_str(),
    ]
    .iter()
    .map(|arg| arg.to_string())
    .collect()
}

fn transcode_args(song: &Song) -> Vec<String> {
    let mut args = vec!["-i".to_string(), "pipe:0".to_string()];

    if !song.start_position.is_zero() {
        args.push("-ss".to_string());
        args.push(format!("{:.3}", song.start_position.as_secs_f64()));
    }

    args.extend(
        ["-f", "s16le", "-ar", "48000", "-ac", "2", "pipe:1"]
            .iter()
            .map(|arg| arg.to_string()),
    );
    args
}
