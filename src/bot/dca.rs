//! DCA1 framing for songbird.
//!
//! Songbird's DCA reader expects `DCA1`, a little-endian `i32` metadata
//! length, the JSON metadata and then the same `[i16 length][opus]` records
//! the frame streamer produces. [`DcaSource`] prepends that header and turns
//! the streamer's frame channel into a blocking [`Read`].

use bytes::{Buf, Bytes, BytesMut};
use parking_lot::Mutex;
use serde_json::json;
use songbird::input::{AudioStream, Input, LiveInput};
use std::io::{self, Read, Seek, SeekFrom};
use symphonia::core::{io::MediaSource, probe::Hint};
use tokio::sync::mpsc;

const MAGIC: &[u8; 4] = b"DCA1";

pub struct DcaSource {
    pending: Bytes,
    frames: Mutex<mpsc::Receiver<Bytes>>,
}

impl DcaSource {
    pub fn new(frames: mpsc::Receiver<Bytes>) -> Self {
        Self {
            pending: header(),
            frames: Mutex::new(frames),
        }
    }

    pub fn into_input(self) -> Input {
        let mut hint = Hint::new();
        hint.with_extension("dca");

        Input::Live(
            LiveInput::Raw(AudioStream {
                input: Box::new(self) as Box<dyn MediaSource>,
                hint: Some(hint),
            }),
            None,
        )
    }
}

fn header() -> Bytes {
    let metadata = json!({
        "dca": {
            "version": 1,
            "tool": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
                "url": null,
                "author": null,
            },
        },
        "opus": {
            "mode": "music",
            "sample_rate": 48000,
            "frame_size": 960,
            "abr": null,
            "vbr": true,
            "channels": 2,
        },
        "info": null,
        "origin": null,
        "extra": null,
    })
    .to_string();

    let mut header = BytesMut::with_capacity(MAGIC.len() + 4 + metadata.len());
    header.extend_from_slice(MAGIC);
    header.extend_from_slice(&(metadata.len() as i32).to_le_bytes());
    header.extend_from_slice(metadata.as_bytes());
    header.freeze()
}

fn frame_record(frame: &Bytes) -> io::Result<Bytes> {
    let length = i16::try_from(frame.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "opus frame too large for DCA"))?;

    let mut record = BytesMut::with_capacity(2 + frame.len());
    record.extend_from_slice(&length.to_le_bytes());
    record.extend_from_slice(frame);
    Ok(record.freeze())
}

impl Read for DcaSource {
    /// Blocks until the next frame arrives; returns 0 once the sender is dropped.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pending.is_empty() {
            match self.frames.get_mut().blocking_recv() {
                Some(frame) => self.pending = frame_record(&frame)?,
                None => return Ok(0),
            }
        }

        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.advance(n);
        Ok(n)
    }
}

impl Seek for DcaSource {
    fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "live DCA stream is not seekable"))
    }
}

impl MediaSource for DcaSource {
    fn is_seekable(&self) -> bool {
        false
    }

    fn byte_len(&self) -> Option<u64> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_starts_with_dca_header_then_frames() {
        let (tx, rx) = mpsc::channel(4);
        tx.try_send(Bytes::from_static(b"opus")).unwrap();
        drop(tx);

        let mut data = Vec::new();
        DcaSource::new(rx).read_to_end(&mut data).unwrap();

        assert_eq!(&data[..4], MAGIC);
        let json_len = i32::from_le_bytes(data[4..8].try_into().unwrap()) as usize;
        let metadata: serde_json::Value = serde_json::from_slice(&data[8..8 + json_len]).unwrap();
        assert_eq!(metadata["opus"]["sample_rate"], 48000);

        assert_eq!(&data[8 + json_len..], b"\x04\x00opus");
    }
}
