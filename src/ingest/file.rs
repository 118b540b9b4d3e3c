//! Local file frame source.
//!
//! Reads a video from the local filesystem and decodes its frames in memory.
//! Two backends: a synthetic generator behind `stub://` paths for tests and
//! dev machines, and an MJPEG backend that scans the file for JPEG start and
//! end markers and decodes each picture with the `image` crate. The file
//! source never fetches remote URLs; that is [`super::UrlSource`]'s job.

use anyhow::{anyhow, Context, Result};
use url::Url;

use super::FrameSource;
use crate::frame::{decode_jpeg, RawFrame};

const SYNTHETIC_WIDTH: u32 = 640;
const SYNTHETIC_HEIGHT: u32 = 480;
const SYNTHETIC_DEFAULT_FRAMES: u64 = 100;

/// Configuration for a local file source.
#[derive(Clone, Debug, Default)]
pub struct FileConfig {
    /// Local file path, or a `stub://` URI for the synthetic backend.
    pub path: String,
}

impl FileConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

pub struct FileSource {
    backend: FileBackend,
}

enum FileBackend {
    Synthetic(SyntheticFileSource),
    Mjpeg(MjpegFileSource),
}

impl FileSource {
    pub fn new(config: FileConfig) -> Result<Self> {
        if !is_local_file_path(&config.path) {
            return Err(anyhow!(
                "file ingestion only supports local paths (no URL schemes)"
            ));
        }
        if config.path.starts_with("stub://") {
            Ok(Self {
                backend: FileBackend::Synthetic(SyntheticFileSource::new(&config.path)?),
            })
        } else {
            Ok(Self {
                backend: FileBackend::Mjpeg(MjpegFileSource::open(&config.path)?),
            })
        }
    }
}

impl FrameSource for FileSource {
    fn describe(&self) -> String {
        match &self.backend {
            FileBackend::Synthetic(source) => format!("{} (synthetic)", source.path),
            FileBackend::Mjpeg(source) => format!("{} (mjpeg)", source.path),
        }
    }

    fn next_frame(&mut self) -> Result<Option<RawFrame>> {
        match &mut self.backend {
            FileBackend::Synthetic(source) => source.next_frame(),
            FileBackend::Mjpeg(source) => source.next_frame(),
        }
    }
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://) for tests
// ----------------------------------------------------------------------------

struct SyntheticFileSource {
    path: String,
    total_frames: u64,
    frame_count: u64,
}

impl SyntheticFileSource {
    fn new(path: &str) -> Result<Self> {
        let parsed = Url::parse(path).with_context(|| format!("parsing stub uri {path}"))?;
        let total_frames = parsed
            .query_pairs()
            .find(|(key, _)| key == "frames")
            .map(|(_, value)| value.parse::<u64>())
            .transpose()
            .context("stub frames parameter")?
            .unwrap_or(SYNTHETIC_DEFAULT_FRAMES);
        Ok(Self {
            path: path.to_string(),
            total_frames,
            frame_count: 0,
        })
    }

    fn next_frame(&mut self) -> Result<Option<RawFrame>> {
        if self.frame_count >= self.total_frames {
            return Ok(None);
        }
        self.frame_count += 1;
        let pixel_count = (SYNTHETIC_WIDTH * SYNTHETIC_HEIGHT * 3) as usize;
        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count) % 256) as u8;
        }
        Ok(Some(RawFrame::new(
            pixels,
            SYNTHETIC_WIDTH,
            SYNTHETIC_HEIGHT,
        )?))
    }
}

// ----------------------------------------------------------------------------
// MJPEG source
// ----------------------------------------------------------------------------

const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];
const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];

struct MjpegFileSource {
    path: String,
    bytes: Vec<u8>,
    cursor: usize,
}

impl MjpegFileSource {
    fn open(path: &str) -> Result<Self> {
        let bytes =
            std::fs::read(path).with_context(|| format!("opening video file {path}"))?;
        log::info!("FileSource: loaded {} ({} bytes)", path, bytes.len());
        Ok(Self {
            path: path.to_string(),
            bytes,
            cursor: 0,
        })
    }

    fn next_frame(&mut self) -> Result<Option<RawFrame>> {
        let Some((start, end)) = next_jpeg_span(&self.bytes, self.cursor) else {
            return Ok(None);
        };
        self.cursor = end;
        let frame = decode_jpeg(&self.bytes[start..end])
            .with_context(|| format!("decoding jpeg at byte {start} of {}", self.path))?;
        Ok(Some(frame))
    }
}

/// Find the next complete JPEG in `bytes` at or after `from`, returning the
/// half-open byte span including both markers.
fn next_jpeg_span(bytes: &[u8], from: usize) -> Option<(usize, usize)> {
    let start = find_marker(bytes, from, JPEG_SOI)?;
    let eoi = find_marker(bytes, start + 2, JPEG_EOI)?;
    Some((start, eoi + 2))
}

fn find_marker(bytes: &[u8], from: usize, marker: [u8; 2]) -> Option<usize> {
    bytes
        .get(from..)?
        .windows(2)
        .position(|window| window == marker)
        .map(|offset| from + offset)
}

fn is_local_file_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    if path.starts_with("stub://") {
        return true;
    }
    !path.contains("://")
}
