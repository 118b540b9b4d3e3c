//! Snapshot capture and upload.
//!
//! Every committed access event carries a snapshot URL. The frame is encoded
//! as JPEG, staged in the system temp directory, handed to a sink, and the
//! staging file removed. Upload failure never blocks the event: the entry is
//! committed with the `upload_failed` sentinel in place of a URL.

use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use url::Url;

use crate::frame::RawFrame;
use crate::ingest::remove_file_with_retry;
use crate::{random_suffix, AccessStatus};

/// Recorded in place of a URL when the snapshot could not be stored.
pub const SNAPSHOT_UPLOAD_FAILED: &str = "upload_failed";

/// Replace each run of non-ASCII characters with a single underscore, so
/// plate text containing region glyphs still yields a portable file name.
pub fn sanitize_snapshot_name(name: &str) -> String {
    static NON_ASCII: OnceLock<regex::Regex> = OnceLock::new();
    let re = NON_ASCII.get_or_init(|| regex::Regex::new(r"[^\x00-\x7F]+").unwrap());
    re.replace_all(name, "_").into_owned()
}

/// Durable storage for event snapshots. Returns the public URL of the
/// stored object.
pub trait SnapshotSink: Send {
    fn upload(&self, local: &Path, object_name: &str) -> Result<String>;
}

/// Capture one snapshot for an event about to be committed.
///
/// Never fails: any error along the encode, stage, or upload path is logged
/// and collapsed into [`SNAPSHOT_UPLOAD_FAILED`].
pub fn capture_snapshot(
    frame: &RawFrame,
    plate: &str,
    status: AccessStatus,
    sink: &dyn SnapshotSink,
) -> String {
    let object_name = format!(
        "{}_{}_{}.jpg",
        sanitize_snapshot_name(plate),
        random_suffix(),
        status.as_str()
    );
    match stage_and_upload(frame, &object_name, sink) {
        Ok(url) => url,
        Err(err) => {
            log::warn!("snapshot upload failed for {}: {:#}", plate, err);
            SNAPSHOT_UPLOAD_FAILED.to_string()
        }
    }
}

fn stage_and_upload(frame: &RawFrame, object_name: &str, sink: &dyn SnapshotSink) -> Result<String> {
    let jpeg = frame.to_jpeg()?;
    let local = std::env::temp_dir().join(object_name);
    fs::write(&local, &jpeg)
        .with_context(|| format!("staging snapshot at {}", local.display()))?;
    let result = sink.upload(&local, object_name);
    remove_file_with_retry(&local);
    result
}

// ----------------------------------------------------------------------------
// Sinks
// ----------------------------------------------------------------------------

/// POSTs the JPEG to a remote snapshot bucket over HTTP.
pub struct BucketSnapshotSink {
    endpoint: Url,
}

impl BucketSnapshotSink {
    pub fn new(endpoint: &str) -> Result<Self> {
        let endpoint = Url::parse(endpoint).context("snapshot bucket endpoint")?;
        Ok(Self { endpoint })
    }
}

impl SnapshotSink for BucketSnapshotSink {
    fn upload(&self, local: &Path, object_name: &str) -> Result<String> {
        let bytes = fs::read(local)?;
        let mut target = self.endpoint.clone();
        target
            .path_segments_mut()
            .map_err(|_| anyhow!("snapshot endpoint cannot carry a path"))?
            .push(object_name);
        let response = ureq::put(target.as_str())
            .set("Content-Type", "image/jpeg")
            .send_bytes(&bytes)
            .with_context(|| format!("uploading snapshot to {}", target))?;
        if response.status() >= 300 {
            return Err(anyhow!("snapshot bucket returned {}", response.status()));
        }
        Ok(target.into())
    }
}

/// Copies snapshots into a local directory and serves `file://` URLs.
/// The deployment mode for single-box installs with no object store.
pub struct DirSnapshotSink {
    dir: PathBuf,
}

impl DirSnapshotSink {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating snapshot dir {}", dir.display()))?;
        Ok(Self { dir })
    }
}

impl SnapshotSink for DirSnapshotSink {
    fn upload(&self, local: &Path, object_name: &str) -> Result<String> {
        let dest = self.dir.join(object_name);
        fs::copy(local, &dest)
            .with_context(|| format!("copying snapshot to {}", dest.display()))?;
        let url = Url::from_file_path(&dest)
            .map_err(|_| anyhow!("snapshot path {} is not absolute", dest.display()))?;
        Ok(url.into())
    }
}

/// Sink stub: stores nothing and answers with a `stub://` URL, or fails
/// every upload when constructed failing.
#[derive(Clone, Copy, Debug, Default)]
pub struct StubSnapshotSink {
    fail: bool,
}

impl StubSnapshotSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self { fail: true }
    }
}

impl SnapshotSink for StubSnapshotSink {
    fn upload(&self, _local: &Path, object_name: &str) -> Result<String> {
        if self.fail {
            return Err(anyhow!("stub sink configured to fail"));
        }
        Ok(format!("stub://snapshots/{}", object_name))
    }
}
