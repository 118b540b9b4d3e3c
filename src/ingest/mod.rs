//! Frame sources.
//!
//! Everything upstream of detection: local files, remote downloads, and the
//! live camera session. A source yields decoded frames one at a time; the
//! pipeline owns the sampling stride, so sources hand over every frame they
//! decode.

pub mod file;
pub mod http;
pub mod live;

pub use file::FileSource;
pub use http::UrlSource;

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use crate::frame::RawFrame;

/// A connected stream of frames. `next_frame` returning `Ok(None)` marks a
/// clean end of stream; errors are per-frame and the source stays usable.
pub trait FrameSource: Send {
    /// Human-readable origin, for logs.
    fn describe(&self) -> String;

    fn next_frame(&mut self) -> Result<Option<RawFrame>>;
}

/// Best-effort synchronous delete with a few retries, for files that may
/// still be held open briefly by a reader on some platforms. Gives up with
/// a warning; leftover temp files are not worth failing the request over.
pub fn remove_file_with_retry(path: &Path) {
    const ATTEMPTS: u32 = 3;
    for attempt in 1..=ATTEMPTS {
        match std::fs::remove_file(path) {
            Ok(()) => return,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return,
            Err(err) => {
                if attempt == ATTEMPTS {
                    log::warn!("giving up deleting {}: {}", path.display(), err);
                    return;
                }
                thread::sleep(Duration::from_millis(500));
            }
        }
    }
}

/// Delete a staging file from a background thread, retrying for a few
/// seconds. Used for downloads whose reader may outlive the request that
/// created them.
pub fn cleanup_later(path: PathBuf) {
    let display = path.display().to_string();
    let spawned = thread::Builder::new()
        .name("ingest-cleanup".to_string())
        .spawn(move || {
            const ATTEMPTS: u32 = 5;
            for attempt in 1..=ATTEMPTS {
                match std::fs::remove_file(&path) {
                    Ok(()) => return,
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => return,
                    Err(err) => {
                        if attempt == ATTEMPTS {
                            log::warn!("giving up deleting {}: {}", path.display(), err);
                            return;
                        }
                        thread::sleep(Duration::from_secs(1));
                    }
                }
            }
        });
    if let Err(err) = spawned {
        log::warn!("could not spawn cleanup thread for {}: {}", display, err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remove_file_with_retry_deletes_and_tolerates_absence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stale.jpg");
        std::fs::write(&path, b"x").unwrap();

        remove_file_with_retry(&path);
        assert!(!path.exists());
        // A second call on the now-missing file is a no-op.
        remove_file_with_retry(&path);
    }

    #[test]
    fn cleanup_later_on_a_missing_path_is_quiet() {
        let dir = tempfile::tempdir().unwrap();
        cleanup_later(dir.path().join("never-created.mjpeg"));
    }

    #[test]
    fn cleanup_later_eventually_deletes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("staged.mjpeg");
        std::fs::write(&path, b"x").unwrap();

        cleanup_later(path.clone());
        for _ in 0..50 {
            if !path.exists() {
                return;
            }
            thread::sleep(Duration::from_millis(100));
        }
        panic!("staging file was never deleted");
    }
}
