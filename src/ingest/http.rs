//! Remote video source.
//!
//! Downloads a video over HTTP into a staging file in the system temp
//! directory, then decodes it through [`FileSource`]. The staging file is
//! deleted from a background thread once the source is dropped, so a slow
//! filesystem never delays the request that finished with it.

use anyhow::{anyhow, Context, Result};
use std::io::{Read, Write};
use std::path::PathBuf;
use url::Url;

use super::file::{FileConfig, FileSource};
use super::{cleanup_later, FrameSource};
use crate::frame::RawFrame;

/// Downloads are capped so a misbehaving server cannot fill the temp
/// partition.
const MAX_DOWNLOAD_BYTES: u64 = 512 * 1024 * 1024;

pub struct UrlSource {
    url: String,
    staged: Option<PathBuf>,
    inner: FileSource,
}

impl UrlSource {
    pub fn fetch(url: &str) -> Result<Self> {
        let parsed = Url::parse(url).with_context(|| format!("parsing video url {url}"))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(anyhow!("unsupported video url scheme {}", parsed.scheme()));
        }

        let staged = download_to_temp(&parsed)?;
        let path = staged.to_string_lossy().into_owned();
        let inner = match FileSource::new(FileConfig::new(path)) {
            Ok(inner) => inner,
            Err(err) => {
                cleanup_later(staged);
                return Err(err);
            }
        };
        Ok(Self {
            url: url.to_string(),
            staged: Some(staged),
            inner,
        })
    }
}

impl FrameSource for UrlSource {
    fn describe(&self) -> String {
        format!("{} (downloaded)", self.url)
    }

    fn next_frame(&mut self) -> Result<Option<RawFrame>> {
        self.inner.next_frame()
    }
}

impl Drop for UrlSource {
    fn drop(&mut self) {
        if let Some(staged) = self.staged.take() {
            cleanup_later(staged);
        }
    }
}

fn download_to_temp(url: &Url) -> Result<PathBuf> {
    let response = ureq::get(url.as_str())
        .call()
        .with_context(|| format!("fetching {url}"))?;

    let mut staging = tempfile::Builder::new()
        .prefix("gatewatch-video-")
        .suffix(".mjpeg")
        .tempfile()
        .context("creating staging file")?;

    let mut reader = response.into_reader().take(MAX_DOWNLOAD_BYTES + 1);
    let copied = std::io::copy(&mut reader, staging.as_file_mut())
        .with_context(|| format!("downloading {url}"))?;
    if copied > MAX_DOWNLOAD_BYTES {
        return Err(anyhow!("video at {url} exceeds the download cap"));
    }
    staging.as_file_mut().flush()?;
    log::info!("UrlSource: staged {} bytes from {}", copied, url);

    // Detach from tempfile's drop-time delete; the source owns the path and
    // removes it through cleanup_later once decoding is done.
    let (_, path) = staging.keep().context("keeping staging file")?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;
    use std::thread;

    fn serve_once(body: Vec<u8>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf);
                let header = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nContent-Type: video/x-motion-jpeg\r\n\r\n",
                    body.len()
                );
                let _ = stream.write_all(header.as_bytes());
                let _ = stream.write_all(&body);
            }
        });
        format!("http://{addr}/clip.mjpeg")
    }

    #[test]
    fn non_http_schemes_are_rejected() {
        assert!(UrlSource::fetch("ftp://host/clip.mjpeg").is_err());
        assert!(UrlSource::fetch("not a url").is_err());
    }

    #[test]
    fn downloads_and_decodes_then_cleans_up() {
        let jpeg = RawFrame::new(vec![90u8; 8 * 8 * 3], 8, 8)
            .unwrap()
            .to_jpeg()
            .unwrap();
        let url = serve_once(jpeg);

        let mut source = UrlSource::fetch(&url).unwrap();
        let staged = source.staged.clone().unwrap();
        assert!(staged.exists());
        assert!(source.next_frame().unwrap().is_some());
        assert!(source.next_frame().unwrap().is_none());

        drop(source);
        for _ in 0..50 {
            if !staged.exists() {
                return;
            }
            thread::sleep(std::time::Duration::from_millis(100));
        }
        panic!("staging file was never deleted");
    }
}
