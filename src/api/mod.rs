//! Loopback HTTP control surface.
//!
//! A deliberately small hand-rolled HTTP/1.1 server on a background thread:
//! nonblocking accept loop, shutdown flag, joined on stop. Bound to loopback
//! and guarded against non-loopback peers; operators put a reverse proxy in
//! front when remote access is wanted.
//!
//! Endpoints:
//!
//! - `GET  /health`
//! - `GET  /logs` — persisted entries whose authorization class grants access
//! - `GET  /events?after=N` — live feed entries from offset N
//! - `POST /process-video` — `{"video_path": …}` or `{"video_url": …}`,
//!   runs the file pipeline synchronously
//! - `POST /feed/start`, `POST /feed/stop` — live camera session

use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::ingest::live::{FeedStart, LiveFeed};
use crate::ingest::{FileSource, FrameSource, UrlSource};
use crate::pipeline::Pipeline;
use crate::publish::EventFeed;
use crate::store::{AccessLogStore, SqliteAccessLogStore};
use crate::{FileConfig, LogEntry};

const MAX_REQUEST_BYTES: usize = 64 * 1024;

/// Builds a fresh pipeline per request, with its own store connections.
pub type PipelineBuilder = Box<dyn Fn() -> Result<Pipeline> + Send>;

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    pub db_path: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8899".to_string(),
            db_path: "gatewatch.db".to_string(),
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    builder: PipelineBuilder,
    feed: EventFeed,
    live: Arc<LiveFeed>,
}

impl ApiServer {
    pub fn new(
        cfg: ApiConfig,
        builder: PipelineBuilder,
        feed: EventFeed,
        live: Arc<LiveFeed>,
    ) -> Self {
        Self {
            cfg,
            builder,
            feed,
            live,
        }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        if configured_addr.ip().is_loopback() && !addr.ip().is_loopback() {
            return Err(anyhow!(
                "api configured for loopback address '{}', but bound to non-loopback address '{}'",
                configured_addr,
                addr
            ));
        }
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, self, shutdown_thread) {
                log::error!("gate api stopped: {}", err);
            }
        });

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(listener: TcpListener, server: ApiServer, shutdown: Arc<AtomicBool>) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = handle_connection(stream, &server) {
                    log::warn!("gate api request rejected: {}", err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    // The worker must not outlive the server that started it.
    server.live.stop();
    Ok(())
}

fn handle_connection(mut stream: TcpStream, server: &ApiServer) -> Result<()> {
    let peer = stream.peer_addr()?;
    let local = stream.local_addr()?;
    if local.ip().is_loopback() && !peer.ip().is_loopback() {
        write_json_response(&mut stream, 403, r#"{"error":"forbidden"}"#)?;
        return Ok(());
    }

    let request = read_request(&mut stream)?;
    match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/health") => write_json_response(&mut stream, 200, r#"{"status":"ok"}"#),
        ("GET", "/logs") => handle_logs(&mut stream, server),
        ("GET", "/events") => handle_events(&mut stream, server, &request),
        ("POST", "/process-video") => handle_process_video(&mut stream, server, &request),
        ("POST", "/feed/start") => handle_feed_start(&mut stream, server),
        ("POST", "/feed/stop") => {
            server.live.stop();
            write_json_response(&mut stream, 200, r#"{"status":"stopped"}"#)
        }
        (_, "/health" | "/logs" | "/events" | "/process-video" | "/feed/start" | "/feed/stop") => {
            write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#)
        }
        _ => write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#),
    }
}

fn handle_logs(stream: &mut TcpStream, server: &ApiServer) -> Result<()> {
    let store = match SqliteAccessLogStore::open(&server.cfg.db_path) {
        Ok(store) => store,
        Err(err) => {
            log::warn!("could not open access log: {:#}", err);
            write_json_response(stream, 500, r#"{"error":"store_unavailable"}"#)?;
            return Ok(());
        }
    };
    let entries: Vec<LogEntry> = store
        .all_entries()?
        .into_iter()
        .filter(|entry| entry.visitor_status.grants_access())
        .collect();
    let payload = serde_json::to_vec(&serde_json::json!({ "logs": entries }))?;
    write_response(stream, 200, "application/json", &payload)
}

fn handle_events(stream: &mut TcpStream, server: &ApiServer, request: &HttpRequest) -> Result<()> {
    let after = match request.query_param("after") {
        Some(raw) => match raw.parse::<usize>() {
            Ok(after) => after,
            Err(_) => {
                write_json_response(stream, 400, r#"{"error":"bad_after_offset"}"#)?;
                return Ok(());
            }
        },
        None => 0,
    };
    let events = server.feed.since(after);
    let payload = serde_json::to_vec(&serde_json::json!({
        "events": events,
        "next_offset": server.feed.len(),
    }))?;
    write_response(stream, 200, "application/json", &payload)
}

fn handle_process_video(
    stream: &mut TcpStream,
    server: &ApiServer,
    request: &HttpRequest,
) -> Result<()> {
    let body: serde_json::Value = match serde_json::from_slice(&request.body) {
        Ok(body) => body,
        Err(_) => {
            write_json_response(stream, 400, r#"{"error":"bad_request_body"}"#)?;
            return Ok(());
        }
    };

    let source: Result<Box<dyn FrameSource>> =
        if let Some(path) = body.get("video_path").and_then(|v| v.as_str()) {
            FileSource::new(FileConfig::new(path)).map(|s| Box::new(s) as Box<dyn FrameSource>)
        } else if let Some(url) = body.get("video_url").and_then(|v| v.as_str()) {
            UrlSource::fetch(url).map(|s| Box::new(s) as Box<dyn FrameSource>)
        } else {
            write_json_response(stream, 400, r#"{"error":"missing_video_path_or_url"}"#)?;
            return Ok(());
        };

    // Acquisition failures belong to the caller; everything downstream is
    // swallowed per plate inside the pipeline.
    let mut source = match source {
        Ok(source) => source,
        Err(err) => {
            log::warn!("video acquisition failed: {:#}", err);
            let payload =
                serde_json::to_vec(&serde_json::json!({ "error": "video_unavailable" }))?;
            write_response(stream, 400, "application/json", &payload)?;
            return Ok(());
        }
    };

    let mut pipeline = match (server.builder)() {
        Ok(pipeline) => pipeline,
        Err(err) => {
            log::error!("could not build pipeline: {:#}", err);
            write_json_response(stream, 500, r#"{"error":"pipeline_unavailable"}"#)?;
            return Ok(());
        }
    };
    let events = pipeline.run_source(source.as_mut())?;
    let count = events.len();
    let payload = serde_json::to_vec(&serde_json::json!({
        "events": events,
        "count": count,
    }))?;
    write_response(stream, 200, "application/json", &payload)
}

fn handle_feed_start(stream: &mut TcpStream, server: &ApiServer) -> Result<()> {
    let pipeline = match (server.builder)() {
        Ok(pipeline) => pipeline,
        Err(err) => {
            log::error!("could not build pipeline: {:#}", err);
            write_json_response(stream, 500, r#"{"error":"pipeline_unavailable"}"#)?;
            return Ok(());
        }
    };
    match server.live.start(pipeline) {
        Ok(FeedStart::Started) => write_json_response(stream, 200, r#"{"status":"started"}"#),
        Ok(FeedStart::AlreadyRunning) => {
            write_json_response(stream, 200, r#"{"status":"already_running"}"#)
        }
        Err(err) => {
            log::warn!("live feed start failed: {:#}", err);
            write_json_response(stream, 500, r#"{"error":"camera_unavailable"}"#)
        }
    }
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    let header_end = loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break data
                .windows(4)
                .position(|w| w == b"\r\n\r\n")
                .ok_or_else(|| anyhow!("connection closed mid-request"))?;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
    };
    let body_start = header_end + 4;

    let header_text = String::from_utf8_lossy(&data[..header_end]).into_owned();
    let mut lines = header_text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }

    let content_length: usize = headers
        .get("content-length")
        .map(|v| v.parse())
        .transpose()
        .map_err(|_| anyhow!("bad content-length"))?
        .unwrap_or(0);
    if body_start + content_length > MAX_REQUEST_BYTES {
        return Err(anyhow!("request too large"));
    }
    while data.len() < body_start + content_length {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed mid-body"));
        }
        data.extend_from_slice(&buf[..n]);
    }
    let body = data[body_start..body_start + content_length].to_vec();

    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
        raw_path: raw_path.to_string(),
        body,
    })
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "application/json", body.as_bytes())
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        403 => "HTTP/1.1 403 Forbidden",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    raw_path: String,
    body: Vec<u8>,
}

impl HttpRequest {
    fn query_param(&self, name: &str) -> Option<&str> {
        let query = self.raw_path.split('?').nth(1)?;
        for pair in query.split('&') {
            if let Some((k, v)) = pair.split_once('=') {
                if k == name {
                    return Some(v);
                }
            }
        }
        None
    }
}

/// The daemon's stock pipeline builder: stub vision backends and SQLite
/// stores on the configured database. Deployments with a real model swap
/// the builder, not the server.
pub fn default_pipeline_builder(
    db_path: String,
    snapshot_dir: Option<PathBuf>,
    feed: EventFeed,
) -> PipelineBuilder {
    Box::new(move || {
        let directory = crate::authorize::SqliteVisitorDirectory::open(&db_path)?;
        let store = SqliteAccessLogStore::open(&db_path)?;
        let sink: Box<dyn crate::snapshot::SnapshotSink> = match &snapshot_dir {
            Some(dir) => Box::new(crate::snapshot::DirSnapshotSink::new(dir.clone())?),
            None => Box::new(crate::snapshot::StubSnapshotSink::new()),
        };
        Ok(Pipeline::new(
            Box::new(crate::detect::StubDetector::new()),
            Box::new(crate::detect::ScriptedRecognizer::new()),
            Box::new(directory),
            Box::new(store),
            sink,
            feed.clone(),
        ))
    })
}
