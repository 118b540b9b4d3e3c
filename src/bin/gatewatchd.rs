//! gatewatchd - license-plate access control daemon
//!
//! This daemon:
//! 1. Opens the gate database (visitor directory + access log)
//! 2. Serves the loopback control API (process-video, live feed, logs)
//! 3. Tails the live event feed and logs every committed access event
//! 4. Shuts the API and live worker down cleanly on Ctrl-C

use anyhow::Result;
use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use gatewatch::api::{default_pipeline_builder, ApiConfig, ApiServer};
use gatewatch::config::GatewatchConfig;
use gatewatch::ingest::live::{camera_from_device, CaptureCoordinator, LiveFeed};
use gatewatch::publish::{EventFeed, POLL_INTERVAL};
use gatewatch::SqliteAccessLogStore;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the gate database.
    #[arg(long, env = "GATEWATCH_DB_PATH")]
    db_path: Option<String>,
    /// Listen address for the control API.
    #[arg(long, env = "GATEWATCH_API_ADDR")]
    api_addr: Option<String>,
    /// Capture device for the live feed.
    #[arg(long, env = "GATEWATCH_CAMERA")]
    camera: Option<String>,
    /// Start the live feed immediately instead of waiting for /feed/start.
    #[arg(long, default_value_t = false)]
    start_feed: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = GatewatchConfig::load()?;
    if let Some(db_path) = args.db_path {
        cfg.db_path = db_path;
    }
    if let Some(api_addr) = args.api_addr {
        cfg.api_addr = api_addr;
    }
    if let Some(camera) = args.camera {
        cfg.camera = camera;
    }

    // Fail before serving if the database is unusable.
    SqliteAccessLogStore::open(&cfg.db_path)?;

    let feed = EventFeed::new();
    let builder = default_pipeline_builder(
        cfg.db_path.clone(),
        cfg.snapshot_dir.clone(),
        feed.clone(),
    );
    let camera = camera_from_device(&cfg.camera)?;
    let live = Arc::new(LiveFeed::new(Arc::new(CaptureCoordinator::new(camera))));

    let api_cfg = ApiConfig {
        addr: cfg.api_addr.clone(),
        db_path: cfg.db_path.clone(),
    };
    let api_handle = ApiServer::new(api_cfg, builder, feed.clone(), Arc::clone(&live)).spawn()?;
    log::info!("gate api listening on {}", api_handle.addr);
    log::info!("gatewatchd running. writing to {}", cfg.db_path);
    log::info!("camera: {}", cfg.camera);

    if args.start_feed {
        let builder = default_pipeline_builder(
            cfg.db_path.clone(),
            cfg.snapshot_dir.clone(),
            feed.clone(),
        );
        live.start(builder()?)?;
        log::info!("live feed started at boot");
    }

    let running = Arc::new(AtomicBool::new(true));
    let running_handler = Arc::clone(&running);
    ctrlc::set_handler(move || {
        running_handler.store(false, Ordering::SeqCst);
    })?;

    // Tail the feed so every committed event reaches the daemon log, no
    // matter which source produced it.
    let mut cursor = feed.subscribe();
    let mut event_count = 0u64;
    while running.load(Ordering::SeqCst) {
        for event in cursor.poll() {
            event_count += 1;
            log::info!(
                "event #{}: plate={} status={} class={} snapshot={}",
                event_count,
                event.plate,
                event.status.as_str(),
                event.visitor_status.as_str(),
                event.snapshot_url
            );
        }
        std::thread::sleep(POLL_INTERVAL);
    }

    log::info!("shutting down");
    live.stop();
    api_handle.stop()?;
    Ok(())
}
