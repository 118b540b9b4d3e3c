//! Live camera session.
//!
//! One physical camera, one background worker. The `CaptureCoordinator`
//! owns the device and hands it to at most one session at a time; the
//! session itself is a small state machine (idle, running, stopping) driven
//! by `start` and `stop`. Stop is synchronous: it signals the worker and
//! joins it; the worker returns the device as it exits, panics included, so
//! no camera access outlives the call.

use anyhow::{anyhow, Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::frame::RawFrame;
use crate::pipeline::Pipeline;

/// Delay between live frame reads.
pub const LIVE_READ_INTERVAL: Duration = Duration::from_millis(100);

/// A camera the live session can drive. Implementations talk to real
/// hardware; the stub below synthesizes frames for tests and dev machines.
pub trait CaptureDevice: Send {
    fn open(&mut self) -> Result<()>;

    fn read_frame(&mut self) -> Result<RawFrame>;

    fn close(&mut self);
}

/// Synthetic camera for `stub://` deployments.
pub struct StubCamera {
    opened: bool,
    frame_count: u64,
}

impl StubCamera {
    pub fn new() -> Self {
        Self {
            opened: false,
            frame_count: 0,
        }
    }
}

impl Default for StubCamera {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureDevice for StubCamera {
    fn open(&mut self) -> Result<()> {
        self.opened = true;
        Ok(())
    }

    fn read_frame(&mut self) -> Result<RawFrame> {
        if !self.opened {
            return Err(anyhow!("stub camera is not open"));
        }
        self.frame_count += 1;
        let mut pixels = vec![0u8; 640 * 480 * 3];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count) % 256) as u8;
        }
        RawFrame::new(pixels, 640, 480)
    }

    fn close(&mut self) {
        self.opened = false;
    }
}

/// Build a capture device from a configured device string. Only the
/// synthetic `stub://` backend is built in; hardware backends plug in at
/// this seam.
pub fn camera_from_device(device: &str) -> Result<Box<dyn CaptureDevice>> {
    if device.starts_with("stub://") {
        return Ok(Box::new(StubCamera::new()));
    }
    Err(anyhow!("no capture backend for device '{}'", device))
}

// ----------------------------------------------------------------------------
// Coordinator
// ----------------------------------------------------------------------------

/// Owns the single shared capture device. `acquire` moves the device out to
/// exactly one holder; `release` puts it back.
pub struct CaptureCoordinator {
    slot: Mutex<Option<Box<dyn CaptureDevice>>>,
}

impl CaptureCoordinator {
    pub fn new(device: Box<dyn CaptureDevice>) -> Self {
        Self {
            slot: Mutex::new(Some(device)),
        }
    }

    fn acquire(&self) -> Result<Box<dyn CaptureDevice>> {
        self.slot
            .lock()
            .expect("capture slot lock")
            .take()
            .ok_or_else(|| anyhow!("camera is already in use"))
    }

    fn release(&self, device: Box<dyn CaptureDevice>) {
        *self.slot.lock().expect("capture slot lock") = Some(device);
    }
}

/// Holds the acquired device for the lifetime of a worker. The device is
/// closed and returned to the coordinator on drop, so a panicking worker
/// cannot strand the camera in the acquired state.
struct DeviceLease {
    coordinator: Arc<CaptureCoordinator>,
    device: Option<Box<dyn CaptureDevice>>,
}

impl DeviceLease {
    fn new(coordinator: Arc<CaptureCoordinator>, device: Box<dyn CaptureDevice>) -> Self {
        Self {
            coordinator,
            device: Some(device),
        }
    }

    fn read_frame(&mut self) -> Result<RawFrame> {
        match self.device.as_mut() {
            Some(device) => device.read_frame(),
            None => Err(anyhow!("capture device already returned")),
        }
    }
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        if let Some(mut device) = self.device.take() {
            device.close();
            self.coordinator.release(device);
        }
    }
}

// ----------------------------------------------------------------------------
// Session
// ----------------------------------------------------------------------------

/// Outcome of a start request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeedStart {
    Started,
    AlreadyRunning,
}

enum Session {
    Idle,
    Running {
        active: Arc<AtomicBool>,
        worker: JoinHandle<()>,
    },
    Stopping,
}

/// The live feed session. Clone-free; the API layer holds it behind an
/// `Arc`.
pub struct LiveFeed {
    coordinator: Arc<CaptureCoordinator>,
    session: Mutex<Session>,
}

impl LiveFeed {
    pub fn new(coordinator: Arc<CaptureCoordinator>) -> Self {
        Self {
            coordinator,
            session: Mutex::new(Session::Idle),
        }
    }

    pub fn is_running(&self) -> bool {
        !matches!(*self.session.lock().expect("session lock"), Session::Idle)
    }

    /// Start the live worker. A second start while the session is running
    /// (or still stopping) is a no-op.
    pub fn start(&self, mut pipeline: Pipeline) -> Result<FeedStart> {
        let mut session = self.session.lock().expect("session lock");
        if !matches!(*session, Session::Idle) {
            log::info!("live feed already running");
            return Ok(FeedStart::AlreadyRunning);
        }

        let mut device = self.coordinator.acquire()?;
        if let Err(err) = device.open() {
            self.coordinator.release(device);
            return Err(err.context("opening capture device"));
        }

        let active = Arc::new(AtomicBool::new(true));
        let worker_active = Arc::clone(&active);
        let mut lease = DeviceLease::new(Arc::clone(&self.coordinator), device);
        let worker = thread::Builder::new()
            .name("live-feed".to_string())
            .spawn(move || {
                while worker_active.load(Ordering::SeqCst) {
                    match lease.read_frame() {
                        Ok(frame) => {
                            pipeline.observe_frame(&frame);
                        }
                        Err(err) => {
                            log::warn!("live frame read failed: {:#}", err);
                        }
                    }
                    thread::sleep(LIVE_READ_INTERVAL);
                }
                log::info!("live feed worker stopped");
            })
            .context("spawning live feed worker")?;

        *session = Session::Running { active, worker };
        log::info!("live feed started");
        Ok(FeedStart::Started)
    }

    /// Stop the live worker and wait for it to finish. Idempotent; stopping
    /// an idle session is a no-op.
    pub fn stop(&self) {
        let taken = {
            let mut session = self.session.lock().expect("session lock");
            match std::mem::replace(&mut *session, Session::Stopping) {
                Session::Running { active, worker } => {
                    active.store(false, Ordering::SeqCst);
                    Some(worker)
                }
                previous => {
                    *session = previous;
                    None
                }
            }
        };

        // Join outside the lock so is_running stays answerable meanwhile.
        if let Some(worker) = taken {
            if worker.join().is_err() {
                log::warn!("live feed worker panicked");
            }
            *self.session.lock().expect("session lock") = Session::Idle;
        }
    }
}

impl Drop for LiveFeed {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authorize::InMemoryVisitorDirectory;
    use crate::detect::{ScriptedRecognizer, StubDetector};
    use crate::publish::EventFeed;
    use crate::snapshot::StubSnapshotSink;
    use crate::store::InMemoryAccessLogStore;

    fn test_pipeline() -> Pipeline {
        Pipeline::new(
            Box::new(StubDetector::new()),
            Box::new(ScriptedRecognizer::new()),
            Box::new(InMemoryVisitorDirectory::new()),
            Box::new(InMemoryAccessLogStore::new()),
            Box::new(StubSnapshotSink::new()),
            EventFeed::new(),
        )
    }

    #[test]
    fn start_stop_cycle_returns_to_idle() {
        let coordinator = Arc::new(CaptureCoordinator::new(Box::new(StubCamera::new())));
        let feed = LiveFeed::new(Arc::clone(&coordinator));

        assert_eq!(feed.start(test_pipeline()).unwrap(), FeedStart::Started);
        assert!(feed.is_running());
        feed.stop();
        assert!(!feed.is_running());

        // The device was released, so a second session can start.
        assert_eq!(feed.start(test_pipeline()).unwrap(), FeedStart::Started);
        feed.stop();
    }

    #[test]
    fn second_start_is_a_no_op() {
        let coordinator = Arc::new(CaptureCoordinator::new(Box::new(StubCamera::new())));
        let feed = LiveFeed::new(coordinator);

        assert_eq!(feed.start(test_pipeline()).unwrap(), FeedStart::Started);
        assert_eq!(
            feed.start(test_pipeline()).unwrap(),
            FeedStart::AlreadyRunning
        );
        feed.stop();
    }

    #[test]
    fn stop_on_idle_session_is_a_no_op() {
        let coordinator = Arc::new(CaptureCoordinator::new(Box::new(StubCamera::new())));
        let feed = LiveFeed::new(coordinator);
        feed.stop();
        assert!(!feed.is_running());
    }

    #[test]
    fn device_is_released_even_when_the_worker_panics() {
        struct PanickyCamera;
        impl CaptureDevice for PanickyCamera {
            fn open(&mut self) -> Result<()> {
                Ok(())
            }
            fn read_frame(&mut self) -> Result<RawFrame> {
                panic!("capture backend crashed")
            }
            fn close(&mut self) {}
        }

        let coordinator = Arc::new(CaptureCoordinator::new(Box::new(PanickyCamera)));
        let feed = LiveFeed::new(Arc::clone(&coordinator));
        assert_eq!(feed.start(test_pipeline()).unwrap(), FeedStart::Started);
        feed.stop();
        assert!(!feed.is_running());

        // The panicking worker still returned the device.
        let device = coordinator.acquire().expect("device returned");
        coordinator.release(device);
    }

    #[test]
    fn coordinator_serializes_device_access() {
        let coordinator = Arc::new(CaptureCoordinator::new(Box::new(StubCamera::new())));
        let device = coordinator.acquire().unwrap();
        assert!(coordinator.acquire().is_err());
        coordinator.release(device);
        assert!(coordinator.acquire().is_ok());
    }
}
