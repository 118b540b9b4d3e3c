//! The frame pipeline.
//!
//! Ties the stages together for one source: detect, crop, recognize,
//! normalize, dedup gate, history lookup, authorize, decide, record. Only
//! every 25th frame is processed; a vehicle is in front of the camera for
//! many frames, so sampling loses nothing the dedup window would not drop
//! anyway.
//!
//! The pipeline is deliberately hard to kill. A failing detector, a store
//! read error, or an unreadable crop costs that frame or that plate, never
//! the run: failures are logged and the loop moves on.

use anyhow::Result;
use chrono::Utc;

use crate::authorize::{resolve_authorization, VisitorDirectory};
use crate::decision::{decide, Verdict};
use crate::dedup::SeenVehicles;
use crate::detect::{PlateDetector, PlateRecognizer};
use crate::frame::RawFrame;
use crate::ingest::FrameSource;
use crate::normalize::{confidence_percent, normalize_plate};
use crate::publish::EventFeed;
use crate::snapshot::{capture_snapshot, SnapshotSink};
use crate::store::AccessLogStore;
use crate::LogEntry;

/// Only every Nth frame of a source is run through detection.
pub const FRAME_STRIDE: u64 = 25;

pub struct Pipeline {
    detector: Box<dyn PlateDetector>,
    recognizer: Box<dyn PlateRecognizer>,
    directory: Box<dyn VisitorDirectory>,
    store: Box<dyn AccessLogStore>,
    sink: Box<dyn SnapshotSink>,
    feed: EventFeed,
    seen: SeenVehicles,
    frame_count: u64,
}

impl Pipeline {
    pub fn new(
        detector: Box<dyn PlateDetector>,
        recognizer: Box<dyn PlateRecognizer>,
        directory: Box<dyn VisitorDirectory>,
        store: Box<dyn AccessLogStore>,
        sink: Box<dyn SnapshotSink>,
        feed: EventFeed,
    ) -> Self {
        Self {
            detector,
            recognizer,
            directory,
            store,
            sink,
            feed,
            seen: SeenVehicles::new(),
            frame_count: 0,
        }
    }

    /// Drain a source to its end, sampling every [`FRAME_STRIDE`]th frame.
    /// Returns the entries committed during the run. Per-frame decode errors
    /// skip that frame; a clean end of stream ends the run normally.
    pub fn run_source(&mut self, source: &mut dyn FrameSource) -> Result<Vec<LogEntry>> {
        log::info!("processing {}", source.describe());
        let mut committed = Vec::new();
        loop {
            match source.next_frame() {
                Ok(Some(frame)) => committed.extend(self.observe_frame(&frame)),
                Ok(None) => break,
                Err(err) => {
                    log::warn!("skipping frame from {}: {:#}", source.describe(), err);
                }
            }
        }
        log::info!(
            "finished {}: {} frames seen, {} events",
            source.describe(),
            self.frame_count,
            committed.len()
        );
        Ok(committed)
    }

    /// Feed one frame in, honoring the sampling stride. Off-stride frames
    /// are counted and dropped.
    pub fn observe_frame(&mut self, frame: &RawFrame) -> Vec<LogEntry> {
        self.frame_count += 1;
        if self.frame_count % FRAME_STRIDE != 0 {
            return Vec::new();
        }
        self.process_frame(frame)
    }

    /// Run one frame through the full pipeline, stride aside. Never fails;
    /// stage errors cost the plate they occurred on.
    pub fn process_frame(&mut self, frame: &RawFrame) -> Vec<LogEntry> {
        let boxes = match self.detector.detect(frame) {
            Ok(boxes) => boxes,
            Err(err) => {
                log::warn!("{} failed: {:#}", self.detector.name(), err);
                return Vec::new();
            }
        };

        let mut committed = Vec::new();
        for plate_box in boxes {
            match self.handle_box(frame, &plate_box) {
                Ok(Some(entry)) => committed.push(entry),
                Ok(None) => {}
                Err(err) => {
                    log::warn!("plate candidate dropped: {:#}", err);
                }
            }
        }
        committed
    }

    fn handle_box(
        &mut self,
        frame: &RawFrame,
        plate_box: &crate::detect::PlateBox,
    ) -> Result<Option<LogEntry>> {
        let crop = plate_box.crop_from(frame)?;
        let Some(reading) = self.recognizer.recognize(&crop)? else {
            return Ok(None);
        };

        let confidence = confidence_percent(reading.confidence);
        let Some(plate) = normalize_plate(&reading.text, confidence) else {
            log::debug!(
                "reading {:?} ({}%) produced no plate candidate",
                reading.text,
                confidence
            );
            return Ok(None);
        };

        let now = Utc::now();
        if self.seen.should_skip(&plate, now) {
            return Ok(None);
        }

        // A failed history read must not stall the gate; deciding as a first
        // sighting is the safe degradation because authorization still rules.
        let last = match self.store.latest_for_plate(&plate) {
            Ok(last) => last,
            Err(err) => {
                log::warn!("history lookup failed for {}: {:#}", plate, err);
                None
            }
        };

        let auth = resolve_authorization(self.directory.as_ref(), &plate, now);
        let verdict = decide(last, now, auth);
        let Verdict::Record(status, reason) = verdict else {
            log::debug!("{}: inside cooldown, suppressed", plate);
            return Ok(None);
        };

        let snapshot_url = capture_snapshot(frame, &plate, status, self.sink.as_ref());
        let entry = LogEntry {
            plate: plate.clone(),
            status,
            visitor_status: auth,
            timestamp: now,
            snapshot_url,
        };

        if let Err(err) = self.store.append(&entry) {
            // The sighting still arms the dedup window and reaches live
            // subscribers; only durability was lost.
            log::warn!("could not persist event for {}: {:#}", plate, err);
        }
        self.seen.mark_logged(&plate, now);
        self.feed.publish(&entry);
        log::info!("{}: {} ({})", plate, status.as_str(), reason.as_str());
        Ok(Some(entry))
    }
}
