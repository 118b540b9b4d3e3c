//! Plate detection and recognition seams.
//!
//! Real deployments plug in a vision model behind these traits; the kernel
//! itself never depends on one. The stub implementations below generate
//! deterministic results so the pipeline can run end to end on machines with
//! no model weights at all.

use anyhow::Result;
use std::collections::VecDeque;

use crate::frame::RawFrame;

/// A detected plate region in frame pixel coordinates, `[x1,x2) x [y1,y2)`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlateBox {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
    /// Detector confidence in `0.0..=1.0`.
    pub confidence: f32,
}

impl PlateBox {
    pub fn crop_from(&self, frame: &RawFrame) -> Result<RawFrame> {
        frame.crop(self.x1, self.y1, self.x2, self.y2)
    }
}

/// Locates candidate plate regions in a frame.
pub trait PlateDetector: Send {
    fn name(&self) -> &str;

    fn detect(&mut self, frame: &RawFrame) -> Result<Vec<PlateBox>>;
}

/// Raw OCR output for one plate crop, before normalization.
#[derive(Clone, Debug, PartialEq)]
pub struct PlateReading {
    pub text: String,
    /// Recognizer confidence in `0.0..=1.0`.
    pub confidence: f32,
}

/// Reads the text off a cropped plate region. `None` means the region held
/// no legible text, which is not an error.
pub trait PlateRecognizer: Send {
    fn name(&self) -> &str;

    fn recognize(&mut self, crop: &RawFrame) -> Result<Option<PlateReading>>;
}

/// Detector stub: reports one centered box per frame with fixed confidence.
#[derive(Clone, Debug)]
pub struct StubDetector {
    pub confidence: f32,
}

impl Default for StubDetector {
    fn default() -> Self {
        Self { confidence: 0.9 }
    }
}

impl StubDetector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PlateDetector for StubDetector {
    fn name(&self) -> &str {
        "stub-detector"
    }

    fn detect(&mut self, frame: &RawFrame) -> Result<Vec<PlateBox>> {
        let (w, h) = (frame.width(), frame.height());
        if w < 4 || h < 4 {
            return Ok(Vec::new());
        }
        Ok(vec![PlateBox {
            x1: w / 4,
            y1: h / 4,
            x2: w - w / 4,
            y2: h - h / 4,
            confidence: self.confidence,
        }])
    }
}

/// Recognizer stub that replays a queue of scripted readings, one per call.
/// Once the script runs out every crop reads as illegible.
#[derive(Debug, Default)]
pub struct ScriptedRecognizer {
    script: VecDeque<Option<PlateReading>>,
}

impl ScriptedRecognizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, text: &str, confidence: f32) {
        self.script.push_back(Some(PlateReading {
            text: text.to_string(),
            confidence,
        }));
    }

    pub fn push_illegible(&mut self) {
        self.script.push_back(None);
    }
}

impl PlateRecognizer for ScriptedRecognizer {
    fn name(&self) -> &str {
        "scripted-recognizer"
    }

    fn recognize(&mut self, _crop: &RawFrame) -> Result<Option<PlateReading>> {
        Ok(self.script.pop_front().flatten())
    }
}
