//! Raw frame representation.
//!
//! Frames are tightly packed RGB8. Sources decode into this form once; the
//! detector, the crop for recognition, and the snapshot encoder all work on
//! it without further conversion.

use anyhow::{anyhow, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageFormat};

/// One decoded video frame, RGB8, row-major.
#[derive(Clone, Debug)]
pub struct RawFrame {
    pixels: Vec<u8>,
    width: u32,
    height: u32,
}

impl RawFrame {
    pub fn new(pixels: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = width as usize * height as usize * 3;
        if pixels.len() != expected {
            return Err(anyhow!(
                "frame size mismatch: {}x{} wants {} bytes, got {}",
                width,
                height,
                expected,
                pixels.len()
            ));
        }
        Ok(Self {
            pixels,
            width,
            height,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Copy out the region `[x1,x2) x [y1,y2)`, clamped to the frame.
    /// Degenerate regions produce an error rather than an empty frame.
    pub fn crop(&self, x1: u32, y1: u32, x2: u32, y2: u32) -> Result<RawFrame> {
        let x1 = x1.min(self.width);
        let y1 = y1.min(self.height);
        let x2 = x2.min(self.width);
        let y2 = y2.min(self.height);
        if x2 <= x1 || y2 <= y1 {
            return Err(anyhow!("degenerate crop region"));
        }
        let (w, h) = (x2 - x1, y2 - y1);
        let mut pixels = Vec::with_capacity(w as usize * h as usize * 3);
        for row in y1..y2 {
            let start = (row as usize * self.width as usize + x1 as usize) * 3;
            let end = start + w as usize * 3;
            pixels.extend_from_slice(&self.pixels[start..end]);
        }
        RawFrame::new(pixels, w, h)
    }

    /// Encode the frame as JPEG (snapshot format).
    pub fn to_jpeg(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        JpegEncoder::new(&mut buf).encode(
            &self.pixels,
            self.width,
            self.height,
            ExtendedColorType::Rgb8,
        )?;
        Ok(buf)
    }
}

/// Decode a JPEG byte buffer into an RGB8 frame.
pub fn decode_jpeg(bytes: &[u8]) -> Result<RawFrame> {
    let image = image::load_from_memory_with_format(bytes, ImageFormat::Jpeg)?;
    let rgb = image.to_rgb8();
    let (width, height) = rgb.dimensions();
    RawFrame::new(rgb.into_raw(), width, height)
}
