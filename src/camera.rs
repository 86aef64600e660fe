//! Capture and inference seams consumed by the per-camera pipeline.

use futures_util::future::BoxFuture;
use std::fmt;

use crate::events::{BoundingBox, CameraId, Detection};

/// Bytes per pixel; frames are 8-bit RGB.
pub const FRAME_CHANNELS: usize = 3;

/// One captured frame with owned pixel data.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Camera that produced the frame.
    pub camera: CameraId,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Capture time, milliseconds since the Unix epoch.
    pub captured_epoch_ms: u64,
    pixels: Vec<u8>,
    checksum: u32,
}

impl Frame {
    /// Builds a frame from raw RGB8 pixel data, validating the buffer length
    /// and computing the audit checksum.
    pub fn new(
        camera: CameraId,
        width: u32,
        height: u32,
        captured_epoch_ms: u64,
        pixels: Vec<u8>,
    ) -> Result<Self, CaptureError> {
        let expected = width as usize * height as usize * FRAME_CHANNELS;
        if pixels.len() != expected {
            return Err(CaptureError::Decode(format!(
                "{width}x{height} frame needs {expected} bytes, got {}",
                pixels.len()
            )));
        }
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&pixels);
        let checksum = hasher.finalize();
        Ok(Self {
            camera,
            width,
            height,
            captured_epoch_ms,
            pixels,
            checksum,
        })
    }

    /// Raw pixel bytes in row-major RGB order.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// CRC32 of the pixel data, recorded on audit events.
    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    /// Copies out the sub-image under `bbox`, clamped to the frame bounds.
    ///
    /// A box fully outside the frame yields an empty region.
    pub fn crop(&self, bbox: &BoundingBox) -> FrameRegion {
        let x0 = bbox.x.min(self.width);
        let y0 = bbox.y.min(self.height);
        let x1 = bbox.x.saturating_add(bbox.width).min(self.width);
        let y1 = bbox.y.saturating_add(bbox.height).min(self.height);
        let out_width = x1 - x0;
        let out_height = y1 - y0;

        let mut pixels =
            Vec::with_capacity(out_width as usize * out_height as usize * FRAME_CHANNELS);
        for row in y0..y1 {
            let start = (row as usize * self.width as usize + x0 as usize) * FRAME_CHANNELS;
            let end = start + out_width as usize * FRAME_CHANNELS;
            pixels.extend_from_slice(&self.pixels[start..end]);
        }

        FrameRegion {
            width: out_width,
            height: out_height,
            pixels,
        }
    }
}

/// Cropped sub-image handed to the embedding extractor.
#[derive(Debug, Clone)]
pub struct FrameRegion {
    /// Region width in pixels.
    pub width: u32,
    /// Region height in pixels.
    pub height: u32,
    /// Row-major RGB bytes.
    pub pixels: Vec<u8>,
}

impl FrameRegion {
    /// Whether the region contains no pixels.
    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }
}

/// Transient failure while reading a frame; the camera loop skips the frame
/// and continues.
#[derive(Debug)]
pub enum CaptureError {
    /// The device or stream could not produce a frame.
    SourceUnavailable(String),
    /// The frame data was malformed.
    Decode(String),
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::SourceUnavailable(reason) => {
                write!(f, "capture source unavailable: {reason}")
            }
            CaptureError::Decode(reason) => write!(f, "frame decode failed: {reason}"),
        }
    }
}

impl std::error::Error for CaptureError {}

/// Detector or embedder failure for one frame or region; the loop skips that
/// detection and continues.
#[derive(Debug)]
pub struct InferenceError {
    message: String,
}

impl InferenceError {
    /// Wraps a backend error message.
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for InferenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "inference failed: {}", self.message)
    }
}

impl std::error::Error for InferenceError {}

/// Produces frames for one camera.
pub trait FrameSource: Send + Sync {
    /// Identifier of the camera behind this source.
    fn camera(&self) -> &CameraId;

    /// Captures the next frame; may suspend while the device responds.
    fn capture(&self) -> BoxFuture<'_, Result<Frame, CaptureError>>;
}

/// Object detector applied to whole frames.
pub trait Detector: Send + Sync {
    /// Runs detection on one frame.
    fn detect<'a>(
        &'a self,
        frame: &'a Frame,
    ) -> BoxFuture<'a, Result<Vec<Detection>, InferenceError>>;
}

/// Embedding network applied to cropped person regions.
pub trait EmbeddingExtractor: Send + Sync {
    /// Output dimensionality; validated against the index at startup.
    fn dimension(&self) -> usize;

    /// Produces a fixed-length vector for one region.
    fn embed<'a>(
        &'a self,
        region: &'a FrameRegion,
    ) -> BoxFuture<'a, Result<Vec<f32>, InferenceError>>;
}
