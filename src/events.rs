//! Shared detection and audit records passed between pipeline stages.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::index::IdentityId;

/// Label emitted by detectors for human subjects; the only label the core
/// inspects.
pub const PERSON_LABEL: &str = "person";

/// Identifier naming one configured camera.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CameraId(String);

impl CameraId {
    /// Wraps a camera label.
    pub fn new<S: Into<String>>(label: S) -> Self {
        Self(label.into())
    }

    /// Returns the label as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Axis-aligned detection region in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Left edge in pixels.
    pub x: u32,
    /// Top edge in pixels.
    pub y: u32,
    /// Region width in pixels.
    pub width: u32,
    /// Region height in pixels.
    pub height: u32,
}

/// One labeled region reported by a detector for a single frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    /// Class label assigned by the detector.
    pub label: String,
    /// Detector confidence in `[0, 1]`.
    pub confidence: f32,
    /// Where in the frame the object was found.
    pub bounding_box: BoundingBox,
}

impl Detection {
    /// Whether this detection is a person-class hit.
    pub fn is_person(&self) -> bool {
        self.label == PERSON_LABEL
    }
}

/// Category of an audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A person was present during the sensitive window.
    Intrusion,
    /// A previously unseen identity was created.
    Registration,
    /// An existing identity was matched.
    Recognition,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::Intrusion => "intrusion",
            EventKind::Registration => "registration",
            EventKind::Recognition => "recognition",
        };
        f.write_str(name)
    }
}

/// Immutable audit record appended by the event recorder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionEvent {
    /// Camera that produced the frame.
    pub camera: CameraId,
    /// Capture time in milliseconds since the Unix epoch.
    pub timestamp_epoch_ms: u64,
    /// What happened.
    pub kind: EventKind,
    /// Identity involved, when the event concerns one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<IdentityId>,
    /// Detector confidence carried through from the triggering detection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    /// Region of the triggering detection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<BoundingBox>,
    /// CRC32 of the source frame's pixel data.
    pub frame_checksum: u32,
}

/// Milliseconds since the Unix epoch for the current instant.
pub fn epoch_ms_now() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}
