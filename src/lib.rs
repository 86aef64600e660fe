#![warn(missing_docs)]
//! Core library entry points for the vigil watch engine.
//!
//! The crate ingests frames from one or more cameras, decides whether each
//! detected person is a known identity or a new registration, and raises
//! deduplicated intrusion alerts during a configured sensitive window.

pub mod alerts;
pub mod camera;
pub mod controls;
pub mod events;
pub mod index;
pub mod notify;
pub mod policy;
pub mod recorder;
pub mod resolver;
pub mod runtime;
pub mod store;

pub use alerts::{
    AlertDispatcher, AlertEvent, ChannelAttempt, ChannelStatus, DispatchResult,
    NotificationChannel,
};
pub use camera::{
    CaptureError, Detector, EmbeddingExtractor, Frame, FrameRegion, FrameSource, InferenceError,
};
pub use controls::{CameraSource, Cli, WatchControls};
pub use events::{BoundingBox, CameraId, Detection, DetectionEvent, EventKind, PERSON_LABEL};
pub use index::{Identity, IdentityId, IdentityIndex, IndexError, SearchHit};
pub use policy::{IntrusionDecision, IntrusionPolicy};
pub use recorder::{EventRecorder, EventSink, JsonlEventSink, MemoryEventSink};
pub use resolver::{IdentityRecord, IdentityResolver, Resolution};
pub use runtime::{
    local_hour_source, start, HourSource, Metrics, StatusSnapshot, WatchHandle, WatchRuntime,
};
pub use store::TableName;

#[cfg(feature = "debug_logs")]
#[macro_export]
// This allows use of the `eprintln!` macro via `debug_log!` macro.
macro_rules! debug_log {
        ($($arg:tt)*) => {
            eprintln!($($arg)*);
        };
    }
#[cfg(not(feature = "debug_logs"))]
#[macro_export]
// This effectively disables the `eprintln!` macro, effectively removing it from the code during
// compilation.
macro_rules! debug_log {
    ($($arg:tt)*) => {};
}
