//! Sensitive-window intrusion rule evaluated once per frame.

use crate::events::Detection;

/// Whether a frame's detections constitute an intrusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntrusionDecision {
    /// No intrusion condition holds.
    None,
    /// A person is present inside the sensitive window.
    Raise,
}

/// Stateless predicate over detections and the local hour.
///
/// The window is `[start_hour, end_hour)` within a single day. Windows that
/// wrap past midnight are rejected when controls are built rather than
/// silently handled here.
#[derive(Debug, Clone, Copy)]
pub struct IntrusionPolicy {
    start_hour: u8,
    end_hour: u8,
}

impl IntrusionPolicy {
    /// Creates a policy for the given window; hours were validated by
    /// [`crate::controls::Cli::build_controls`].
    pub fn new(start_hour: u8, end_hour: u8) -> Self {
        Self {
            start_hour,
            end_hour,
        }
    }

    /// Raises iff a person-class detection is present and `hour` falls inside
    /// the sensitive window.
    pub fn evaluate(&self, detections: &[Detection], hour: u8) -> IntrusionDecision {
        let in_window = hour >= self.start_hour && hour < self.end_hour;
        if in_window && detections.iter().any(Detection::is_person) {
            IntrusionDecision::Raise
        } else {
            IntrusionDecision::None
        }
    }
}
