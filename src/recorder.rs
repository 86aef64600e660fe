//! Durable append-only audit trail with bounded retry.

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use crate::events::DetectionEvent;

/// Destination for immutable audit events.
pub trait EventSink: Send + Sync {
    /// Sink name used in log lines.
    fn name(&self) -> &str;

    /// Appends one event; must be atomic per event.
    fn append(&self, event: &DetectionEvent) -> Result<()>;
}

/// Sink writing one JSON object per line, flushed after every event.
pub struct JsonlEventSink {
    path: PathBuf,
    writer: Mutex<BufWriter<std::fs::File>>,
}

impl JsonlEventSink {
    /// Opens (or creates) the file in append mode.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open event log {path:?}"))?;
        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EventSink for JsonlEventSink {
    fn name(&self) -> &str {
        "jsonl"
    }

    fn append(&self, event: &DetectionEvent) -> Result<()> {
        let line = serde_json::to_string(event).context("failed to serialize event")?;
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| anyhow::anyhow!("event log writer poisoned"))?;
        writeln!(writer, "{line}")
            .and_then(|()| writer.flush())
            .with_context(|| format!("failed to append to event log {:?}", self.path))?;
        Ok(())
    }
}

/// In-memory sink for tests and local runs.
#[derive(Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<DetectionEvent>>,
}

impl MemoryEventSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every event appended so far.
    pub fn events(&self) -> Vec<DetectionEvent> {
        self.events.lock().expect("sink poisoned").clone()
    }
}

impl EventSink for MemoryEventSink {
    fn name(&self) -> &str {
        "memory"
    }

    fn append(&self, event: &DetectionEvent) -> Result<()> {
        self.events
            .lock()
            .map_err(|_| anyhow::anyhow!("memory sink poisoned"))?
            .push(event.clone());
        Ok(())
    }
}

/// Wraps a sink with bounded retry so transient write failures do not drop
/// audit events.
pub struct EventRecorder {
    sink: std::sync::Arc<dyn EventSink>,
    max_retries: usize,
    retry_backoff: Duration,
}

impl EventRecorder {
    /// Creates a recorder with the default retry budget (one retry, 250 ms
    /// base backoff).
    pub fn new(sink: std::sync::Arc<dyn EventSink>) -> Self {
        Self::with_retry(sink, 1, Duration::from_millis(250))
    }

    /// Creates a recorder with an explicit retry budget.
    pub fn with_retry(
        sink: std::sync::Arc<dyn EventSink>,
        max_retries: usize,
        retry_backoff: Duration,
    ) -> Self {
        Self {
            sink,
            max_retries,
            retry_backoff,
        }
    }

    /// Appends one event, retrying with linear backoff before giving up.
    ///
    /// A final failure is logged and returned; it is never silent.
    pub async fn record(&self, event: &DetectionEvent) -> Result<()> {
        let mut attempt = 0usize;
        loop {
            match self.sink.append(event) {
                Ok(()) => return Ok(()),
                Err(err) if attempt < self.max_retries => {
                    attempt += 1;
                    crate::debug_log!(
                        "event sink {} write failed (attempt {attempt}): {err:#}",
                        self.sink.name()
                    );
                    tokio::time::sleep(self.retry_backoff * attempt as u32).await;
                }
                Err(err) => {
                    eprintln!(
                        "event sink {} dropped a {} event for camera {} after {} attempts: {err:#}",
                        self.sink.name(),
                        event.kind,
                        event.camera,
                        attempt + 1
                    );
                    return Err(err).with_context(|| {
                        format!("failed to record {} event", event.kind)
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{CameraId, EventKind};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn event(kind: EventKind) -> DetectionEvent {
        DetectionEvent {
            camera: CameraId::new("cam-a"),
            timestamp_epoch_ms: 1_700_000_000_000,
            kind,
            identity: None,
            confidence: None,
            bounding_box: None,
            frame_checksum: 0,
        }
    }

    struct FlakySink {
        failures_left: AtomicUsize,
        attempts: AtomicUsize,
        inner: MemoryEventSink,
    }

    impl FlakySink {
        fn new(failures: usize) -> Self {
            Self {
                failures_left: AtomicUsize::new(failures),
                attempts: AtomicUsize::new(0),
                inner: MemoryEventSink::new(),
            }
        }
    }

    impl EventSink for FlakySink {
        fn name(&self) -> &str {
            "flaky"
        }

        fn append(&self, event: &DetectionEvent) -> Result<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                anyhow::bail!("disk briefly unavailable");
            }
            self.inner.append(event)
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn transient_failure_is_retried() {
        let sink = Arc::new(FlakySink::new(1));
        let recorder =
            EventRecorder::with_retry(sink.clone(), 1, Duration::from_millis(1));

        recorder
            .record(&event(EventKind::Intrusion))
            .await
            .expect("retry succeeded");
        assert_eq!(sink.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(sink.inner.events().len(), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn exhausted_retries_surface_an_error() {
        let sink = Arc::new(FlakySink::new(10));
        let recorder =
            EventRecorder::with_retry(sink.clone(), 2, Duration::from_millis(1));

        let err = recorder
            .record(&event(EventKind::Registration))
            .await
            .expect_err("sink kept failing");
        assert!(err.to_string().contains("registration"));
        assert_eq!(sink.attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn jsonl_sink_round_trips_events() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("events.jsonl");
        let sink = JsonlEventSink::new(&path).expect("open sink");

        sink.append(&event(EventKind::Intrusion)).expect("append");
        sink.append(&event(EventKind::Recognition)).expect("append");

        let contents = std::fs::read_to_string(&path).expect("read log");
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: DetectionEvent = serde_json::from_str(lines[0]).expect("valid json");
        assert_eq!(parsed.kind, EventKind::Intrusion);
        assert_eq!(parsed.camera, CameraId::new("cam-a"));
    }
}
