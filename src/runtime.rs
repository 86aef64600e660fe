//! Per-camera orchestration loops sharing the resolver and dispatcher.

use anyhow::Result;
use chrono::Timelike;
use futures_util::future::join_all;
use serde::Serialize;
use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::alerts::{AlertDispatcher, AlertEvent, NotificationChannel};
use crate::camera::{Detector, EmbeddingExtractor, FrameSource};
use crate::controls::WatchControls;
use crate::debug_log;
use crate::events::{Detection, DetectionEvent, EventKind};
use crate::index::IndexError;
use crate::policy::{IntrusionDecision, IntrusionPolicy};
use crate::recorder::{EventRecorder, EventSink};
use crate::resolver::IdentityResolver;

/// Supplies the current local hour (0-23) to the intrusion policy.
pub type HourSource = Arc<dyn Fn() -> u8 + Send + Sync>;

/// Hour source backed by the system clock.
pub fn local_hour_source() -> HourSource {
    Arc::new(|| chrono::Local::now().hour() as u8)
}

/// Counters shared across camera loops.
#[derive(Debug, Default)]
pub struct Metrics {
    frames: AtomicU64,
    capture_failures: AtomicU64,
    detector_failures: AtomicU64,
    embedder_failures: AtomicU64,
    intrusions: AtomicU64,
    registrations: AtomicU64,
    recognitions: AtomicU64,
    alerts_suppressed: AtomicU64,
    record_failures: AtomicU64,
}

impl Metrics {
    /// Prints an end-of-run summary.
    pub fn report(&self, elapsed: Duration) {
        let secs = elapsed.as_secs_f32().max(f32::EPSILON);
        let frames = self.frames.load(Ordering::Relaxed);
        println!("--- watch metrics ({secs:.2}s) ---");
        println!("frames processed: {frames}");
        println!("frames/sec: {:.2}", frames as f32 / secs);
        println!(
            "capture failures: {}",
            self.capture_failures.load(Ordering::Relaxed)
        );
        println!(
            "inference failures: {} detector / {} embedder",
            self.detector_failures.load(Ordering::Relaxed),
            self.embedder_failures.load(Ordering::Relaxed)
        );
        println!(
            "intrusions raised: {} ({} suppressed by cooldown)",
            self.intrusions.load(Ordering::Relaxed),
            self.alerts_suppressed.load(Ordering::Relaxed)
        );
        println!(
            "identities: {} registered / {} recognized",
            self.registrations.load(Ordering::Relaxed),
            self.recognitions.load(Ordering::Relaxed)
        );
        println!(
            "record failures: {}",
            self.record_failures.load(Ordering::Relaxed)
        );
    }
}

/// Point-in-time view served by the control surface.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    /// Whether any camera loop is still running.
    pub running: bool,
    /// Number of camera loops currently active.
    pub active_cameras: usize,
    /// Number of cameras configured at start.
    pub configured_cameras: usize,
    /// Set when a non-fatal but operator-relevant failure occurred.
    pub degraded: bool,
    /// Frames processed so far.
    pub frames: u64,
    /// Frames skipped because capture failed.
    pub capture_failures: u64,
    /// Intrusion alerts dispatched.
    pub intrusions: u64,
    /// New identities registered.
    pub registrations: u64,
    /// Existing identities recognized.
    pub recognitions: u64,
    /// Audit events dropped after retries.
    pub record_failures: u64,
}

/// Cloneable handle controlling and observing the camera loops.
#[derive(Clone, Debug)]
pub struct WatchHandle {
    stop_requested: Arc<AtomicBool>,
    active_cameras: Arc<AtomicUsize>,
    degraded: Arc<AtomicBool>,
    metrics: Arc<Metrics>,
    configured_cameras: usize,
}

impl WatchHandle {
    /// Requests shutdown; every loop exits at its next iteration boundary.
    pub fn stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
    }

    /// Whether any camera loop is still active.
    pub fn is_running(&self) -> bool {
        self.active_cameras.load(Ordering::Acquire) > 0
    }

    /// Shared counters for reporting.
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Builds a status snapshot for the control surface.
    pub fn status(&self) -> StatusSnapshot {
        StatusSnapshot {
            running: self.is_running(),
            active_cameras: self.active_cameras.load(Ordering::Acquire),
            configured_cameras: self.configured_cameras,
            degraded: self.degraded.load(Ordering::Acquire),
            frames: self.metrics.frames.load(Ordering::Relaxed),
            capture_failures: self.metrics.capture_failures.load(Ordering::Relaxed),
            intrusions: self.metrics.intrusions.load(Ordering::Relaxed),
            registrations: self.metrics.registrations.load(Ordering::Relaxed),
            recognitions: self.metrics.recognitions.load(Ordering::Relaxed),
            record_failures: self.metrics.record_failures.load(Ordering::Relaxed),
        }
    }
}

/// Running watch: the camera tasks plus their shared handle.
#[derive(Debug)]
pub struct WatchRuntime {
    handle: WatchHandle,
    resolver: Arc<IdentityResolver>,
    workers: Vec<JoinHandle<()>>,
}

impl WatchRuntime {
    /// Handle for stop/status.
    pub fn handle(&self) -> WatchHandle {
        self.handle.clone()
    }

    /// Shared resolver, e.g. for snapshot export at shutdown.
    pub fn resolver(&self) -> Arc<IdentityResolver> {
        Arc::clone(&self.resolver)
    }

    /// Waits for every camera loop to finish.
    pub async fn join(self) {
        join_all(self.workers).await;
    }

    /// Requests shutdown and waits for the loops to drain.
    pub async fn stop_and_join(self) {
        self.handle.stop();
        self.join().await;
    }
}

struct CameraContext {
    stop_requested: Arc<AtomicBool>,
    active_cameras: Arc<AtomicUsize>,
    degraded: Arc<AtomicBool>,
    metrics: Arc<Metrics>,
    controls: WatchControls,
    policy: IntrusionPolicy,
    resolver: Arc<IdentityResolver>,
    dispatcher: Arc<AlertDispatcher>,
    recorder: Arc<EventRecorder>,
    detector: Arc<dyn Detector>,
    embedder: Arc<dyn EmbeddingExtractor>,
    hours: HourSource,
}

/// Starts one orchestration loop per camera source.
///
/// Must be called from within a tokio runtime. Validates the configuration
/// up front: a dimension disagreement between the embedder and the index is a
/// startup error here rather than a per-frame surprise later.
pub fn start(
    controls: WatchControls,
    sources: Vec<Arc<dyn FrameSource>>,
    detector: Arc<dyn Detector>,
    embedder: Arc<dyn EmbeddingExtractor>,
    channels: Vec<Arc<dyn NotificationChannel>>,
    sink: Arc<dyn EventSink>,
    hours: HourSource,
) -> Result<WatchRuntime> {
    anyhow::ensure!(!sources.is_empty(), "at least one camera source is required");
    anyhow::ensure!(
        embedder.dimension() == controls.embedding_dimension(),
        "embedder emits {}-dimension vectors but the index is configured for {}",
        embedder.dimension(),
        controls.embedding_dimension()
    );

    let resolver = Arc::new(IdentityResolver::new(
        controls.embedding_dimension(),
        controls.match_threshold(),
    ));
    let dispatcher = Arc::new(AlertDispatcher::new(controls.alert_cooldown(), channels));
    let recorder = Arc::new(EventRecorder::new(sink));
    let policy = IntrusionPolicy::new(
        controls.intrusion_start_hour(),
        controls.intrusion_end_hour(),
    );

    let stop_requested = Arc::new(AtomicBool::new(false));
    let active_cameras = Arc::new(AtomicUsize::new(sources.len()));
    let degraded = Arc::new(AtomicBool::new(false));
    let metrics = Arc::new(Metrics::default());

    let handle = WatchHandle {
        stop_requested: Arc::clone(&stop_requested),
        active_cameras: Arc::clone(&active_cameras),
        degraded: Arc::clone(&degraded),
        metrics: Arc::clone(&metrics),
        configured_cameras: sources.len(),
    };

    let mut workers = Vec::with_capacity(sources.len());
    for source in sources {
        let ctx = CameraContext {
            stop_requested: Arc::clone(&stop_requested),
            active_cameras: Arc::clone(&active_cameras),
            degraded: Arc::clone(&degraded),
            metrics: Arc::clone(&metrics),
            controls: controls.clone(),
            policy,
            resolver: Arc::clone(&resolver),
            dispatcher: Arc::clone(&dispatcher),
            recorder: Arc::clone(&recorder),
            detector: Arc::clone(&detector),
            embedder: Arc::clone(&embedder),
            hours: Arc::clone(&hours),
        };
        workers.push(tokio::spawn(camera_loop(source, ctx)));
    }

    Ok(WatchRuntime {
        handle,
        resolver,
        workers,
    })
}

async fn camera_loop(source: Arc<dyn FrameSource>, ctx: CameraContext) {
    let camera = source.camera().clone();

    loop {
        if ctx.stop_requested.load(Ordering::Acquire) {
            break;
        }

        let frame = match source.capture().await {
            Ok(frame) => frame,
            Err(err) => {
                ctx.metrics.capture_failures.fetch_add(1, Ordering::Relaxed);
                debug_log!("camera {camera}: {err}");
                sleep(ctx.controls.capture_retry_delay()).await;
                continue;
            }
        };
        ctx.metrics.frames.fetch_add(1, Ordering::Relaxed);

        let detections = match ctx.detector.detect(&frame).await {
            Ok(detections) => detections,
            Err(err) => {
                ctx.metrics.detector_failures.fetch_add(1, Ordering::Relaxed);
                eprintln!("camera {camera}: {err}");
                sleep(ctx.controls.frame_interval()).await;
                continue;
            }
        };

        let hour = (ctx.hours)();
        if let IntrusionDecision::Raise = ctx.policy.evaluate(&detections, hour) {
            let alert = AlertEvent {
                camera: camera.clone(),
                kind: EventKind::Intrusion,
                timestamp_epoch_ms: frame.captured_epoch_ms,
            };
            let result = ctx.dispatcher.notify(&alert).await;
            if result.suppressed {
                ctx.metrics.alerts_suppressed.fetch_add(1, Ordering::Relaxed);
            } else {
                ctx.metrics.intrusions.fetch_add(1, Ordering::Relaxed);
            }

            // Every raise is recorded, suppressed or not; the cooldown only
            // gates channel fan-out.
            let trigger = best_person(&detections);
            let event = DetectionEvent {
                camera: camera.clone(),
                timestamp_epoch_ms: frame.captured_epoch_ms,
                kind: EventKind::Intrusion,
                identity: None,
                confidence: trigger.map(|d| d.confidence),
                bounding_box: trigger.map(|d| d.bounding_box),
                frame_checksum: frame.checksum(),
            };
            if ctx.recorder.record(&event).await.is_err() {
                ctx.metrics.record_failures.fetch_add(1, Ordering::Relaxed);
                ctx.degraded.store(true, Ordering::Release);
            }
        }

        for detection in detections.iter().filter(|d| d.is_person()) {
            let region = frame.crop(&detection.bounding_box);
            if region.is_empty() {
                debug_log!("camera {camera}: detection box outside frame, skipped");
                continue;
            }

            let embedding = match ctx.embedder.embed(&region).await {
                Ok(embedding) => embedding,
                Err(err) => {
                    ctx.metrics.embedder_failures.fetch_add(1, Ordering::Relaxed);
                    eprintln!("camera {camera}: {err}");
                    continue;
                }
            };

            let resolution = match ctx.resolver.resolve(embedding).await {
                Ok(resolution) => resolution,
                Err(err @ IndexError::DimensionMismatch { .. }) => {
                    // Configuration drift between embedder and index; fatal
                    // for this detection, not for the loop.
                    ctx.metrics.embedder_failures.fetch_add(1, Ordering::Relaxed);
                    ctx.degraded.store(true, Ordering::Release);
                    eprintln!("camera {camera}: {err}");
                    continue;
                }
            };

            let kind = if resolution.is_registration() {
                ctx.metrics.registrations.fetch_add(1, Ordering::Relaxed);
                EventKind::Registration
            } else {
                ctx.metrics.recognitions.fetch_add(1, Ordering::Relaxed);
                EventKind::Recognition
            };

            let event = DetectionEvent {
                camera: camera.clone(),
                timestamp_epoch_ms: frame.captured_epoch_ms,
                kind,
                identity: Some(resolution.identity()),
                confidence: Some(detection.confidence),
                bounding_box: Some(detection.bounding_box),
                frame_checksum: frame.checksum(),
            };
            if ctx.recorder.record(&event).await.is_err() {
                ctx.metrics.record_failures.fetch_add(1, Ordering::Relaxed);
                ctx.degraded.store(true, Ordering::Release);
            }

            if kind == EventKind::Registration {
                let alert = AlertEvent {
                    camera: camera.clone(),
                    kind: EventKind::Registration,
                    timestamp_epoch_ms: frame.captured_epoch_ms,
                };
                let result = ctx.dispatcher.notify(&alert).await;
                if result.suppressed {
                    ctx.metrics.alerts_suppressed.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        sleep(ctx.controls.frame_interval()).await;
    }

    ctx.active_cameras.fetch_sub(1, Ordering::AcqRel);
    debug_log!("camera {camera}: loop exited");
}

fn best_person(detections: &[Detection]) -> Option<&Detection> {
    detections
        .iter()
        .filter(|d| d.is_person())
        .max_by(|a, b| {
            a.confidence
                .partial_cmp(&b.confidence)
                .unwrap_or(CmpOrdering::Equal)
        })
}
