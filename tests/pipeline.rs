//! End-to-end orchestration tests with scripted capture and inference fakes.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;
use futures_util::future::BoxFuture;
use tokio::time::sleep;

use vigil::camera::FRAME_CHANNELS;
use vigil::{
    AlertEvent, BoundingBox, CameraId, CaptureError, Detection, Detector, EmbeddingExtractor,
    EventKind, Frame, FrameRegion, FrameSource, InferenceError, MemoryEventSink,
    NotificationChannel, WatchControls, PERSON_LABEL,
};

const DIM: usize = 4;
const SIDE: u32 = 8;

fn test_controls() -> WatchControls {
    // tight timings so the loops spin many iterations inside a short test
    vigil::Cli::parse_from([
        "vigil",
        "--embedding-dimension",
        "4",
        "--frame-interval-ms",
        "1",
        "--capture-retry-ms",
        "1",
        "--alert-cooldown-secs",
        "30",
    ])
    .build_controls()
    .expect("controls valid")
}

/// Source that emits frames with a fixed pixel intensity, then fails.
struct ScriptedSource {
    camera: CameraId,
    frames: Mutex<VecDeque<u8>>,
}

impl ScriptedSource {
    fn new(camera: &str, intensities: &[u8]) -> Arc<Self> {
        Arc::new(Self {
            camera: CameraId::new(camera),
            frames: Mutex::new(intensities.iter().copied().collect()),
        })
    }
}

impl FrameSource for ScriptedSource {
    fn camera(&self) -> &CameraId {
        &self.camera
    }

    fn capture(&self) -> BoxFuture<'_, Result<Frame, CaptureError>> {
        Box::pin(async move {
            let intensity = self
                .frames
                .lock()
                .expect("script poisoned")
                .pop_front()
                .ok_or_else(|| CaptureError::SourceUnavailable("script exhausted".into()))?;
            let pixels = vec![intensity; SIDE as usize * SIDE as usize * FRAME_CHANNELS];
            Frame::new(self.camera.clone(), SIDE, SIDE, 1_700_000_000_000, pixels)
        })
    }
}

/// Source whose captures always fail.
struct BrokenSource {
    camera: CameraId,
    attempts: AtomicU64,
}

impl BrokenSource {
    fn new(camera: &str) -> Arc<Self> {
        Arc::new(Self {
            camera: CameraId::new(camera),
            attempts: AtomicU64::new(0),
        })
    }
}

impl FrameSource for BrokenSource {
    fn camera(&self) -> &CameraId {
        &self.camera
    }

    fn capture(&self) -> BoxFuture<'_, Result<Frame, CaptureError>> {
        Box::pin(async move {
            self.attempts.fetch_add(1, Ordering::Relaxed);
            Err(CaptureError::SourceUnavailable("lens cap on".into()))
        })
    }
}

/// Detector that reports one person per frame.
struct AlwaysPerson;

impl Detector for AlwaysPerson {
    fn detect<'a>(
        &'a self,
        _frame: &'a Frame,
    ) -> BoxFuture<'a, Result<Vec<Detection>, InferenceError>> {
        Box::pin(async {
            Ok(vec![Detection {
                label: PERSON_LABEL.to_string(),
                confidence: 0.95,
                bounding_box: BoundingBox {
                    x: 1,
                    y: 1,
                    width: 4,
                    height: 4,
                },
            }])
        })
    }
}

/// Embedder deriving the vector from the region's first pixel, so frames with
/// the same intensity land on the same identity.
struct IntensityEmbedder;

impl EmbeddingExtractor for IntensityEmbedder {
    fn dimension(&self) -> usize {
        DIM
    }

    fn embed<'a>(
        &'a self,
        region: &'a FrameRegion,
    ) -> BoxFuture<'a, Result<Vec<f32>, InferenceError>> {
        Box::pin(async move {
            let first = *region
                .pixels
                .first()
                .ok_or_else(|| InferenceError::new("empty region"))?;
            Ok(vec![first as f32 / 255.0; DIM])
        })
    }
}

struct CountingChannel {
    delivered: Mutex<Vec<AlertEvent>>,
}

impl CountingChannel {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            delivered: Mutex::new(Vec::new()),
        })
    }

    fn delivered(&self) -> Vec<AlertEvent> {
        self.delivered.lock().expect("channel poisoned").clone()
    }
}

impl NotificationChannel for CountingChannel {
    fn name(&self) -> &str {
        "counting"
    }

    fn send<'a>(&'a self, event: &'a AlertEvent) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            self.delivered
                .lock()
                .expect("channel poisoned")
                .push(event.clone());
            Ok(())
        })
    }
}

fn in_window_hours() -> vigil::HourSource {
    Arc::new(|| 20)
}

fn out_of_window_hours() -> vigil::HourSource {
    Arc::new(|| 9)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn same_person_across_cameras_registers_once() {
    let sink = Arc::new(MemoryEventSink::new());
    let channel = CountingChannel::new();

    // Two cameras seeing the same intensity -> same visual identity.
    let sources: Vec<Arc<dyn FrameSource>> = vec![
        ScriptedSource::new("cam-a", &[120, 120, 120]),
        ScriptedSource::new("cam-b", &[120, 120]),
    ];

    let runtime = vigil::start(
        test_controls(),
        sources,
        Arc::new(AlwaysPerson),
        Arc::new(IntensityEmbedder),
        vec![channel.clone() as Arc<dyn NotificationChannel>],
        sink.clone(),
        in_window_hours(),
    )
    .expect("startup validated");
    let handle = runtime.handle();
    assert!(handle.is_running());

    sleep(Duration::from_millis(200)).await;
    let resolver = runtime.resolver();
    runtime.stop_and_join().await;
    assert!(!handle.is_running());

    assert_eq!(resolver.identity_count().await, 1);
    assert_eq!(resolver.entry_count().await, 5);

    let events = sink.events();
    let registrations: Vec<_> = events
        .iter()
        .filter(|e| e.kind == EventKind::Registration)
        .collect();
    let recognitions: Vec<_> = events
        .iter()
        .filter(|e| e.kind == EventKind::Recognition)
        .collect();
    let intrusions: Vec<_> = events
        .iter()
        .filter(|e| e.kind == EventKind::Intrusion)
        .collect();

    assert_eq!(registrations.len(), 1);
    assert_eq!(recognitions.len(), 4);
    assert_eq!(intrusions.len(), 5);

    let registered = registrations[0].identity.expect("registration has identity");
    assert!(recognitions.iter().all(|e| e.identity == Some(registered)));

    // Intrusion alerts deduped per camera within the 30s cooldown: one per
    // camera, plus one registration alert from whichever camera won the race.
    let delivered = channel.delivered();
    let intrusion_alerts = delivered
        .iter()
        .filter(|a| a.kind == EventKind::Intrusion)
        .count();
    let registration_alerts = delivered
        .iter()
        .filter(|a| a.kind == EventKind::Registration)
        .count();
    assert_eq!(intrusion_alerts, 2);
    assert_eq!(registration_alerts, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn distinct_appearances_register_separately() {
    let sink = Arc::new(MemoryEventSink::new());
    let channel = CountingChannel::new();

    // Intensities far apart in embedding space -> two identities.
    let sources: Vec<Arc<dyn FrameSource>> =
        vec![ScriptedSource::new("cam-a", &[10, 240, 10, 240])];

    let runtime = vigil::start(
        test_controls(),
        sources,
        Arc::new(AlwaysPerson),
        Arc::new(IntensityEmbedder),
        vec![channel as Arc<dyn NotificationChannel>],
        sink.clone(),
        out_of_window_hours(),
    )
    .expect("startup validated");

    sleep(Duration::from_millis(200)).await;
    let resolver = runtime.resolver();
    runtime.stop_and_join().await;

    assert_eq!(resolver.identity_count().await, 2);

    // Outside the sensitive window: people are resolved but no intrusions.
    let events = sink.events();
    assert!(events.iter().all(|e| e.kind != EventKind::Intrusion));
    assert_eq!(
        events
            .iter()
            .filter(|e| e.kind == EventKind::Registration)
            .count(),
        2
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn capture_failures_do_not_kill_the_loop() {
    let sink = Arc::new(MemoryEventSink::new());
    let source = BrokenSource::new("cam-dead");

    let runtime = vigil::start(
        test_controls(),
        vec![source.clone() as Arc<dyn FrameSource>],
        Arc::new(AlwaysPerson),
        Arc::new(IntensityEmbedder),
        Vec::new(),
        sink.clone(),
        in_window_hours(),
    )
    .expect("startup validated");
    let handle = runtime.handle();

    sleep(Duration::from_millis(100)).await;
    assert!(handle.is_running());
    runtime.stop_and_join().await;

    assert!(source.attempts.load(Ordering::Relaxed) > 1);
    assert!(sink.events().is_empty());

    let status = handle.status();
    assert!(!status.running);
    assert!(status.capture_failures > 0);
    assert_eq!(status.frames, 0);
    assert!(!status.degraded);
}

#[tokio::test(flavor = "current_thread")]
async fn dimension_disagreement_fails_at_startup() {
    struct WrongDimEmbedder;

    impl EmbeddingExtractor for WrongDimEmbedder {
        fn dimension(&self) -> usize {
            DIM + 1
        }

        fn embed<'a>(
            &'a self,
            _region: &'a FrameRegion,
        ) -> BoxFuture<'a, Result<Vec<f32>, InferenceError>> {
            Box::pin(async { Ok(vec![0.0; DIM + 1]) })
        }
    }

    let err = vigil::start(
        test_controls(),
        vec![ScriptedSource::new("cam-a", &[100]) as Arc<dyn FrameSource>],
        Arc::new(AlwaysPerson),
        Arc::new(WrongDimEmbedder),
        Vec::new(),
        Arc::new(MemoryEventSink::new()),
        in_window_hours(),
    )
    .expect_err("mismatched dimensions rejected");
    assert!(err.to_string().contains("dimension"));
}
