//! Demo watch loop wired to synthetic capture and inference adapters.
//!
//! Generates frames locally so the full pipeline (detect, resolve, alert,
//! record) can run without camera hardware or model weights.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use futures_util::future::BoxFuture;
use tokio::time::sleep;

use vigil::camera::FRAME_CHANNELS;
use vigil::notify::{StderrChannel, WebhookChannel};
use vigil::{
    local_hour_source, BoundingBox, CameraId, CaptureError, Detection, Detector,
    EmbeddingExtractor, Frame, FrameRegion, FrameSource, InferenceError, JsonlEventSink,
    NotificationChannel, PERSON_LABEL,
};

#[derive(Parser, Debug)]
#[command(name = "vigil", about = "Run the watch engine against synthetic cameras")]
struct DemoCli {
    #[command(flatten)]
    watch: vigil::Cli,

    /// Optional webhook endpoint receiving alert JSON
    #[arg(long, env = "VIGIL_WEBHOOK_URL")]
    webhook_url: Option<String>,

    /// Path receiving the identity snapshot written at shutdown
    #[arg(long, env = "VIGIL_IDENTITY_LOG", default_value = "identities.jsonl")]
    identity_log: std::path::PathBuf,
}

const DEMO_FRAME_SIDE: u32 = 32;

/// Frame source that synthesizes a small RGB frame per capture.
struct SyntheticSource {
    camera: CameraId,
    counter: AtomicU64,
}

impl SyntheticSource {
    fn new(camera: CameraId) -> Self {
        Self {
            camera,
            counter: AtomicU64::new(0),
        }
    }
}

impl FrameSource for SyntheticSource {
    fn camera(&self) -> &CameraId {
        &self.camera
    }

    fn capture(&self) -> BoxFuture<'_, Result<Frame, CaptureError>> {
        Box::pin(async move {
            let tick = self.counter.fetch_add(1, Ordering::Relaxed);
            let side = DEMO_FRAME_SIDE as usize;
            // Slowly drifting intensity so consecutive embeddings cluster.
            let base = 96 + (tick % 8) as u8;
            let pixels = vec![base; side * side * FRAME_CHANNELS];
            Frame::new(
                self.camera.clone(),
                DEMO_FRAME_SIDE,
                DEMO_FRAME_SIDE,
                vigil::events::epoch_ms_now(),
                pixels,
            )
        })
    }
}

/// Detector that reports a person on every third frame.
struct StrideDetector {
    seen: AtomicU64,
}

impl StrideDetector {
    fn new() -> Self {
        Self {
            seen: AtomicU64::new(0),
        }
    }
}

impl Detector for StrideDetector {
    fn detect<'a>(
        &'a self,
        _frame: &'a Frame,
    ) -> BoxFuture<'a, Result<Vec<Detection>, InferenceError>> {
        Box::pin(async move {
            let tick = self.seen.fetch_add(1, Ordering::Relaxed);
            if tick % 3 != 0 {
                return Ok(Vec::new());
            }
            Ok(vec![Detection {
                label: PERSON_LABEL.to_string(),
                confidence: 0.92,
                bounding_box: BoundingBox {
                    x: 4,
                    y: 4,
                    width: 16,
                    height: 24,
                },
            }])
        })
    }
}

/// Embedder that mean-pools pixel intensity into each vector slot.
struct MeanPoolEmbedder {
    dimension: usize,
}

impl EmbeddingExtractor for MeanPoolEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed<'a>(
        &'a self,
        region: &'a FrameRegion,
    ) -> BoxFuture<'a, Result<Vec<f32>, InferenceError>> {
        Box::pin(async move {
            if region.is_empty() {
                return Err(InferenceError::new("empty region"));
            }
            let sum: u64 = region.pixels.iter().map(|&b| b as u64).sum();
            let mean = sum as f32 / region.pixels.len() as f32 / 255.0;
            Ok(vec![mean; self.dimension])
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = DemoCli::parse();
    let controls = cli.watch.build_controls()?;
    let run_duration = cli.watch.run_duration();

    let sources: Vec<Arc<dyn FrameSource>> = cli
        .watch
        .sources()?
        .iter()
        .map(|source| {
            Arc::new(SyntheticSource::new(source.camera_id())) as Arc<dyn FrameSource>
        })
        .collect();

    let mut channels: Vec<Arc<dyn NotificationChannel>> = vec![Arc::new(StderrChannel)];
    if let Some(url) = &cli.webhook_url {
        channels.push(Arc::new(WebhookChannel::new(
            url.clone(),
            Duration::from_secs(10),
            3,
        )?));
    }

    let sink = Arc::new(JsonlEventSink::new(&cli.watch.event_log)?);
    let detector = Arc::new(StrideDetector::new());
    let embedder = Arc::new(MeanPoolEmbedder {
        dimension: controls.embedding_dimension(),
    });

    let start = Instant::now();
    let runtime = vigil::start(
        controls,
        sources,
        detector,
        embedder,
        channels,
        sink,
        local_hour_source(),
    )?;
    let handle = runtime.handle();

    sleep(run_duration).await;
    handle.stop();
    let resolver = runtime.resolver();
    runtime.join().await;

    handle.metrics().report(start.elapsed());
    write_identity_snapshot(&cli.identity_log, &resolver).await?;
    println!(
        "status: {}",
        serde_json::to_string(&handle.status()).context("failed to render status")?
    );
    Ok(())
}

async fn write_identity_snapshot(
    path: &std::path::Path,
    resolver: &vigil::IdentityResolver,
) -> Result<()> {
    let records = resolver.export().await;
    let file =
        File::create(path).with_context(|| format!("failed to create snapshot {path:?}"))?;
    let mut writer = BufWriter::new(file);
    for record in &records {
        let line = serde_json::to_string(record).context("failed to serialize identity")?;
        writeln!(writer, "{line}")?;
    }
    writer.flush()?;
    println!("wrote {} identities to {path:?}", records.len());
    Ok(())
}
