//! Watch tuning knobs and the CLI surface shared by binaries.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use crate::events::CameraId;

/// Tunable knobs that bound watch behavior.
#[derive(Clone, Debug, PartialEq)]
pub struct WatchControls {
    match_threshold: f32,
    intrusion_start_hour: u8,
    intrusion_end_hour: u8,
    alert_cooldown: Duration,
    embedding_dimension: usize,
    frame_interval: Duration,
    capture_retry_delay: Duration,
}

impl WatchControls {
    /// Squared-distance cutoff below which an embedding matches an existing
    /// identity.
    pub fn match_threshold(&self) -> f32 {
        self.match_threshold
    }

    /// Hour the sensitive window opens.
    pub fn intrusion_start_hour(&self) -> u8 {
        self.intrusion_start_hour
    }

    /// Hour the sensitive window closes (exclusive; 24 = midnight).
    pub fn intrusion_end_hour(&self) -> u8 {
        self.intrusion_end_hour
    }

    /// Time during which repeated alerts for one camera and kind are
    /// suppressed.
    pub fn alert_cooldown(&self) -> Duration {
        self.alert_cooldown
    }

    /// Embedding vector length shared by the extractor and the index.
    pub fn embedding_dimension(&self) -> usize {
        self.embedding_dimension
    }

    /// Delay between loop iterations for each camera.
    pub fn frame_interval(&self) -> Duration {
        self.frame_interval
    }

    /// Back-off applied after a failed capture before the next attempt.
    pub fn capture_retry_delay(&self) -> Duration {
        self.capture_retry_delay
    }
}

impl Default for WatchControls {
    fn default() -> Self {
        Self {
            match_threshold: 0.6,
            intrusion_start_hour: 18,
            intrusion_end_hour: 24,
            alert_cooldown: Duration::from_secs(30),
            embedding_dimension: 128,
            frame_interval: Duration::from_millis(200),
            capture_retry_delay: Duration::from_secs(1),
        }
    }
}

/// Reference to one configured capture device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraSource {
    /// Local capture device by index.
    Device(u32),
    /// Network stream (rtsp/http/https).
    Stream(Url),
}

impl CameraSource {
    /// Parses a device index or stream URL.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        anyhow::ensure!(!raw.is_empty(), "camera source is empty");
        if raw.chars().all(|c| c.is_ascii_digit()) {
            let index = raw
                .parse::<u32>()
                .with_context(|| format!("invalid device index {raw:?}"))?;
            return Ok(CameraSource::Device(index));
        }
        let url = Url::parse(raw).with_context(|| format!("invalid camera URL {raw:?}"))?;
        anyhow::ensure!(
            matches!(url.scheme(), "rtsp" | "http" | "https"),
            "unsupported camera scheme {:?} in {raw:?}",
            url.scheme()
        );
        Ok(CameraSource::Stream(url))
    }

    /// Stable camera identifier derived from the source.
    pub fn camera_id(&self) -> CameraId {
        match self {
            CameraSource::Device(index) => CameraId::new(format!("device-{index}")),
            CameraSource::Stream(url) => CameraId::new(url.as_str()),
        }
    }
}

/// Command-line interface shared by binaries that want watch controls.
#[derive(Parser, Debug, Clone)]
#[command(name = "vigil", about = "Configurable multi-camera watch controls")]
pub struct Cli {
    /// Seconds to run before requesting shutdown
    #[arg(long, env = "VIGIL_DURATION", default_value_t = 60)]
    pub duration_secs: u64,

    /// Squared-distance cutoff separating a match from a new registration
    #[arg(long, env = "VIGIL_MATCH_THRESHOLD", default_value_t = 0.6)]
    pub match_threshold: f32,

    /// Hour (0-23) when the sensitive window opens
    #[arg(long, env = "VIGIL_INTRUSION_START", default_value_t = 18)]
    pub intrusion_start_hour: u8,

    /// Hour (1-24, exclusive) when the sensitive window closes; must be later
    /// than the start
    #[arg(long, env = "VIGIL_INTRUSION_END", default_value_t = 24)]
    pub intrusion_end_hour: u8,

    /// Seconds during which repeated alerts for one camera and kind are
    /// suppressed
    #[arg(long, env = "VIGIL_ALERT_COOLDOWN", default_value_t = 30)]
    pub alert_cooldown_secs: u64,

    /// Embedding vector length shared by the extractor and the index
    #[arg(long, env = "VIGIL_EMBEDDING_DIM", default_value_t = 128)]
    pub embedding_dimension: usize,

    /// Camera sources, comma separated (device indices or rtsp:// URLs)
    #[arg(long, env = "VIGIL_CAMERAS", default_value = "0")]
    pub camera_sources: String,

    /// Milliseconds to wait between loop iterations per camera
    #[arg(long, env = "VIGIL_FRAME_INTERVAL_MS", default_value_t = 200)]
    pub frame_interval_ms: u64,

    /// Milliseconds to back off after a failed capture
    #[arg(long, env = "VIGIL_CAPTURE_RETRY_MS", default_value_t = 1000)]
    pub capture_retry_ms: u64,

    /// Path receiving the JSONL audit event stream
    #[arg(long, env = "VIGIL_EVENT_LOG", default_value = "events.jsonl")]
    pub event_log: PathBuf,
}

impl Cli {
    /// Validates the parsed CLI and converts it into `WatchControls`.
    pub fn build_controls(&self) -> Result<WatchControls> {
        anyhow::ensure!(
            self.match_threshold.is_finite() && self.match_threshold > 0.0,
            "match threshold must be a positive finite number"
        );
        anyhow::ensure!(
            self.intrusion_start_hour <= 23,
            "intrusion start hour must be 0-23"
        );
        anyhow::ensure!(
            self.intrusion_end_hour <= 24,
            "intrusion end hour must be 1-24"
        );
        anyhow::ensure!(
            self.intrusion_end_hour > self.intrusion_start_hour,
            "intrusion window must close after it opens; windows wrapping past midnight are not supported"
        );
        anyhow::ensure!(
            self.embedding_dimension > 0,
            "embedding dimension must be positive"
        );
        Ok(WatchControls {
            match_threshold: self.match_threshold,
            intrusion_start_hour: self.intrusion_start_hour,
            intrusion_end_hour: self.intrusion_end_hour,
            alert_cooldown: Duration::from_secs(self.alert_cooldown_secs),
            embedding_dimension: self.embedding_dimension,
            frame_interval: Duration::from_millis(self.frame_interval_ms),
            capture_retry_delay: Duration::from_millis(self.capture_retry_ms),
        })
    }

    /// Returns the requested run duration.
    pub fn run_duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }

    /// Parses the configured camera source list.
    pub fn sources(&self) -> Result<Vec<CameraSource>> {
        let sources: Vec<CameraSource> = self
            .camera_sources
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(CameraSource::parse)
            .collect::<Result<_>>()?;
        anyhow::ensure!(!sources.is_empty(), "at least one camera source is required");
        Ok(sources)
    }
}
