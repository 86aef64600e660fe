//! Alert fan-out with per-channel isolation and cooldown-based dedup.

use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::events::{CameraId, EventKind};

/// Payload forwarded to notification channels.
#[derive(Debug, Clone)]
pub struct AlertEvent {
    /// Camera that triggered the alert.
    pub camera: CameraId,
    /// Event category; part of the dedup key.
    pub kind: EventKind,
    /// Capture time of the triggering frame, milliseconds since the epoch.
    pub timestamp_epoch_ms: u64,
}

impl AlertEvent {
    /// Human-readable message body for transports that want plain text.
    pub fn message(&self) -> String {
        format!("{} alert on camera {}", self.kind, self.camera)
    }
}

/// A transport that can deliver one alert.
///
/// Implementations must not panic on delivery failure; they report errors and
/// the dispatcher isolates them from other channels.
pub trait NotificationChannel: Send + Sync {
    /// Short channel name used in dispatch results and logs.
    fn name(&self) -> &str;

    /// Delivers one alert.
    fn send<'a>(&'a self, event: &'a AlertEvent) -> BoxFuture<'a, anyhow::Result<()>>;
}

/// Delivery outcome for a single channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelStatus {
    /// The channel accepted the alert.
    Delivered,
    /// The channel errored; other channels were unaffected.
    Failed(String),
    /// Dedup suppressed the alert before fan-out.
    Suppressed,
}

/// One channel's outcome within a dispatch.
#[derive(Debug, Clone)]
pub struct ChannelAttempt {
    /// Channel name.
    pub channel: String,
    /// What happened on that channel.
    pub status: ChannelStatus,
}

/// Per-channel outcomes for one `notify` call.
#[derive(Debug, Clone)]
pub struct DispatchResult {
    /// Camera the alert concerned.
    pub camera: CameraId,
    /// Alert category.
    pub kind: EventKind,
    /// Whether dedup suppressed the whole dispatch.
    pub suppressed: bool,
    /// Outcome per configured channel.
    pub channels: Vec<ChannelAttempt>,
}

impl DispatchResult {
    /// Whether at least one channel accepted the alert.
    pub fn delivered_any(&self) -> bool {
        self.channels
            .iter()
            .any(|attempt| attempt.status == ChannelStatus::Delivered)
    }
}

/// Deduplicates alerts and fans them out to the configured channels.
pub struct AlertDispatcher {
    cooldown: Duration,
    channels: Vec<Arc<dyn NotificationChannel>>,
    recent: Mutex<HashMap<(CameraId, EventKind), Instant>>,
}

impl AlertDispatcher {
    /// Creates a dispatcher with the given cooldown window and channels.
    pub fn new(cooldown: Duration, channels: Vec<Arc<dyn NotificationChannel>>) -> Self {
        Self {
            cooldown,
            channels,
            recent: Mutex::new(HashMap::new()),
        }
    }

    /// Number of configured channels.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Dispatches one alert, suppressing repeats of the same `(camera, kind)`
    /// within the cooldown window.
    pub async fn notify(&self, event: &AlertEvent) -> DispatchResult {
        let key = (event.camera.clone(), event.kind);
        let now = Instant::now();
        {
            // The dedup map is checked and stamped under one lock, before any
            // channel work, so a concurrent notify for the same key sees the
            // attempt and suppresses instead of double-sending.
            let mut recent = self.recent.lock().await;
            match recent.get(&key) {
                Some(last) if now.duration_since(*last) < self.cooldown => {
                    return DispatchResult {
                        camera: event.camera.clone(),
                        kind: event.kind,
                        suppressed: true,
                        channels: self
                            .channels
                            .iter()
                            .map(|channel| ChannelAttempt {
                                channel: channel.name().to_string(),
                                status: ChannelStatus::Suppressed,
                            })
                            .collect(),
                    };
                }
                _ => {
                    recent.insert(key, now);
                }
            }
        }

        let mut attempts = Vec::with_capacity(self.channels.len());
        for channel in &self.channels {
            let status = match channel.send(event).await {
                Ok(()) => ChannelStatus::Delivered,
                Err(err) => {
                    eprintln!(
                        "alert channel {} failed for camera {}: {err:#}",
                        channel.name(),
                        event.camera
                    );
                    ChannelStatus::Failed(format!("{err:#}"))
                }
            };
            attempts.push(ChannelAttempt {
                channel: channel.name().to_string(),
                status,
            });
        }

        DispatchResult {
            camera: event.camera.clone(),
            kind: event.kind,
            suppressed: false,
            channels: attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::epoch_ms_now;
    use std::sync::Mutex as StdMutex;

    struct RecordingChannel {
        name: &'static str,
        sent: StdMutex<Vec<String>>,
    }

    impl RecordingChannel {
        fn new(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                sent: StdMutex::new(Vec::new()),
            })
        }

        fn sent_count(&self) -> usize {
            self.sent.lock().expect("lock poisoned").len()
        }
    }

    impl NotificationChannel for RecordingChannel {
        fn name(&self) -> &str {
            self.name
        }

        fn send<'a>(&'a self, event: &'a AlertEvent) -> BoxFuture<'a, anyhow::Result<()>> {
            Box::pin(async move {
                self.sent
                    .lock()
                    .expect("lock poisoned")
                    .push(event.message());
                Ok(())
            })
        }
    }

    struct FailingChannel;

    impl NotificationChannel for FailingChannel {
        fn name(&self) -> &str {
            "broken"
        }

        fn send<'a>(&'a self, _event: &'a AlertEvent) -> BoxFuture<'a, anyhow::Result<()>> {
            Box::pin(async { anyhow::bail!("transport down") })
        }
    }

    fn alert(kind: EventKind) -> AlertEvent {
        AlertEvent {
            camera: CameraId::new("cam-a"),
            kind,
            timestamp_epoch_ms: epoch_ms_now(),
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn repeat_within_cooldown_is_suppressed() {
        let channel = RecordingChannel::new("sms");
        let dispatcher = AlertDispatcher::new(
            Duration::from_millis(60),
            vec![channel.clone() as Arc<dyn NotificationChannel>],
        );

        let first = dispatcher.notify(&alert(EventKind::Intrusion)).await;
        assert!(!first.suppressed);
        assert!(first.delivered_any());

        let second = dispatcher.notify(&alert(EventKind::Intrusion)).await;
        assert!(second.suppressed);
        assert_eq!(second.channels[0].status, ChannelStatus::Suppressed);
        assert_eq!(channel.sent_count(), 1);

        tokio::time::sleep(Duration::from_millis(80)).await;
        let third = dispatcher.notify(&alert(EventKind::Intrusion)).await;
        assert!(!third.suppressed);
        assert_eq!(channel.sent_count(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_notifies_deliver_once() {
        let channel = RecordingChannel::new("sms");
        let dispatcher = Arc::new(AlertDispatcher::new(
            Duration::from_secs(30),
            vec![channel.clone() as Arc<dyn NotificationChannel>],
        ));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let dispatcher = Arc::clone(&dispatcher);
            handles.push(tokio::spawn(async move {
                dispatcher.notify(&alert(EventKind::Intrusion)).await
            }));
        }

        let mut delivered = 0usize;
        for handle in handles {
            let result = handle.await.expect("task joined");
            if !result.suppressed {
                delivered += 1;
            }
        }

        assert_eq!(delivered, 1);
        assert_eq!(channel.sent_count(), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn distinct_kinds_do_not_share_cooldown() {
        let channel = RecordingChannel::new("sms");
        let dispatcher = AlertDispatcher::new(
            Duration::from_secs(30),
            vec![channel.clone() as Arc<dyn NotificationChannel>],
        );

        dispatcher.notify(&alert(EventKind::Intrusion)).await;
        let other = dispatcher.notify(&alert(EventKind::Registration)).await;
        assert!(!other.suppressed);
        assert_eq!(channel.sent_count(), 2);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn one_failing_channel_does_not_block_the_rest() {
        let healthy = RecordingChannel::new("email");
        let dispatcher = AlertDispatcher::new(
            Duration::from_secs(30),
            vec![
                Arc::new(FailingChannel) as Arc<dyn NotificationChannel>,
                healthy.clone() as Arc<dyn NotificationChannel>,
            ],
        );

        let result = dispatcher.notify(&alert(EventKind::Intrusion)).await;
        assert!(!result.suppressed);
        assert!(matches!(
            result.channels[0].status,
            ChannelStatus::Failed(_)
        ));
        assert_eq!(result.channels[1].status, ChannelStatus::Delivered);
        assert_eq!(healthy.sent_count(), 1);
    }
}
