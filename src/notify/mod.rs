//! Concrete notification channel adapters.

pub mod webhook;

pub use webhook::WebhookChannel;

use futures_util::future::BoxFuture;

use crate::alerts::{AlertEvent, NotificationChannel};

/// Channel that writes alerts to stderr; useful for local runs and demos.
#[derive(Debug, Default)]
pub struct StderrChannel;

impl NotificationChannel for StderrChannel {
    fn name(&self) -> &str {
        "stderr"
    }

    fn send<'a>(&'a self, event: &'a AlertEvent) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            eprintln!("ALERT: {}", event.message());
            Ok(())
        })
    }
}
