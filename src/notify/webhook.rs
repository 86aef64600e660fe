//! Webhook-based alert delivery.

use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::future::BoxFuture;
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use tokio::time::sleep;

use crate::alerts::{AlertEvent, NotificationChannel};

/// Channel that posts alerts as JSON to an HTTP endpoint.
#[derive(Clone)]
pub struct WebhookChannel {
    client: Client,
    endpoint: String,
    max_retries: usize,
}

impl WebhookChannel {
    /// Builds a webhook channel for the given endpoint.
    ///
    /// `max_retries` bounds the total number of send attempts per alert, so a
    /// value of 3 means one initial attempt plus at most two retries.
    pub fn new(endpoint: String, timeout: Duration, max_retries: usize) -> Result<Self> {
        anyhow::ensure!(!endpoint.trim().is_empty(), "missing webhook endpoint");
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("failed to build webhook HTTP client")?;
        Ok(Self {
            client,
            endpoint: endpoint.trim().to_string(),
            max_retries,
        })
    }

    async fn deliver(&self, event: &AlertEvent) -> Result<()> {
        let kind = event.kind.to_string();
        let message = event.message();
        let payload = WebhookPayload {
            camera: event.camera.as_str(),
            kind: &kind,
            timestamp_epoch_ms: event.timestamp_epoch_ms,
            message: &message,
        };

        let mut attempt = 0usize;
        loop {
            let response = self.client.post(&self.endpoint).json(&payload).send().await;
            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return Ok(());
                    }
                    let body = resp
                        .text()
                        .await
                        .unwrap_or_else(|_| "<body unavailable>".to_string());
                    if should_retry(status) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        sleep(retry_backoff(attempt)).await;
                        continue;
                    }
                    anyhow::bail!("webhook delivery failed ({status}): {body}");
                }
                Err(err) => {
                    if is_retryable_error(&err) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        sleep(retry_backoff(attempt)).await;
                        continue;
                    }
                    return Err(err.into());
                }
            }
        }
    }
}

impl NotificationChannel for WebhookChannel {
    fn name(&self) -> &str {
        "webhook"
    }

    fn send<'a>(&'a self, event: &'a AlertEvent) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.deliver(event))
    }
}

fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_body() || err.is_request()
}

fn retry_backoff(attempt: usize) -> Duration {
    let capped = attempt.min(5) as u32;
    Duration::from_millis(250 * (1 << capped))
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    camera: &'a str,
    kind: &'a str,
    timestamp_epoch_ms: u64,
    message: &'a str,
}
