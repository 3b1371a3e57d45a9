//! Webhook delivery for transition events

use super::NotificationSink;
use crate::error::{Result, TrackerError};
use crate::models::TransitionEvent;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Posts `{"content": summary, "event": event}` to a webhook URL.
///
/// `content` renders directly in Discord/Slack-compatible hooks; `event`
/// carries the structured payload for anything else.
pub struct WebhookSink {
    url: String,
    http_client: reqwest::Client,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let url = url.into();
        if reqwest::Url::parse(&url).is_err() {
            return Err(TrackerError::Configuration(format!(
                "invalid webhook url: {}",
                url
            )));
        }

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self { url, http_client })
    }
}

impl std::fmt::Debug for WebhookSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookSink").finish_non_exhaustive()
    }
}

pub(crate) fn webhook_payload(event: &TransitionEvent) -> serde_json::Value {
    serde_json::json!({
        "content": event.summary(),
        "event": event,
    })
}

#[async_trait]
impl NotificationSink for WebhookSink {
    async fn deliver(&self, event: &TransitionEvent) -> Result<()> {
        let response = self
            .http_client
            .post(&self.url)
            .json(&webhook_payload(event))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TrackerError::Upstream(format!(
                "webhook returned {}: {}",
                status, body
            )));
        }

        debug!("Delivered {} to webhook", event.event_id);
        Ok(())
    }

    fn sink_name(&self) -> &str {
        "webhook"
    }
}
