//! Notification sinks for presence transitions
//!
//! A sink receives each `TransitionEvent` exactly once, after the store has
//! already been updated. Delivery failures are returned to the poll cycle,
//! which logs them and moves on.
//!
//! - `LogSink`: tracing output only
//! - `WebhookSink`: JSON POST to a chat-style webhook
//! - `ChannelSink`: forwards into an mpsc channel for embedding and tests

mod webhook;

pub use webhook::WebhookSink;

use crate::error::{Result, TrackerError};
use crate::models::TransitionEvent;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::info;

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, event: &TransitionEvent) -> Result<()>;

    /// Name used in log lines
    fn sink_name(&self) -> &str;
}

#[derive(Debug, Default, Clone)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn deliver(&self, event: &TransitionEvent) -> Result<()> {
        info!(
            event_id = %event.event_id,
            kind = event.kind.as_str(),
            "{}",
            event.summary()
        );
        Ok(())
    }

    fn sink_name(&self) -> &str {
        "log"
    }
}

/// Forwards events into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<TransitionEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<TransitionEvent>) -> Self {
        Self { tx }
    }

    /// Sink plus the receiving half
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TransitionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl NotificationSink for ChannelSink {
    async fn deliver(&self, event: &TransitionEvent) -> Result<()> {
        self.tx
            .send(event.clone())
            .map_err(|_| TrackerError::Upstream("notification channel closed".to_string()))
    }

    fn sink_name(&self) -> &str {
        "channel"
    }
}
