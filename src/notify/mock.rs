//! Sinks that do not leave the process.

use super::{NotificationSink, SendError};
use async_trait::async_trait;
use std::sync::Mutex;
use tracing::info;

/// Writes notifications to the log instead of delivering them.
///
/// Used when no bot token is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn send(&self, recipients: &[String], message: &str) -> Result<(), SendError> {
        info!(recipients = ?recipients, %message, "Notification (log only)");
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub recipients: Vec<String>,
    pub message: String,
}

/// Records every message for assertions; optionally fails every send.
#[derive(Debug, Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<SentMessage>>,
    fail: bool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Messages delivered so far, oldest first.
    pub fn messages(&self) -> Vec<SentMessage> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn send(&self, recipients: &[String], message: &str) -> Result<(), SendError> {
        if self.fail {
            return Err(SendError::Http("sink unreachable".to_string()));
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(SentMessage {
                recipients: recipients.to_vec(),
                message: message.to_string(),
            });
        }
        Ok(())
    }
}
