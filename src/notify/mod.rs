//! Throttled notification dispatch to administrators and subscribers.

use crate::config::Config;
use crate::domain::{EntityState, TimeMs};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

pub mod mock;
pub mod telegram;

pub use mock::{LogSink, RecordingSink};
pub use telegram::TelegramSink;

/// Delivery of a text message to a list of addresses.
#[async_trait]
pub trait NotificationSink: Send + Sync + fmt::Debug {
    async fn send(&self, recipients: &[String], message: &str) -> Result<(), SendError>;
}

#[derive(Debug, Clone, Error)]
pub enum SendError {
    #[error("http error: {0}")]
    Http(String),
    #[error("unexpected http status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("message rejected for {recipient}: {reason}")]
    Rejected { recipient: String, reason: String },
}

/// Notification channel; each has its own throttle clock per entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Error,
    Change,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Error => write!(f, "error"),
            EventKind::Change => write!(f, "change"),
        }
    }
}

/// What happened to a notification request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Sent,
    Suppressed,
}

#[derive(Debug, Clone)]
pub struct Notifier {
    sink: Arc<dyn NotificationSink>,
    admins: Vec<String>,
    subscribers: Vec<String>,
    errors_interval_min: i64,
    changes_interval_min: i64,
}

impl Notifier {
    pub fn new(
        sink: Arc<dyn NotificationSink>,
        admins: Vec<String>,
        subscribers: Vec<String>,
        errors_interval_min: i64,
        changes_interval_min: i64,
    ) -> Self {
        Self {
            sink,
            admins,
            subscribers,
            errors_interval_min,
            changes_interval_min,
        }
    }

    pub fn from_config(sink: Arc<dyn NotificationSink>, config: &Config) -> Self {
        Self::new(
            sink,
            config.admin_contacts.clone(),
            config.subscriber_contacts.clone(),
            config.settings.report_errors_delay_interval,
            config.settings.report_changes_delay_interval,
        )
    }

    /// Send `message` unless the entity's throttle window for `kind` is still open.
    ///
    /// The window's timestamp in `state` is moved to `now` before sending, so a
    /// failed send still counts against the window.
    pub async fn notify(
        &self,
        kind: EventKind,
        entity: &str,
        message: &str,
        state: &mut EntityState,
        now: TimeMs,
    ) -> Result<Dispatch, SendError> {
        let (last_sent, interval_min, recipients) = match kind {
            EventKind::Error => (
                &mut state.last_error_notified_at,
                self.errors_interval_min,
                &self.admins,
            ),
            EventKind::Change => (
                &mut state.last_change_notified_at,
                self.changes_interval_min,
                &self.subscribers,
            ),
        };

        if let Some(previous) = *last_sent {
            if now.millis_since(previous) < interval_min.saturating_mul(60_000) {
                debug!(%kind, entity, last_sent = %previous, "Notification suppressed by throttle");
                return Ok(Dispatch::Suppressed);
            }
        }
        *last_sent = Some(now);

        if recipients.is_empty() {
            debug!(%kind, entity, "No recipients configured, notification dropped");
            return Ok(Dispatch::Sent);
        }

        info!(%kind, entity, recipients = recipients.len(), "Sending notification");
        self.sink.send(recipients, message).await?;
        Ok(Dispatch::Sent)
    }
}
