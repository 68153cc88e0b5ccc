//! Domain primitives: TimeMs, EntityKey.

use serde::{Deserialize, Serialize};

/// Time in milliseconds since Unix epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeMs(pub i64);

impl TimeMs {
    /// Create a TimeMs from milliseconds.
    pub fn new(ms: i64) -> Self {
        TimeMs(ms)
    }

    /// Current wall-clock time.
    pub fn now() -> Self {
        TimeMs(chrono::Utc::now().timestamp_millis())
    }

    /// Get the underlying milliseconds value.
    pub fn as_ms(&self) -> i64 {
        self.0
    }

    /// Shift by a number of minutes (negative moves backwards).
    pub fn plus_minutes(&self, minutes: i64) -> Self {
        TimeMs(self.0.saturating_add(minutes.saturating_mul(60_000)))
    }

    /// Milliseconds elapsed between `earlier` and `self`.
    ///
    /// Negative when `earlier` lies in the future (clock moved backwards).
    pub fn millis_since(&self, earlier: TimeMs) -> i64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl std::fmt::Display for TimeMs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match chrono::DateTime::<chrono::Utc>::from_timestamp_millis(self.0) {
            Some(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S UTC")),
            None => write!(f, "{}ms", self.0),
        }
    }
}

/// Persistent identity of a monitored entity, e.g. `article:12345`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityKey(pub String);

impl EntityKey {
    /// Create an EntityKey from a string.
    pub fn new(key: String) -> Self {
        EntityKey(key)
    }

    /// Get the key as a string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EntityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
