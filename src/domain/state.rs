//! SPP estimates and the per-entity state persisted between cycles.

use crate::domain::TimeMs;
use serde::{Deserialize, Serialize};

/// Why the estimator could not settle on a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndeterminateReason {
    InsufficientSample,
    NoMajority,
    AllOutOfBounds,
}

impl std::fmt::Display for IndeterminateReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndeterminateReason::InsufficientSample => write!(f, "insufficient sample"),
            IndeterminateReason::NoMajority => write!(f, "no majority"),
            IndeterminateReason::AllOutOfBounds => write!(f, "all observations out of bounds"),
        }
    }
}

/// Result of reducing one entity's observations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SppEstimate {
    Determined { spp: u32 },
    Indeterminate { reason: IndeterminateReason },
}

/// Persisted per-entity monitor state.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EntityState {
    /// Last determined SPP value.
    pub last_spp: Option<u32>,
    pub last_determined_at: Option<TimeMs>,
    pub last_error_at: Option<TimeMs>,
    pub last_error_message: Option<String>,
    pub last_error_notified_at: Option<TimeMs>,
    pub last_change_notified_at: Option<TimeMs>,
    /// Cycles in a row that ended indeterminate.
    pub consecutive_indeterminate: u32,
    /// Time of the last cycle that touched this entity; drives pruning.
    pub updated_at: TimeMs,
}

impl EntityState {
    pub fn new(now: TimeMs) -> Self {
        Self {
            updated_at: now,
            ..Default::default()
        }
    }

    /// Record an error observed in the current cycle.
    pub fn record_error(&mut self, message: impl Into<String>, now: TimeMs) {
        self.last_error_at = Some(now);
        self.last_error_message = Some(message.into());
    }

    /// Record a determined value and return the previous one.
    pub fn record_determined(&mut self, spp: u32, now: TimeMs) -> Option<u32> {
        self.consecutive_indeterminate = 0;
        self.last_determined_at = Some(now);
        self.last_spp.replace(spp)
    }

    /// Record an indeterminate outcome and return the new streak length.
    pub fn record_indeterminate(&mut self) -> u32 {
        self.consecutive_indeterminate = self.consecutive_indeterminate.saturating_add(1);
        self.consecutive_indeterminate
    }
}
