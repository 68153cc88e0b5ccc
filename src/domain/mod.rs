//! Domain types for the SPP monitor.
//!
//! This module provides:
//! - Domain primitives: TimeMs, EntityKey
//! - Monitored entities, resolved criteria and catalog entries
//! - Product observations with per-product discount recovery
//! - SPP estimates and persisted entity state

pub mod entity;
pub mod observation;
pub mod primitives;
pub mod state;

pub use entity::{CatalogEntry, MonitoredEntity, ResolvedCriterion};
pub use observation::ProductObservation;
pub use primitives::{EntityKey, TimeMs};
pub use state::{EntityState, IndeterminateReason, SppEstimate};
