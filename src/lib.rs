pub mod api;
pub mod config;
pub mod datasource;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod notify;
pub mod orchestration;

pub use config::{Config, Settings};
pub use datasource::{CatalogSource, ListingSource, ListingSourceError, WildberriesSource};
pub use db::{init_db, EntityStateStore, Repository};
pub use domain::{EntityKey, EntityState, MonitoredEntity, SppEstimate, TimeMs};
pub use error::AppError;
pub use notify::{NotificationSink, Notifier};
pub use orchestration::{Monitor, PassReport, Scheduler};
