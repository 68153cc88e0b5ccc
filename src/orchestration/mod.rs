pub mod monitor;
pub mod scheduler;

pub use monitor::{
    EntityOutcome, EntityReport, Monitor, MonitorError, PassReport, ResolutionError,
};
pub use scheduler::Scheduler;
