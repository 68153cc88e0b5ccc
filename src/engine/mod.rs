//! Pure computation: category matching and SPP estimation.

pub mod category;
pub mod spp;

pub use category::{CategoryMatch, CategoryResolver};
pub use spp::SppEstimator;
