//! Listing and catalog sources: the marketplace seen through two narrow traits.

use crate::domain::{CatalogEntry, ProductObservation, ResolvedCriterion};
use async_trait::async_trait;
use std::fmt;

pub mod fetcher;
pub mod mock;
pub mod wildberries;

pub use fetcher::{FetchError, ListingFetcher, RetryPolicy};
pub use mock::{MockCatalogSource, MockListingSource};
pub use wildberries::WildberriesSource;

/// Source of product listing pages.
///
/// Implementations issue exactly one request per call; retry and backoff
/// belong to [`ListingFetcher`].
#[async_trait]
pub trait ListingSource: Send + Sync + fmt::Debug {
    /// Fetch one page of listings for a criterion.
    ///
    /// # Arguments
    /// * `criterion` - Article number or subcategory id
    /// * `page` - 1-based page index
    ///
    /// # Returns
    /// Observations in the order the marketplace returned them
    async fn fetch_page(
        &self,
        criterion: &ResolvedCriterion,
        page: u32,
    ) -> Result<Vec<ProductObservation>, ListingSourceError>;
}

/// Source of the full category catalog.
#[async_trait]
pub trait CatalogSource: Send + Sync + fmt::Debug {
    async fn fetch_catalog(&self) -> Result<Vec<CatalogEntry>, ListingSourceError>;
}

/// Error type for listing and catalog requests.
#[derive(Debug, Clone)]
pub enum ListingSourceError {
    /// Network error (e.g., connection timeout, DNS failure)
    NetworkError(String),
    /// HTTP error (e.g., 5xx server error, 404)
    HttpError { status: u16, message: String },
    /// Parsing error (invalid JSON or unexpected shape)
    ParseError(String),
    /// Rate limit exceeded
    RateLimited,
    /// Other error
    Other(String),
}

impl ListingSourceError {
    /// Whether the request should be retried.
    ///
    /// Every transport failure and non-success status is retried; a response
    /// that arrived but could not be decoded is not.
    pub fn is_transient(&self) -> bool {
        match self {
            ListingSourceError::NetworkError(_)
            | ListingSourceError::RateLimited
            | ListingSourceError::HttpError { .. } => true,
            ListingSourceError::ParseError(_) | ListingSourceError::Other(_) => false,
        }
    }
}

impl fmt::Display for ListingSourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListingSourceError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            ListingSourceError::HttpError { status, message } => {
                write!(f, "HTTP error {}: {}", status, message)
            }
            ListingSourceError::ParseError(msg) => write!(f, "Parse error: {}", msg),
            ListingSourceError::RateLimited => write!(f, "Rate limited"),
            ListingSourceError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for ListingSourceError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listing_source_error_display() {
        let err = ListingSourceError::NetworkError("connection timeout".to_string());
        assert_eq!(err.to_string(), "Network error: connection timeout");

        let err = ListingSourceError::HttpError {
            status: 503,
            message: "Service unavailable".to_string(),
        };
        assert_eq!(err.to_string(), "HTTP error 503: Service unavailable");

        let err = ListingSourceError::ParseError("invalid JSON".to_string());
        assert_eq!(err.to_string(), "Parse error: invalid JSON");

        assert_eq!(ListingSourceError::RateLimited.to_string(), "Rate limited");
    }

    #[test]
    fn test_transient_classification() {
        assert!(ListingSourceError::NetworkError("x".into()).is_transient());
        assert!(ListingSourceError::RateLimited.is_transient());
        assert!(ListingSourceError::HttpError {
            status: 502,
            message: String::new()
        }
        .is_transient());
        assert!(ListingSourceError::HttpError {
            status: 404,
            message: String::new()
        }
        .is_transient());
        assert!(!ListingSourceError::ParseError("x".into()).is_transient());
    }
}
