//! Mock sources for testing without network calls.

use super::{CatalogSource, ListingSource, ListingSourceError};
use crate::domain::{CatalogEntry, ProductObservation, ResolvedCriterion};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Mock listing source serving predefined pages.
///
/// Scripted failures for a page are returned first, one per call, before the
/// page's observations. Unknown pages are empty.
#[derive(Debug, Default)]
pub struct MockListingSource {
    pages: HashMap<(ResolvedCriterion, u32), Vec<ProductObservation>>,
    failures: Mutex<HashMap<(ResolvedCriterion, u32), VecDeque<ListingSourceError>>>,
    calls: AtomicUsize,
}

impl MockListingSource {
    /// Create a new mock listing source with no pages.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the observations returned for a page.
    pub fn with_page(
        mut self,
        criterion: ResolvedCriterion,
        page: u32,
        observations: Vec<ProductObservation>,
    ) -> Self {
        self.pages.insert((criterion, page), observations);
        self
    }

    /// Queue errors returned by the next calls for a page.
    pub fn with_failures(
        self,
        criterion: ResolvedCriterion,
        page: u32,
        errors: Vec<ListingSourceError>,
    ) -> Self {
        if let Ok(mut failures) = self.failures.lock() {
            failures.entry((criterion, page)).or_default().extend(errors);
        }
        self
    }

    /// Total number of `fetch_page` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ListingSource for MockListingSource {
    async fn fetch_page(
        &self,
        criterion: &ResolvedCriterion,
        page: u32,
    ) -> Result<Vec<ProductObservation>, ListingSourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let scripted = self
            .failures
            .lock()
            .map_err(|e| ListingSourceError::Other(e.to_string()))?
            .get_mut(&(*criterion, page))
            .and_then(|queue| queue.pop_front());
        if let Some(err) = scripted {
            return Err(err);
        }

        Ok(self
            .pages
            .get(&(*criterion, page))
            .cloned()
            .unwrap_or_default())
    }
}

/// Mock catalog source.
#[derive(Debug, Default)]
pub struct MockCatalogSource {
    entries: Vec<CatalogEntry>,
    error: Option<ListingSourceError>,
    calls: AtomicUsize,
}

impl MockCatalogSource {
    pub fn new(entries: Vec<CatalogEntry>) -> Self {
        Self {
            entries,
            ..Self::default()
        }
    }

    /// A catalog source whose every call fails.
    pub fn failing(error: ListingSourceError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CatalogSource for MockCatalogSource {
    async fn fetch_catalog(&self) -> Result<Vec<CatalogEntry>, ListingSourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.error {
            Some(err) => Err(err.clone()),
            None => Ok(self.entries.clone()),
        }
    }
}
