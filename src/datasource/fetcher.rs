//! Paginated listing fetch with bounded retry and exponential backoff.

use super::{CatalogSource, ListingSource, ListingSourceError};
use crate::config::Settings;
use crate::domain::{CatalogEntry, ProductObservation, ResolvedCriterion};
use backoff::backoff::Backoff;
use backoff::future::retry_notify;
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// A criterion could not be fetched completely.
#[derive(Debug, Error)]
#[error("fetching {criterion} page {page} failed after {attempts} attempt(s): {source}")]
pub struct FetchError {
    pub criterion: ResolvedCriterion,
    pub page: u32,
    pub attempts: u32,
    pub source: ListingSourceError,
}

/// Bounded exponential backoff with additive jitter.
///
/// The delay before retry `k` (1-based) is `base * 2^(k-1)` plus a uniform
/// jitter in `[0, base)`. After `retries` delays the policy gives up.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    retries: u32,
    base_pause_secs: f64,
    attempt: u32,
}

impl RetryPolicy {
    pub fn new(retries: u32, base_pause_secs: f64) -> Self {
        Self {
            retries,
            base_pause_secs: base_pause_secs.max(0.0),
            attempt: 0,
        }
    }

    /// Delay before retry `retry` without jitter.
    pub fn base_delay(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base_pause_secs * 2f64.powi(exponent);
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }

    fn jitter(&self) -> Duration {
        if self.base_pause_secs <= 0.0 {
            return Duration::ZERO;
        }
        let secs = rand::thread_rng().gen_range(0.0..self.base_pause_secs);
        Duration::from_secs_f64(secs)
    }
}

impl Backoff for RetryPolicy {
    fn reset(&mut self) {
        self.attempt = 0;
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        if self.attempt >= self.retries {
            return None;
        }
        self.attempt += 1;
        Some(self.base_delay(self.attempt).saturating_add(self.jitter()))
    }
}

/// Fetches every configured page of a criterion, all-or-nothing.
#[derive(Debug, Clone)]
pub struct ListingFetcher {
    source: Arc<dyn ListingSource>,
    pages: u32,
    retries: u32,
    base_pause_secs: f64,
}

impl ListingFetcher {
    pub fn new(source: Arc<dyn ListingSource>, settings: &Settings) -> Self {
        Self {
            source,
            pages: settings.products_num_pages_to_fetch,
            retries: settings.http_retries,
            base_pause_secs: settings.http_base_retry_pause,
        }
    }

    /// Fetch pages `1..=products_num_pages_to_fetch` in order.
    ///
    /// A page that exhausts its retries fails the whole criterion and the
    /// pages fetched before it are dropped, so the estimator never sees a
    /// truncated sample.
    pub async fn fetch(
        &self,
        criterion: &ResolvedCriterion,
    ) -> Result<Vec<ProductObservation>, FetchError> {
        let mut observations = Vec::new();
        for page in 1..=self.pages {
            let batch = self.fetch_page_with_retry(criterion, page).await?;
            debug!(%criterion, page, products = batch.len(), "Fetched listing page");
            observations.extend(batch);
        }
        Ok(observations)
    }

    /// Fetch the category catalog with the same retry policy as listing pages.
    pub async fn fetch_catalog(
        &self,
        source: &dyn CatalogSource,
    ) -> Result<Vec<CatalogEntry>, ListingSourceError> {
        self.with_retry("catalog", || source.fetch_catalog())
            .await
            .map_err(|(err, _)| err)
    }

    async fn fetch_page_with_retry(
        &self,
        criterion: &ResolvedCriterion,
        page: u32,
    ) -> Result<Vec<ProductObservation>, FetchError> {
        let what = format!("{} page {}", criterion, page);
        self.with_retry(&what, || self.source.fetch_page(criterion, page))
            .await
            .map_err(|(source, attempts)| FetchError {
                criterion: *criterion,
                page,
                attempts,
                source,
            })
    }

    /// Run `request` until it succeeds, fails permanently, or the policy gives up.
    ///
    /// On failure returns the last error and the number of attempts made.
    async fn with_retry<T, F, Fut>(
        &self,
        what: &str,
        mut request: F,
    ) -> Result<T, (ListingSourceError, u32)>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ListingSourceError>>,
    {
        let policy = RetryPolicy::new(self.retries, self.base_pause_secs);
        let mut attempts = 0u32;

        let result = retry_notify(
            policy,
            || {
                attempts += 1;
                let pending = request();
                async move {
                    pending.await.map_err(|e| {
                        if e.is_transient() {
                            backoff::Error::transient(e)
                        } else {
                            backoff::Error::permanent(e)
                        }
                    })
                }
            },
            |err: ListingSourceError, delay: Duration| {
                warn!(
                    what,
                    error = %err,
                    delay_ms = delay.as_millis() as u64,
                    "Request failed, retrying"
                );
            },
        )
        .await;

        result.map_err(|err| (err, attempts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::MockListingSource;

    fn settings(pages: u32, retries: u32) -> Settings {
        Settings {
            products_num_pages_to_fetch: pages,
            http_retries: retries,
            http_base_retry_pause: 0.0,
            ..Settings::default()
        }
    }

    fn product(id: u64, page: u32) -> ProductObservation {
        ProductObservation {
            product_id: id,
            page,
            price_u: 10_000,
            sale_price_u: 8_000,
            basic_sale: None,
            basic_price_u: None,
            client_sale: Some(20),
        }
    }

    fn network_error() -> ListingSourceError {
        ListingSourceError::NetworkError("connection reset".to_string())
    }

    #[test]
    fn test_policy_gives_up_after_retries() {
        let mut policy = RetryPolicy::new(3, 0.5);
        let delays: Vec<_> = std::iter::from_fn(|| policy.next_backoff()).collect();
        assert_eq!(delays.len(), 3);
    }

    #[test]
    fn test_policy_delays_non_decreasing_with_bounded_jitter() {
        for _ in 0..50 {
            let mut policy = RetryPolicy::new(6, 0.25);
            let delays: Vec<_> = std::iter::from_fn(|| policy.next_backoff()).collect();
            for (k, delay) in delays.iter().enumerate() {
                let base = policy.base_delay(k as u32 + 1);
                assert!(*delay >= base);
                assert!(*delay <= base + Duration::from_secs_f64(0.25));
            }
            assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        }
    }

    #[test]
    fn test_policy_base_delay_doubles() {
        let policy = RetryPolicy::new(4, 1.0);
        assert_eq!(policy.base_delay(1), Duration::from_secs(1));
        assert_eq!(policy.base_delay(2), Duration::from_secs(2));
        assert_eq!(policy.base_delay(3), Duration::from_secs(4));
    }

    #[test]
    fn test_policy_zero_pause_has_no_delay() {
        let mut policy = RetryPolicy::new(2, 0.0);
        assert_eq!(policy.next_backoff(), Some(Duration::ZERO));
        assert_eq!(policy.next_backoff(), Some(Duration::ZERO));
        assert_eq!(policy.next_backoff(), None);
        policy.reset();
        assert_eq!(policy.next_backoff(), Some(Duration::ZERO));
    }

    #[tokio::test]
    async fn test_pages_concatenated_in_order() {
        let criterion = ResolvedCriterion::Subcategory(8225);
        let source = Arc::new(
            MockListingSource::new()
                .with_page(criterion, 1, vec![product(1, 1), product(2, 1)])
                .with_page(criterion, 2, vec![product(3, 2)]),
        );
        let fetcher = ListingFetcher::new(source.clone(), &settings(2, 0));

        let observations = fetcher.fetch(&criterion).await.unwrap();
        let ids: Vec<u64> = observations.iter().map(|o| o.product_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_transient_failures_retried() {
        let criterion = ResolvedCriterion::Article(42);
        let source = Arc::new(
            MockListingSource::new()
                .with_page(criterion, 1, vec![product(42, 1)])
                .with_failures(criterion, 1, vec![network_error(), network_error()]),
        );
        let fetcher = ListingFetcher::new(source.clone(), &settings(1, 3));

        let observations = fetcher.fetch(&criterion).await.unwrap();
        assert_eq!(observations.len(), 1);
        assert_eq!(source.calls(), 3);
    }

    #[tokio::test]
    async fn test_attempts_bounded_by_retries_plus_one() {
        let criterion = ResolvedCriterion::Article(42);
        let source = Arc::new(
            MockListingSource::new()
                .with_page(criterion, 1, vec![product(42, 1)])
                .with_failures(criterion, 1, vec![network_error(); 4]),
        );
        let fetcher = ListingFetcher::new(source.clone(), &settings(1, 3));

        let err = fetcher.fetch(&criterion).await.unwrap_err();
        assert_eq!(err.attempts, 4);
        assert_eq!(err.page, 1);
        assert!(matches!(err.source, ListingSourceError::NetworkError(_)));
        assert_eq!(source.calls(), 4);
    }

    #[tokio::test]
    async fn test_parse_error_not_retried() {
        let criterion = ResolvedCriterion::Article(42);
        let source = Arc::new(MockListingSource::new().with_failures(
            criterion,
            1,
            vec![ListingSourceError::ParseError("bad json".to_string())],
        ));
        let fetcher = ListingFetcher::new(source.clone(), &settings(1, 3));

        let err = fetcher.fetch(&criterion).await.unwrap_err();
        assert_eq!(err.attempts, 1);
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_catalog_fetch_uses_retry_policy() {
        use crate::datasource::MockCatalogSource;

        let catalog = MockCatalogSource::failing(network_error());
        let fetcher = ListingFetcher::new(Arc::new(MockListingSource::new()), &settings(1, 2));

        assert!(fetcher.fetch_catalog(&catalog).await.is_err());
        assert_eq!(catalog.calls(), 3);
    }

    #[tokio::test]
    async fn test_failing_later_page_discards_earlier_pages() {
        let criterion = ResolvedCriterion::Subcategory(1);
        let source = Arc::new(
            MockListingSource::new()
                .with_page(criterion, 1, vec![product(1, 1)])
                .with_failures(criterion, 2, vec![network_error(); 2]),
        );
        let fetcher = ListingFetcher::new(source, &settings(2, 1));

        let err = fetcher.fetch(&criterion).await.unwrap_err();
        assert_eq!(err.page, 2);
        assert_eq!(err.attempts, 2);
        assert!(err.to_string().contains("subcategory=1 page 2"));
    }
}
