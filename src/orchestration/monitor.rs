//! One monitoring pass: resolve, fetch, estimate, compare, notify, persist.

use crate::config::{ConfigError, Settings};
use crate::datasource::{
    CatalogSource, FetchError, ListingFetcher, ListingSource, ListingSourceError,
};
use crate::db::{EntityStateStore, StoreError};
use crate::domain::{
    CatalogEntry, EntityKey, EntityState, IndeterminateReason, MonitoredEntity,
    ProductObservation, ResolvedCriterion, SppEstimate, TimeMs,
};
use crate::engine::{CategoryResolver, SppEstimator};
use crate::notify::{Dispatch, EventKind, Notifier};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Catalog shared by every category entity of one pass, fetched on first use.
type CatalogCell = OnceCell<Result<Vec<CatalogEntry>, ListingSourceError>>;

/// Why a category name could not be turned into listing criteria.
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("category catalog unavailable: {0}")]
    Catalog(ListingSourceError),
    #[error("no catalog category matches \"{name}\"")]
    NoMatch { name: String },
    #[error(
        "category \"{name}\" is ambiguous: {matches} subcategories match, at most {limit} allowed"
    )]
    Ambiguous {
        name: String,
        matches: usize,
        limit: usize,
    },
    #[error(transparent)]
    InvalidName(ConfigError),
}

/// Failure of the observe stage for one entity.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// What one pass concluded for one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityOutcome {
    /// First determined value; stored without notifying.
    Baseline { spp: u32 },
    Unchanged { spp: u32 },
    Changed { from: u32, to: u32 },
    Indeterminate {
        reason: IndeterminateReason,
        streak: u32,
    },
    /// Resolution or fetch failed.
    Failed { error: String },
    /// State could not be loaded; the entity was skipped and admins alerted.
    StoreFailed { error: String },
}

#[derive(Debug, Clone)]
pub struct EntityReport {
    pub key: EntityKey,
    pub outcome: EntityOutcome,
    /// `None` when nothing was due or delivery failed.
    pub notification: Option<Dispatch>,
    pub persisted: bool,
}

#[derive(Debug, Clone)]
pub struct PassReport {
    pub pass_id: Uuid,
    pub started_at: TimeMs,
    /// Ordered by entity key.
    pub entities: Vec<EntityReport>,
    pub pruned: u64,
}

impl PassReport {
    pub fn outcome(&self, key: &EntityKey) -> Option<&EntityOutcome> {
        self.entities
            .iter()
            .find(|report| &report.key == key)
            .map(|report| &report.outcome)
    }

    fn count(&self, predicate: impl Fn(&EntityOutcome) -> bool) -> usize {
        self.entities
            .iter()
            .filter(|report| predicate(&report.outcome))
            .count()
    }

    pub fn changed(&self) -> usize {
        self.count(|o| matches!(o, EntityOutcome::Changed { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| {
            matches!(
                o,
                EntityOutcome::Failed { .. } | EntityOutcome::StoreFailed { .. }
            )
        })
    }

    pub fn indeterminate(&self) -> usize {
        self.count(|o| matches!(o, EntityOutcome::Indeterminate { .. }))
    }
}

pub struct Monitor {
    fetcher: ListingFetcher,
    catalog: Arc<dyn CatalogSource>,
    store: Arc<dyn EntityStateStore>,
    notifier: Notifier,
    resolver: CategoryResolver,
    estimator: SppEstimator,
    max_matches: usize,
    indeterminate_error_cycles: u32,
    retention_days: u32,
    max_concurrent: usize,
    /// States the store refused, newest first in line for the next pass.
    unsaved: Mutex<HashMap<EntityKey, EntityState>>,
}

impl Monitor {
    pub fn new(
        listing: Arc<dyn ListingSource>,
        catalog: Arc<dyn CatalogSource>,
        store: Arc<dyn EntityStateStore>,
        notifier: Notifier,
        settings: &Settings,
        max_concurrent: usize,
    ) -> Self {
        Self {
            fetcher: ListingFetcher::new(listing, settings),
            catalog,
            store,
            notifier,
            resolver: CategoryResolver::new(settings),
            estimator: SppEstimator::new(settings),
            max_matches: settings.max_matched_subcategories,
            indeterminate_error_cycles: settings.indeterminate_error_cycles,
            retention_days: settings.state_retention_days,
            max_concurrent: max_concurrent.max(1),
            unsaved: Mutex::new(HashMap::new()),
        }
    }

    pub async fn run_pass(&self, entities: &[MonitoredEntity]) -> PassReport {
        self.run_pass_at(entities, TimeMs::now()).await
    }

    /// Run one pass with `now` as the clock for every entity.
    ///
    /// Per-entity failures end up in the report; a pass never fails as a whole.
    pub async fn run_pass_at(&self, entities: &[MonitoredEntity], now: TimeMs) -> PassReport {
        let pass_id = Uuid::new_v4();
        let span = info_span!("monitor_pass", %pass_id);

        async move {
            info!(entities = entities.len(), "Starting monitor pass");
            let catalog = CatalogCell::new();

            let mut reports: Vec<EntityReport> = stream::iter(entities)
                .map(|entity| self.process_entity(entity, &catalog, now))
                .buffer_unordered(self.max_concurrent)
                .collect()
                .await;
            reports.sort_by(|a, b| a.key.cmp(&b.key));

            let pruned = self.prune(now).await;
            let report = PassReport {
                pass_id,
                started_at: now,
                entities: reports,
                pruned,
            };

            info!(
                entities = report.entities.len(),
                changed = report.changed(),
                indeterminate = report.indeterminate(),
                failed = report.failed(),
                pruned,
                "Monitor pass finished"
            );
            report
        }
        .instrument(span)
        .await
    }

    async fn process_entity(
        &self,
        entity: &MonitoredEntity,
        catalog: &CatalogCell,
        now: TimeMs,
    ) -> EntityReport {
        let key = entity.key();
        let unsaved = self.take_unsaved(&key);
        let mut state = match self.store.get(&key).await {
            Ok(found) => unsaved.or(found).unwrap_or_else(|| EntityState::new(now)),
            Err(e) => return self.skip_unloadable(entity, key, unsaved, e, now).await,
        };
        state.updated_at = now;

        let (outcome, event) = match self.observe(entity, catalog).await {
            Ok(observations) => self.evaluate(entity, &observations, &mut state, now),
            Err(err) => {
                warn!(%key, error = %err, "Entity check failed");
                let message = err.to_string();
                state.record_error(message.clone(), now);
                let text = error_text(entity, &message);
                (
                    EntityOutcome::Failed { error: message },
                    Some((EventKind::Error, text)),
                )
            }
        };

        let mut notification = match event {
            Some((kind, text)) => self.dispatch(kind, &key, &text, &mut state, now).await,
            None => None,
        };

        let persisted = match self.store.put(&key, &state).await {
            Ok(()) => true,
            Err(e) => {
                error!(%key, error = %e, "Could not persist entity state");
                let message = format!("state store write failed: {}", e);
                state.record_error(message.clone(), now);
                let text = error_text(entity, &message);
                let alert = self
                    .dispatch(EventKind::Error, &key, &text, &mut state, now)
                    .await;
                notification = notification.or(alert);
                self.keep_unsaved(&key, state);
                false
            }
        };

        EntityReport {
            key,
            outcome,
            notification,
            persisted,
        }
    }

    /// Alert on a state that cannot be read, throttled by the last state
    /// this process knows for the entity.
    async fn skip_unloadable(
        &self,
        entity: &MonitoredEntity,
        key: EntityKey,
        fallback: Option<EntityState>,
        err: StoreError,
        now: TimeMs,
    ) -> EntityReport {
        error!(%key, error = %err, "Could not load entity state, skipping");
        let message = format!("state store read failed: {}", err);

        let mut state = fallback.unwrap_or_else(|| EntityState::new(now));
        state.record_error(message.clone(), now);
        let text = error_text(entity, &message);
        let notification = self
            .dispatch(EventKind::Error, &key, &text, &mut state, now)
            .await;
        self.keep_unsaved(&key, state);

        EntityReport {
            key,
            outcome: EntityOutcome::StoreFailed { error: message },
            notification,
            persisted: false,
        }
    }

    fn take_unsaved(&self, key: &EntityKey) -> Option<EntityState> {
        self.unsaved
            .lock()
            .ok()
            .and_then(|mut unsaved| unsaved.remove(key))
    }

    fn keep_unsaved(&self, key: &EntityKey, state: EntityState) {
        if let Ok(mut unsaved) = self.unsaved.lock() {
            unsaved.insert(key.clone(), state);
        }
    }

    async fn observe(
        &self,
        entity: &MonitoredEntity,
        catalog: &CatalogCell,
    ) -> Result<Vec<ProductObservation>, MonitorError> {
        let criteria = self.resolve(entity, catalog).await?;

        let mut observations = Vec::new();
        for criterion in &criteria {
            observations.extend(self.fetcher.fetch(criterion).await?);
        }
        Ok(observations)
    }

    async fn resolve(
        &self,
        entity: &MonitoredEntity,
        catalog: &CatalogCell,
    ) -> Result<Vec<ResolvedCriterion>, ResolutionError> {
        let name = match entity {
            MonitoredEntity::Article(article) => {
                return Ok(vec![ResolvedCriterion::Article(*article)])
            }
            MonitoredEntity::Category(name) => name,
        };

        let entries = catalog
            .get_or_init(|| async {
                info!("Fetching category catalog");
                self.fetcher.fetch_catalog(self.catalog.as_ref()).await
            })
            .await
            .as_ref()
            .map_err(|e| ResolutionError::Catalog(e.clone()))?;

        let ids = self
            .resolver
            .resolve(name, entries)
            .map_err(ResolutionError::InvalidName)?;

        if ids.is_empty() {
            let matches = self
                .resolver
                .match_candidates(name, entries)
                .map_err(ResolutionError::InvalidName)?
                .len();
            return Err(if matches == 0 {
                ResolutionError::NoMatch { name: name.clone() }
            } else {
                ResolutionError::Ambiguous {
                    name: name.clone(),
                    matches,
                    limit: self.max_matches,
                }
            });
        }

        debug!(category = %name, subcategories = ?ids, "Category resolved");
        Ok(ids.into_iter().map(ResolvedCriterion::Subcategory).collect())
    }

    fn evaluate(
        &self,
        entity: &MonitoredEntity,
        observations: &[ProductObservation],
        state: &mut EntityState,
        now: TimeMs,
    ) -> (EntityOutcome, Option<(EventKind, String)>) {
        match self.estimator.estimate(observations) {
            SppEstimate::Determined { spp } => match state.record_determined(spp, now) {
                None => {
                    info!(%entity, spp, "SPP baseline established");
                    (EntityOutcome::Baseline { spp }, None)
                }
                Some(previous) if previous == spp => {
                    debug!(%entity, spp, "SPP unchanged");
                    (EntityOutcome::Unchanged { spp }, None)
                }
                Some(previous) => {
                    info!(%entity, from = previous, to = spp, "SPP changed");
                    let text = format!("SPP for {} changed: {}% -> {}%", entity, previous, spp);
                    (
                        EntityOutcome::Changed {
                            from: previous,
                            to: spp,
                        },
                        Some((EventKind::Change, text)),
                    )
                }
            },
            SppEstimate::Indeterminate { reason } => {
                let streak = state.record_indeterminate();
                debug!(%entity, %reason, streak, "SPP indeterminate");

                let escalate =
                    self.indeterminate_error_cycles > 0 && streak >= self.indeterminate_error_cycles;
                let event = escalate.then(|| {
                    let message = format!(
                        "SPP could not be determined for {} passes in a row ({})",
                        streak, reason
                    );
                    state.record_error(message.clone(), now);
                    (EventKind::Error, error_text(entity, &message))
                });
                (EntityOutcome::Indeterminate { reason, streak }, event)
            }
        }
    }

    async fn dispatch(
        &self,
        kind: EventKind,
        key: &EntityKey,
        text: &str,
        state: &mut EntityState,
        now: TimeMs,
    ) -> Option<Dispatch> {
        match self.notifier.notify(kind, key.as_str(), text, state, now).await {
            Ok(dispatch) => Some(dispatch),
            Err(e) => {
                warn!(%key, %kind, error = %e, "Notification delivery failed");
                None
            }
        }
    }

    async fn prune(&self, now: TimeMs) -> u64 {
        if self.retention_days == 0 {
            return 0;
        }
        let cutoff = now.plus_minutes(-i64::from(self.retention_days) * 24 * 60);
        match self.store.prune_older_than(cutoff).await {
            Ok(removed) => {
                if removed > 0 {
                    info!(removed, %cutoff, "Pruned stale entity states");
                }
                removed
            }
            Err(e) => {
                warn!(error = %e, "Pruning entity states failed");
                0
            }
        }
    }
}

fn error_text(entity: &MonitoredEntity, message: &str) -> String {
    format!("SPP monitor error for {}: {}", entity, message)
}
