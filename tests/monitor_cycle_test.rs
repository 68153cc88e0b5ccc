use sppmon::config::Settings;
use sppmon::datasource::{ListingSourceError, MockCatalogSource, MockListingSource};
use sppmon::db::{init_db, EntityStateStore, Repository};
use sppmon::domain::{
    CatalogEntry, MonitoredEntity, ProductObservation, ResolvedCriterion, TimeMs,
};
use sppmon::notify::{Notifier, RecordingSink};
use sppmon::orchestration::{EntityOutcome, Monitor};
use std::sync::Arc;
use tempfile::TempDir;

const T0: TimeMs = TimeMs(1_705_000_000_000);

fn db_path(temp_dir: &TempDir) -> String {
    temp_dir
        .path()
        .join("state.db")
        .to_string_lossy()
        .to_string()
}

fn settings() -> Settings {
    Settings {
        http_retries: 2,
        http_base_retry_pause: 0.0,
        ..Settings::default()
    }
}

/// Sixteen products: `agreeing` of them at `spp`, the rest spread over other values.
fn listing_page(spp: i64, agreeing: usize) -> Vec<ProductObservation> {
    (0..16)
        .map(|i| ProductObservation {
            product_id: 100 + i as u64,
            page: 1,
            price_u: 250_000,
            sale_price_u: 200_000,
            basic_sale: None,
            basic_price_u: None,
            client_sale: Some(if i < agreeing { spp } else { i as i64 % 5 }),
        })
        .collect()
}

fn monitor(
    listing: MockListingSource,
    catalog: MockCatalogSource,
    repo: Arc<Repository>,
    sink: Arc<RecordingSink>,
) -> Monitor {
    let settings = settings();
    let notifier = Notifier::new(
        sink,
        vec!["telegram:100".to_string()],
        vec!["telegram:200".to_string(), "user@example.com".to_string()],
        settings.report_errors_delay_interval,
        settings.report_changes_delay_interval,
    );
    Monitor::new(
        Arc::new(listing),
        Arc::new(catalog),
        repo,
        notifier,
        &settings,
        2,
    )
}

async fn open_repo(temp_dir: &TempDir) -> Arc<Repository> {
    let pool = init_db(&db_path(temp_dir)).await.expect("init_db failed");
    Arc::new(Repository::new(pool))
}

#[tokio::test]
async fn test_change_detected_across_restart() {
    let temp_dir = TempDir::new().unwrap();
    let entity = MonitoredEntity::Article(42);
    let criterion = ResolvedCriterion::Article(42);

    {
        let repo = open_repo(&temp_dir).await;
        let sink = Arc::new(RecordingSink::new());
        let listing = MockListingSource::new().with_page(criterion, 1, listing_page(15, 12));
        let report = monitor(listing, MockCatalogSource::new(vec![]), repo, sink.clone())
            .run_pass_at(&[entity.clone()], T0)
            .await;

        assert_eq!(
            report.outcome(&entity.key()),
            Some(&EntityOutcome::Baseline { spp: 15 })
        );
        assert!(sink.messages().is_empty());
    }

    let repo = open_repo(&temp_dir).await;
    let sink = Arc::new(RecordingSink::new());
    let listing = MockListingSource::new().with_page(criterion, 1, listing_page(20, 13));
    let report = monitor(listing, MockCatalogSource::new(vec![]), repo.clone(), sink.clone())
        .run_pass_at(&[entity.clone()], T0.plus_minutes(60))
        .await;

    assert_eq!(
        report.outcome(&entity.key()),
        Some(&EntityOutcome::Changed { from: 15, to: 20 })
    );
    let sent = sink.messages();
    assert_eq!(sent.len(), 1);
    assert_eq!(
        sent[0].recipients,
        vec!["telegram:200".to_string(), "user@example.com".to_string()]
    );

    let state = repo.get(&entity.key()).await.unwrap().unwrap();
    assert_eq!(state.last_spp, Some(20));
    assert_eq!(state.last_change_notified_at, Some(T0.plus_minutes(60)));
}

#[tokio::test]
async fn test_throttled_change_still_updates_value() {
    let temp_dir = TempDir::new().unwrap();
    let repo = open_repo(&temp_dir).await;
    let entity = MonitoredEntity::Article(7);
    let criterion = ResolvedCriterion::Article(7);
    let sink = Arc::new(RecordingSink::new());

    for (minutes, spp) in [(0, 10), (10, 12), (20, 14)] {
        let listing = MockListingSource::new().with_page(criterion, 1, listing_page(spp, 16));
        monitor(listing, MockCatalogSource::new(vec![]), repo.clone(), sink.clone())
            .run_pass_at(&[entity.clone()], T0.plus_minutes(minutes))
            .await;
    }

    // 10 is the baseline, 12 notifies, 14 falls inside the change window
    assert_eq!(sink.messages().len(), 1);
    let state = repo.get(&entity.key()).await.unwrap().unwrap();
    assert_eq!(state.last_spp, Some(14));
    assert_eq!(state.last_change_notified_at, Some(T0.plus_minutes(10)));
}

#[tokio::test]
async fn test_transient_failures_recovered_within_retries() {
    let temp_dir = TempDir::new().unwrap();
    let repo = open_repo(&temp_dir).await;
    let entity = MonitoredEntity::Article(9);
    let criterion = ResolvedCriterion::Article(9);
    let sink = Arc::new(RecordingSink::new());

    let listing = MockListingSource::new()
        .with_page(criterion, 1, listing_page(18, 16))
        .with_failures(
            criterion,
            1,
            vec![
                ListingSourceError::HttpError {
                    status: 503,
                    message: "Service unavailable".to_string(),
                },
                ListingSourceError::RateLimited,
            ],
        );
    let report = monitor(listing, MockCatalogSource::new(vec![]), repo.clone(), sink.clone())
        .run_pass_at(&[entity.clone()], T0)
        .await;

    assert_eq!(
        report.outcome(&entity.key()),
        Some(&EntityOutcome::Baseline { spp: 18 })
    );
    assert!(sink.messages().is_empty());
    let state = repo.get(&entity.key()).await.unwrap().unwrap();
    assert_eq!(state.last_error_at, None);
}

#[tokio::test]
async fn test_exhausted_retries_report_error_to_admins() {
    let temp_dir = TempDir::new().unwrap();
    let repo = open_repo(&temp_dir).await;
    let entity = MonitoredEntity::Article(9);
    let criterion = ResolvedCriterion::Article(9);
    let sink = Arc::new(RecordingSink::new());

    let listing = MockListingSource::new()
        .with_page(criterion, 1, listing_page(18, 16))
        .with_failures(
            criterion,
            1,
            vec![ListingSourceError::NetworkError("timeout".to_string()); 3],
        );
    let report = monitor(listing, MockCatalogSource::new(vec![]), repo.clone(), sink.clone())
        .run_pass_at(&[entity.clone()], T0)
        .await;

    match report.outcome(&entity.key()) {
        Some(EntityOutcome::Failed { error }) => assert!(error.contains("3 attempt")),
        other => panic!("unexpected outcome: {:?}", other),
    }
    let sent = sink.messages();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].recipients, vec!["telegram:100".to_string()]);

    let state = repo.get(&entity.key()).await.unwrap().unwrap();
    assert_eq!(state.last_error_at, Some(T0));
    assert_eq!(state.last_spp, None);
}

#[tokio::test]
async fn test_mixed_pass_over_articles_and_categories() {
    let temp_dir = TempDir::new().unwrap();
    let repo = open_repo(&temp_dir).await;
    let sink = Arc::new(RecordingSink::new());

    let catalog = MockCatalogSource::new(vec![
        CatalogEntry::new(8225, "Джинсы"),
        CatalogEntry::new(8126, "Брюки"),
    ]);
    let listing = MockListingSource::new()
        .with_page(ResolvedCriterion::Article(1), 1, listing_page(5, 14))
        .with_page(ResolvedCriterion::Subcategory(8225), 1, listing_page(22, 16));
    let entities = vec![
        MonitoredEntity::Article(1),
        MonitoredEntity::Category("джинсы".to_string()),
        MonitoredEntity::Category("Шапки".to_string()),
    ];

    let report = monitor(listing, catalog, repo.clone(), sink.clone())
        .run_pass_at(&entities, T0)
        .await;

    assert_eq!(report.entities.len(), 3);
    assert_eq!(
        report.outcome(&entities[0].key()),
        Some(&EntityOutcome::Baseline { spp: 5 })
    );
    assert_eq!(
        report.outcome(&entities[1].key()),
        Some(&EntityOutcome::Baseline { spp: 22 })
    );
    assert!(matches!(
        report.outcome(&entities[2].key()),
        Some(EntityOutcome::Failed { .. })
    ));
    assert_eq!(report.failed(), 1);
    assert_eq!(repo.list().await.unwrap().len(), 3);
}
