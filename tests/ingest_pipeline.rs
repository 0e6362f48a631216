// tests/ingest_pipeline.rs
mod common;

use agri_price_ingest::error::{NormalizeError, StoreError, ValidationError};
use agri_price_ingest::ingest::{
    EntityStore, FetchExecutor, IngestCoordinator, MemoryStore, PriceNormalizer, UpsertOutcome,
};
use agri_price_ingest::models::{Price, Product, ScraperConfig, Source};
use agri_price_ingest::{FetchError, SourceOutcome};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use common::*;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const FEED: &str = "https://market.example/feed";
const BAD_FEED: &str = "https://down.example/feed";
const PAYLOAD: &str = r#"[{"value": 2.45, "currency": "USD", "observation_date": "2025-09-01"}]"#;

fn seeded(sources: Vec<Source>) -> Arc<MemoryStore> {
    let store = MemoryStore::new();
    store.insert_product(avocado(1), t0()).unwrap();
    for s in sources {
        store.insert_source(s, t0()).unwrap();
    }
    Arc::new(store)
}

#[tokio::test]
async fn successful_cycle_stores_one_row_and_advances_last_scraped() {
    let store = seeded(vec![market_source(10, FEED, 1)]);
    let fetcher = Arc::new(MockFetcher::new().ok(FEED, PAYLOAD));
    let coord = coordinator(Arc::clone(&store), Arc::clone(&fetcher));
    let cancel = CancellationToken::new();

    let outcome = coord.process_source(10, t0(), &cancel).await;
    assert!(matches!(
        outcome,
        SourceOutcome::Stored {
            inserted: 1,
            updated: 0,
            rejected: 0
        }
    ));

    let rows = store.prices_for_source(10).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].source_id, 10);
    assert_eq!(rows[0].product_id, 1);
    assert_eq!(
        rows[0].observation_date,
        Utc.with_ymd_and_hms(2025, 9, 1, 0, 0, 0).unwrap()
    );
    assert_eq!(store.get_source(10).await.unwrap().last_scraped, Some(t0()));
}

#[tokio::test]
async fn rerunning_a_cycle_updates_instead_of_duplicating() {
    let store = seeded(vec![market_source(10, FEED, 1)]);
    let second = r#"[{"value": 2.60, "currency": "USD", "observation_date": "2025-09-01"}]"#;
    let fetcher = Arc::new(MockFetcher::new().script(
        FEED,
        vec![
            Ok(PAYLOAD.as_bytes().to_vec()),
            Ok(second.as_bytes().to_vec()),
        ],
    ));
    let coord = coordinator(Arc::clone(&store), Arc::clone(&fetcher));
    let cancel = CancellationToken::new();

    coord.process_source(10, t0(), &cancel).await;

    // Same tick again: not due, nothing fetched.
    assert!(matches!(
        coord.process_source(10, t0(), &cancel).await,
        SourceOutcome::Skipped
    ));
    assert_eq!(fetcher.calls(), 1);

    let later = t0() + ChronoDuration::hours(25);
    let outcome = coord.process_source(10, later, &cancel).await;
    assert!(matches!(
        outcome,
        SourceOutcome::Stored {
            inserted: 0,
            updated: 1,
            ..
        }
    ));
    let rows = store.prices_for_source(10).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert!((rows[0].value - 2.60).abs() < 1e-9);
    assert_eq!(store.get_source(10).await.unwrap().last_scraped, Some(later));
}

#[tokio::test]
async fn invalid_payload_stores_nothing_and_keeps_source_due() {
    let store = seeded(vec![market_source(10, FEED, 1)]);
    let fetcher = Arc::new(MockFetcher::new().ok(FEED, r#"{"value": -5, "currency": "USD"}"#));
    let coord = coordinator(Arc::clone(&store), fetcher);

    let outcome = coord
        .process_source(10, t0(), &CancellationToken::new())
        .await;
    match outcome {
        SourceOutcome::NormalizeFailed(NormalizeError::Invalid { first, .. }) => {
            assert_eq!(first, ValidationError::InvalidValue(-5.0))
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(store.price_count(), 0);
    assert_eq!(store.get_source(10).await.unwrap().last_scraped, None);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_are_reported_not_raised() {
    let store = seeded(vec![market_source(10, BAD_FEED, 1)]);
    let fetcher = Arc::new(MockFetcher::new().failing(BAD_FEED, FetchError::Status(503)));
    let coord = coordinator(Arc::clone(&store), Arc::clone(&fetcher));

    let outcome = coord
        .process_source(10, t0(), &CancellationToken::new())
        .await;
    match outcome {
        SourceOutcome::FetchFailed(FetchError::Exhausted { attempts, last }) => {
            assert_eq!(attempts, 4);
            assert_eq!(*last, FetchError::Status(503));
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(fetcher.calls(), 4);
    assert_eq!(store.get_source(10).await.unwrap().last_scraped, None);
}

#[tokio::test(start_paused = true)]
async fn one_failing_source_does_not_affect_another() {
    let store = seeded(vec![
        market_source(10, FEED, 1),
        market_source(11, BAD_FEED, 1),
    ]);
    let fetcher = Arc::new(
        MockFetcher::new()
            .ok(FEED, PAYLOAD)
            .failing(BAD_FEED, FetchError::Timeout),
    );
    let coord = coordinator(Arc::clone(&store), Arc::clone(&fetcher));

    let report = coord.run_cycle(t0(), &CancellationToken::new()).await;
    assert_eq!(report.sources, 2);
    assert_eq!(report.stored, 1);
    assert_eq!(report.fetch_failed, 1);
    assert_eq!(report.prices_written, 1);
    assert_eq!(fetcher.calls_for(BAD_FEED), 4);
    assert_eq!(store.get_source(10).await.unwrap().last_scraped, Some(t0()));
    assert_eq!(store.get_source(11).await.unwrap().last_scraped, None);
}

#[tokio::test(start_paused = true)]
async fn simultaneous_ticks_fetch_a_source_once() {
    let store = seeded(vec![market_source(10, FEED, 1)]);
    let fetcher = Arc::new(
        MockFetcher::new()
            .with_delay(Duration::from_millis(100))
            .ok(FEED, PAYLOAD),
    );
    let coord = coordinator(Arc::clone(&store), Arc::clone(&fetcher));
    let cancel = CancellationToken::new();

    let (a, b) = tokio::join!(coord.run_cycle(t0(), &cancel), coord.run_cycle(t0(), &cancel));

    assert_eq!(fetcher.calls(), 1);
    assert_eq!(a.stored + b.stored, 1);
    assert_eq!(a.in_flight + b.in_flight + a.skipped + b.skipped, 1);
    assert_eq!(store.price_count(), 1);
}

#[tokio::test]
async fn claimed_source_is_a_no_op() {
    let store = seeded(vec![market_source(10, FEED, 1)]);
    let fetcher = Arc::new(MockFetcher::new().ok(FEED, PAYLOAD));
    let coord = coordinator(Arc::clone(&store), Arc::clone(&fetcher));

    let guard = coord.claim(10).expect("first claim");
    assert!(coord.is_in_flight(10));
    assert!(matches!(
        coord
            .process_source(10, t0(), &CancellationToken::new())
            .await,
        SourceOutcome::AlreadyInFlight
    ));
    assert_eq!(fetcher.calls(), 0);

    drop(guard);
    assert!(!coord.is_in_flight(10));
    assert!(matches!(
        coord
            .process_source(10, t0(), &CancellationToken::new())
            .await,
        SourceOutcome::Stored { .. }
    ));
}

#[tokio::test]
async fn cancelled_cycle_writes_nothing() {
    let store = seeded(vec![market_source(10, FEED, 1)]);
    let fetcher = Arc::new(MockFetcher::new().ok(FEED, PAYLOAD));
    let coord = coordinator(Arc::clone(&store), Arc::clone(&fetcher));
    let cancel = CancellationToken::new();
    cancel.cancel();

    assert!(matches!(
        coord.process_source(10, t0(), &cancel).await,
        SourceOutcome::Cancelled
    ));
    assert_eq!(fetcher.calls(), 0);
    assert_eq!(store.price_count(), 0);

    let report = coord.run_cycle(t0(), &cancel).await;
    assert_eq!(report.stored, 0);
    assert_eq!(store.get_source(10).await.unwrap().last_scraped, None);
}

#[tokio::test]
async fn soft_deleted_sources_are_not_visited() {
    let store = seeded(vec![market_source(10, FEED, 1), market_source(11, FEED, 1)]);
    store.soft_delete_source(11, t0()).unwrap();
    let fetcher = Arc::new(MockFetcher::new().ok(FEED, PAYLOAD));
    let coord = coordinator(Arc::clone(&store), Arc::clone(&fetcher));

    let report = coord.run_cycle(t0(), &CancellationToken::new()).await;
    assert_eq!(report.sources, 1);
    assert_eq!(fetcher.calls(), 1);
    assert!(store.get_source(11).await.unwrap().last_scraped.is_none());
}

#[tokio::test(start_paused = true)]
async fn fetches_never_exceed_the_worker_pool() {
    let urls: Vec<String> = (0..10)
        .map(|i| format!("https://feed{i}.example/prices"))
        .collect();
    let store = seeded(
        urls.iter()
            .enumerate()
            .map(|(i, u)| market_source(100 + i as i64, u, 1))
            .collect(),
    );
    let mut fetcher = MockFetcher::new().with_delay(Duration::from_millis(100));
    for u in &urls {
        fetcher = fetcher.ok(u, PAYLOAD);
    }
    let fetcher = Arc::new(fetcher);
    let coord = coordinator(Arc::clone(&store), Arc::clone(&fetcher));

    let report = coord.run_cycle(t0(), &CancellationToken::new()).await;

    assert_eq!(report.stored, 10);
    assert_eq!(fetcher.calls(), 10);
    let limit = exec_cfg().concurrency;
    let peak = fetcher.peak_in_flight();
    assert!(peak <= limit, "peak {peak} over limit {limit}");
    assert!(peak > 1, "sources were not fetched in parallel");
}

#[tokio::test(start_paused = true)]
async fn cancelling_mid_fetch_discards_the_payload() {
    let store = seeded(vec![market_source(10, FEED, 1)]);
    let fetcher = Arc::new(
        MockFetcher::new()
            .with_delay(Duration::from_secs(10))
            .ok(FEED, PAYLOAD),
    );
    let coord = coordinator(Arc::clone(&store), Arc::clone(&fetcher));
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    let (outcome, _) = tokio::join!(coord.process_source(10, t0(), &cancel), async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });

    assert!(matches!(outcome, SourceOutcome::Cancelled));
    assert_eq!(fetcher.calls(), 1);
    assert_eq!(store.price_count(), 0);
    assert_eq!(store.get_source(10).await.unwrap().last_scraped, None);
    assert!(!coord.is_in_flight(10));
}

#[tokio::test(start_paused = true)]
async fn deleting_a_source_mid_fetch_sticks() {
    let store = seeded(vec![market_source(10, FEED, 1)]);
    let fetcher = Arc::new(
        MockFetcher::new()
            .with_delay(Duration::from_secs(10))
            .ok(FEED, PAYLOAD),
    );
    let coord = coordinator(Arc::clone(&store), Arc::clone(&fetcher));
    let cancel = CancellationToken::new();

    let deleter = Arc::clone(&store);
    let (outcome, _) = tokio::join!(coord.process_source(10, t0(), &cancel), async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        deleter.soft_delete_source(10, t0()).unwrap();
    });

    assert!(matches!(outcome, SourceOutcome::Stored { .. }));
    let source = store.get_source(10).await.unwrap();
    assert!(source.record.deleted_at.is_some());
    assert_eq!(source.last_scraped, Some(t0()));
    assert!(store.list_sources(false).await.unwrap().is_empty());
}

#[tokio::test]
async fn untagged_quote_is_not_copied_to_every_product() {
    let store = seeded(vec![Source {
        scraper_config: ScraperConfig::default(),
        ..market_source(10, FEED, 1)
    }]);
    store
        .insert_product(
            Product {
                name: "Coffee".into(),
                ..avocado(2)
            },
            t0(),
        )
        .unwrap();
    let fetcher = Arc::new(MockFetcher::new().ok(
        FEED,
        r#"[{"value": 3.1, "currency": "USD", "date": "2025-09-01", "location_id": 1},
            {"value": 2.0, "currency": "USD", "date": "2025-09-01", "location_id": 1, "product": "coffee"}]"#,
    ));
    let coord = coordinator(Arc::clone(&store), fetcher);

    let outcome = coord
        .process_source(10, t0(), &CancellationToken::new())
        .await;
    assert!(matches!(
        outcome,
        SourceOutcome::Stored {
            inserted: 1,
            rejected: 1,
            ..
        }
    ));
    let rows = store.prices_for_source(10).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].product_id, 2);
}

/// Reads pass through; price writes always fail.
struct BrokenWrites(MemoryStore);

#[async_trait]
impl EntityStore for BrokenWrites {
    async fn list_sources(&self, include_deleted: bool) -> Result<Vec<Source>, StoreError> {
        self.0.list_sources(include_deleted).await
    }
    async fn get_source(&self, id: i64) -> Result<Source, StoreError> {
        self.0.get_source(id).await
    }
    async fn update_source(&self, source: &Source) -> Result<(), StoreError> {
        self.0.update_source(source).await
    }
    async fn mark_source_scraped(
        &self,
        id: i64,
        now: chrono::DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.0.mark_source_scraped(id, now).await
    }
    async fn list_products(&self) -> Result<Vec<Product>, StoreError> {
        self.0.list_products().await
    }
    async fn upsert_price(&self, _price: Price) -> Result<UpsertOutcome, StoreError> {
        Err(StoreError::Unavailable("disk full".into()))
    }
    async fn prices_for_source(&self, source_id: i64) -> Result<Vec<Price>, StoreError> {
        self.0.prices_for_source(source_id).await
    }
}

#[tokio::test]
async fn store_failure_leaves_last_scraped_alone() {
    let inner = MemoryStore::new();
    inner.insert_product(avocado(1), t0()).unwrap();
    inner.insert_source(market_source(10, FEED, 1), t0()).unwrap();
    let store = Arc::new(BrokenWrites(inner));
    let fetcher = Arc::new(MockFetcher::new().ok(FEED, PAYLOAD));
    let coord = Arc::new(IngestCoordinator::new(
        Arc::clone(&store),
        FetchExecutor::new(fetcher, exec_cfg()),
        PriceNormalizer::default(),
    ));

    let report = coord.run_cycle(t0(), &CancellationToken::new()).await;
    assert_eq!(report.store_failed, 1);
    assert_eq!(store.get_source(10).await.unwrap().last_scraped, None);
}
