// src/ingest/scheduler.rs
use chrono::{DateTime, Utc};
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::ingest::coordinator::IngestCoordinator;
use crate::ingest::executor::Fetcher;
use crate::ingest::store::EntityStore;
use crate::models::UpdateFrequency;

/// A source is due when it was never scraped, or when its last scrape is
/// strictly older than the frequency threshold.
pub fn is_due(
    now: DateTime<Utc>,
    last_scraped: Option<DateTime<Utc>>,
    frequency: UpdateFrequency,
) -> bool {
    match last_scraped {
        None => true,
        Some(ts) => now.signed_duration_since(ts) > frequency.threshold(),
    }
}

/// Spawn the periodic driver: one ingestion cycle per tick until `cancel` fires.
/// The first tick runs immediately.
pub fn spawn_scheduler<S, F>(
    coordinator: Arc<IngestCoordinator<S, F>>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()>
where
    S: EntityStore + 'static,
    F: Fetcher + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(target: "ingest", "scheduler cancelled");
                    return;
                }
                _ = ticker.tick() => {
                    let report = coordinator.run_cycle(Utc::now(), &cancel).await;
                    counter!("ingest_runs_total").increment(1);
                    tracing::info!(
                        target: "ingest",
                        stored = report.stored,
                        skipped = report.skipped,
                        fetch_failed = report.fetch_failed,
                        normalize_failed = report.normalize_failed,
                        store_failed = report.store_failed,
                        prices = report.prices_written,
                        "ingest tick"
                    );
                }
            }
        }
    })
}
