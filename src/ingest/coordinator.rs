// src/ingest/coordinator.rs
//! Drives one scheduling cycle: Scheduler → Executor → Normalizer → Store,
//! one source at a time per id, many sources in parallel up to the pool size.

use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::CrawlerConfig;
use crate::error::{FetchError, NormalizeError, StoreError};
use crate::ingest::executor::{ExecutorConfig, FetchExecutor, Fetcher};
use crate::ingest::normalize::{parse_observations, PriceNormalizer};
use crate::ingest::store::{EntityStore, UpsertOutcome};
use crate::models::{Price, Product, SoftDelete, Source};

/// Per-source lifecycle within a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    Checking,
    Skipped,
    Fetching,
    FetchFailed,
    Fetched,
    Normalizing,
    NormalizeFailed,
    Stored,
}

/// How a source's cycle ended.
#[derive(Debug)]
pub enum SourceOutcome {
    /// Not due yet (or soft-deleted).
    Skipped,
    /// Another cycle for this source is running.
    AlreadyInFlight,
    FetchFailed(FetchError),
    NormalizeFailed(NormalizeError),
    StoreFailed(StoreError),
    Stored {
        inserted: usize,
        updated: usize,
        rejected: usize,
    },
    /// Cancelled before anything was written.
    Cancelled,
}

impl SourceOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            SourceOutcome::Skipped => "skipped",
            SourceOutcome::AlreadyInFlight => "in_flight",
            SourceOutcome::FetchFailed(_) => "fetch_failed",
            SourceOutcome::NormalizeFailed(_) => "normalize_failed",
            SourceOutcome::StoreFailed(_) => "store_failed",
            SourceOutcome::Stored { .. } => "stored",
            SourceOutcome::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct CycleReport {
    pub sources: usize,
    pub skipped: usize,
    pub in_flight: usize,
    pub stored: usize,
    pub fetch_failed: usize,
    pub normalize_failed: usize,
    pub store_failed: usize,
    pub cancelled: usize,
    pub prices_written: usize,
    pub outcomes: Vec<(i64, &'static str)>,
}

impl CycleReport {
    fn record(&mut self, source_id: i64, outcome: &SourceOutcome) {
        match outcome {
            SourceOutcome::Skipped => self.skipped += 1,
            SourceOutcome::AlreadyInFlight => self.in_flight += 1,
            SourceOutcome::FetchFailed(_) => self.fetch_failed += 1,
            SourceOutcome::NormalizeFailed(_) => self.normalize_failed += 1,
            SourceOutcome::StoreFailed(_) => self.store_failed += 1,
            SourceOutcome::Cancelled => self.cancelled += 1,
            SourceOutcome::Stored {
                inserted, updated, ..
            } => {
                self.stored += 1;
                self.prices_written += inserted + updated;
            }
        }
        self.outcomes.push((source_id, outcome.label()));
    }
}

/// Marks a source as in flight; the mark is released on drop.
pub struct InFlightGuard {
    set: Arc<Mutex<HashSet<i64>>>,
    id: i64,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Ok(mut set) = self.set.lock() {
            set.remove(&self.id);
        }
    }
}

pub struct IngestCoordinator<S, F> {
    store: Arc<S>,
    executor: FetchExecutor<F>,
    normalizer: PriceNormalizer,
    workers: Arc<Semaphore>,
    in_flight: Arc<Mutex<HashSet<i64>>>,
}

impl<S, F> IngestCoordinator<S, F>
where
    S: EntityStore + 'static,
    F: Fetcher + 'static,
{
    pub fn new(store: Arc<S>, executor: FetchExecutor<F>, normalizer: PriceNormalizer) -> Self {
        let pool = executor.config().concurrency.max(1);
        Self {
            store,
            executor,
            normalizer,
            workers: Arc::new(Semaphore::new(pool)),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn from_config(store: Arc<S>, fetcher: F, cfg: &CrawlerConfig) -> Self {
        let executor = FetchExecutor::new(fetcher, ExecutorConfig::from(cfg));
        Self::new(store, executor, PriceNormalizer::new(cfg.clock_skew))
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Atomically claim `id`. `None` if a cycle for it is already running.
    pub fn claim(&self, id: i64) -> Option<InFlightGuard> {
        let mut set = self.in_flight.lock().ok()?;
        if !set.insert(id) {
            return None;
        }
        Some(InFlightGuard {
            set: Arc::clone(&self.in_flight),
            id,
        })
    }

    pub fn is_in_flight(&self, id: i64) -> bool {
        self.in_flight
            .lock()
            .map(|s| s.contains(&id))
            .unwrap_or(false)
    }

    /// One cycle over every non-deleted source, at most `concurrency` at a time.
    /// Stops dispatching new sources once `cancel` fires.
    pub async fn run_cycle(
        self: &Arc<Self>,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> CycleReport {
        crate::ingest::ensure_metrics_described();

        let mut report = CycleReport::default();
        let sources = match self.store.list_sources(false).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(target: "ingest", error = %e, "listing sources failed");
                counter!("ingest_store_errors_total").increment(1);
                return report;
            }
        };
        report.sources = sources.len();

        let mut tasks = JoinSet::new();
        for source in sources {
            let id = source.id();
            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                p = Arc::clone(&self.workers).acquire_owned() => match p {
                    Ok(p) => p,
                    Err(_) => break,
                },
            };
            let Some(guard) = self.claim(id) else {
                tracing::debug!(target: "ingest", source_id = id, "already in flight");
                report.record(id, &SourceOutcome::AlreadyInFlight);
                continue;
            };
            let this = Arc::clone(self);
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let outcome = this.run_claimed(id, now, &cancel, guard).await;
                (id, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((id, outcome)) => report.record(id, &outcome),
                Err(e) => tracing::error!(target: "ingest", error = %e, "ingest worker panicked"),
            }
        }

        gauge!("ingest_cycle_last_run_ts").set(now.timestamp().max(0) as f64);
        report
    }

    /// Run a single source's cycle, unless one is already running for it.
    pub async fn process_source(
        &self,
        source_id: i64,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> SourceOutcome {
        match self.claim(source_id) {
            Some(guard) => self.run_claimed(source_id, now, cancel, guard).await,
            None => SourceOutcome::AlreadyInFlight,
        }
    }

    async fn run_claimed(
        &self,
        source_id: i64,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
        _guard: InFlightGuard,
    ) -> SourceOutcome {
        let outcome = self.cycle(source_id, now, cancel).await;
        counter!("ingest_source_outcomes_total", "outcome" => outcome.label()).increment(1);
        match &outcome {
            SourceOutcome::FetchFailed(e) => {
                tracing::warn!(target: "ingest", source_id, error = %e, "fetch failed, will retry next tick")
            }
            SourceOutcome::NormalizeFailed(e) => {
                tracing::warn!(target: "ingest", source_id, error = %e, "payload rejected")
            }
            SourceOutcome::StoreFailed(e) => {
                counter!("ingest_store_errors_total").increment(1);
                tracing::warn!(target: "ingest", source_id, error = %e, "store write failed")
            }
            SourceOutcome::Stored {
                inserted,
                updated,
                rejected,
            } => tracing::info!(
                target: "ingest",
                source_id,
                inserted,
                updated,
                rejected,
                "source ingested"
            ),
            _ => {}
        }
        transition(source_id, CycleState::Idle);
        outcome
    }

    async fn cycle(
        &self,
        source_id: i64,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> SourceOutcome {
        transition(source_id, CycleState::Checking);
        // Re-read so a cycle that finished a moment ago is seen.
        let source = match self.store.get_source(source_id).await {
            Ok(s) => s,
            Err(e) => return SourceOutcome::StoreFailed(e),
        };
        if source.is_deleted() || !source.should_scrape(now) {
            transition(source_id, CycleState::Skipped);
            counter!("ingest_sources_skipped_total").increment(1);
            return SourceOutcome::Skipped;
        }
        if cancel.is_cancelled() {
            return SourceOutcome::Cancelled;
        }

        transition(source_id, CycleState::Fetching);
        let fetched = match self.executor.execute(&source, cancel).await {
            Ok(f) => f,
            Err(FetchError::Cancelled) => return SourceOutcome::Cancelled,
            Err(e) => {
                transition(source_id, CycleState::FetchFailed);
                return SourceOutcome::FetchFailed(e);
            }
        };
        transition(source_id, CycleState::Fetched);
        tracing::debug!(
            target: "ingest",
            source_id,
            url = %fetched.url,
            attempts = fetched.attempts,
            bytes = fetched.body.len(),
            "fetched"
        );

        transition(source_id, CycleState::Normalizing);
        let products = match self.store.list_products().await {
            Ok(p) => p,
            Err(e) => return SourceOutcome::StoreFailed(e),
        };
        let (prices, rejected) = match self.normalize_all(&fetched.body, &source, &products, now) {
            Ok(v) => v,
            Err(e) => {
                transition(source_id, CycleState::NormalizeFailed);
                return SourceOutcome::NormalizeFailed(e);
            }
        };

        // Nothing is written for a cancelled source.
        if cancel.is_cancelled() {
            return SourceOutcome::Cancelled;
        }

        let mut inserted = 0usize;
        let mut updated = 0usize;
        for price in prices {
            match self.store.upsert_price(price).await {
                Ok(UpsertOutcome::Inserted) => inserted += 1,
                Ok(UpsertOutcome::Updated) => updated += 1,
                Err(e) => return SourceOutcome::StoreFailed(e),
            }
        }
        counter!("ingest_prices_stored_total").increment((inserted + updated) as u64);

        // Touch only the scrape marker on the stored row.
        if let Err(e) = self.store.mark_source_scraped(source_id, now).await {
            return SourceOutcome::StoreFailed(e);
        }
        transition(source_id, CycleState::Stored);

        SourceOutcome::Stored {
            inserted,
            updated,
            rejected,
        }
    }

    /// Normalize the payload once against every known product.
    fn normalize_all(
        &self,
        body: &[u8],
        source: &Source,
        products: &[Product],
        now: DateTime<Utc>,
    ) -> Result<(Vec<Price>, usize), NormalizeError> {
        let observations = parse_observations(body, source.scraper_config.spec().format)?;
        let n = self
            .normalizer
            .normalize_batch(&observations, source, products, now)?;
        Ok((n.prices, n.rejected.len()))
    }
}

fn transition(source_id: i64, to: CycleState) {
    tracing::debug!(target: "ingest", source_id, state = ?to, "cycle state");
}
