// src/ingest/mod.rs
pub mod coordinator;
pub mod executor;
pub mod normalize;
pub mod robots;
pub mod scheduler;
pub mod store;

use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;

pub use coordinator::{CycleReport, CycleState, IngestCoordinator, SourceOutcome};
pub use executor::{ExecutorConfig, FetchExecutor, FetchOutput, Fetcher, HttpFetcher};
pub use normalize::{Normalized, PriceNormalizer};
pub use scheduler::{is_due, spawn_scheduler};
pub use store::{EntityStore, MemoryStore, UpsertOutcome};

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_runs_total", "Scheduler ticks that ran a cycle.");
        describe_counter!(
            "ingest_fetch_attempts_total",
            "Individual fetch attempts, retries included."
        );
        describe_counter!(
            "ingest_fetch_failures_total",
            "Fetches that failed for the cycle (retries exhausted or refused)."
        );
        describe_counter!(
            "ingest_sources_skipped_total",
            "Sources checked but not yet due."
        );
        describe_counter!(
            "ingest_source_outcomes_total",
            "Per-source cycle outcomes, labelled by outcome."
        );
        describe_counter!(
            "ingest_prices_stored_total",
            "Price rows inserted or updated."
        );
        describe_counter!(
            "ingest_validation_rejects_total",
            "Observations dropped by validation."
        );
        describe_counter!("ingest_store_errors_total", "Entity store failures.");
        describe_histogram!("ingest_fetch_ms", "Fetch attempt time in milliseconds.");
        describe_histogram!("ingest_normalize_ms", "Normalization time in milliseconds.");
        describe_gauge!(
            "ingest_cycle_last_run_ts",
            "Unix ts when the last ingest cycle finished."
        );
    });
}
