// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod config;
pub mod error;
pub mod ingest;
pub mod metrics;
pub mod models;

// ---- Re-exports for stable public API ----
pub use crate::config::Config;
pub use crate::error::{ConfigError, FetchError, NormalizeError, StoreError, ValidationError};
pub use crate::ingest::{CycleReport, IngestCoordinator, SourceOutcome};
