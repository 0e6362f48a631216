// src/error.rs
//! Error taxonomy for the ingestion pipeline.
//!
//! Only `ConfigError` (and a store that cannot be reached at startup) is fatal.
//! Everything else is scoped to a single source's cycle.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config from {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing config {path}: {message}")]
    Parse { path: String, message: String },

    #[error("invalid duration `{0}`")]
    Duration(String),

    #[error("{0} points to a non-existent path")]
    MissingEnvPath(&'static str),
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("non-success response: HTTP {0}")]
    Status(u16),

    #[error("invalid url `{0}`")]
    InvalidUrl(String),

    #[error("domain `{0}` is on the disallowed list")]
    DisallowedDomain(String),

    #[error("robots.txt disallows `{0}`")]
    RobotsDisallowed(String),

    #[error("fetch cancelled")]
    Cancelled,

    #[error("giving up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        last: Box<FetchError>,
    },
}

impl FetchError {
    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::Network(_) | FetchError::Timeout | FetchError::Status(_)
        )
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("value {0} is not a finite non-negative number")]
    InvalidValue(f64),

    #[error("missing price value")]
    MissingValue,

    #[error("unrecognized currency code `{0}`")]
    UnknownCurrency(String),

    #[error("missing currency")]
    MissingCurrency,

    #[error("unit must not be empty")]
    EmptyUnit,

    #[error("missing observation date")]
    MissingDate,

    #[error("unparseable observation date `{0}`")]
    BadDate(String),

    #[error("observation date {0} lies in the future")]
    FutureDate(String),

    #[error("no location for observation")]
    MissingLocation,

    #[error("observation names no product and the feed has no default")]
    UnresolvedProduct,

    #[error("source {source_id} reliability {value} outside [0, 1]")]
    ReliabilityOutOfRange { source_id: i64, value: f64 },
}

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("malformed payload: {0}")]
    Payload(String),

    #[error("all {rejected} observations rejected, first: {first}")]
    Invalid {
        rejected: usize,
        first: ValidationError,
    },
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("write rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum LocationError {
    #[error("location {0} would create a cycle in the parent chain")]
    Cycle(i64),

    #[error("location {child} references unknown parent {parent}")]
    UnknownParent { child: i64, parent: i64 },

    #[error("location {0} not found")]
    NotFound(i64),
}
