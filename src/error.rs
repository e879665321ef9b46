//! Error taxonomy for the ingestion pipeline and report store.
//!
//! The "not found" variants are expected signals: call sites that can
//! recover from them (collection and node lookups) convert them into
//! create-on-miss actions. Everything else propagates to the ingestion
//! boundary, where the single upload is rejected and logged.

use thiserror::Error;

/// Errors produced by the core library.
#[derive(Debug, Error)]
pub enum ReportError {
    /// The report could not be reduced to `host`, `time`, and `status`.
    #[error("malformed report: {0}")]
    MalformedReport(String),

    #[error("no such host: {0}")]
    NoSuchHost(String),

    #[error("no such collection: {0}")]
    NoSuchCollection(String),

    #[error("report not found: {0}")]
    NoSuchReport(i64),

    /// More than one report resolved as a node's current report.
    ///
    /// Indicates external corruption of the store. The ingestion is
    /// rejected and never retried.
    #[error("consistency violation for host {host}: {current} current reports resolved")]
    ConsistencyViolation { host: String, current: usize },

    /// Another instance held the migration lock for the whole retry budget.
    #[error("schema not ready: version {version} still incomplete after {attempts} attempts")]
    SchemaNotReady { version: i64, attempts: u32 },

    #[error("status code out of range: {0}")]
    StatusOutOfRange(i64),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReportError {
    /// Whether this error is one of the expected "not found" signals.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ReportError::NoSuchHost(_)
                | ReportError::NoSuchCollection(_)
                | ReportError::NoSuchReport(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ReportError>;
