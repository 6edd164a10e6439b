//! Error types for influxdb-bridge.

use thiserror::Error;

use crate::series::SampleKind;

/// Error type for influxdb-bridge operations.
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Failed to serialize or deserialize a JSON payload.
    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failed to parse CSV data.
    #[error("CSV parse error: {0}")]
    Csv(String),

    /// Failed to parse a value from the response.
    #[error("Failed to parse value: {message}")]
    Parse {
        /// Description of what failed to parse.
        message: String,
    },

    /// Unknown data type in annotated CSV.
    #[error("Unknown data type: {0}")]
    UnknownDataType(String),

    /// Missing required annotation in CSV.
    #[error("Missing annotation: {0}")]
    MissingAnnotation(String),

    /// Row has different number of columns than expected.
    #[error("Column count mismatch: expected {expected}, got {actual}")]
    ColumnMismatch {
        /// Expected number of columns.
        expected: usize,
        /// Actual number of columns found.
        actual: usize,
    },

    /// Query returned an error from InfluxDB.
    #[error("Query error from InfluxDB: {message}")]
    QueryError {
        /// Error message returned by InfluxDB.
        message: String,
        /// Optional reference link for debugging.
        reference: Option<String>,
    },

    /// I/O error during streaming.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A series was asked to hold values of a different runtime type than it
    /// already contains.
    #[error("Type mismatch in series '{series}': holds {expected}, got {actual}")]
    TypeMismatch {
        /// Name of the offending series.
        series: String,
        /// Kind of the samples already present.
        expected: SampleKind,
        /// Kind of the rejected value.
        actual: SampleKind,
    },

    /// A fetch pipeline failed; wraps the underlying cause exactly once.
    #[error("Fetch failed during {operation}: {source}")]
    Fetch {
        /// Pipeline step that failed (e.g. "flux query", "influxql decode").
        operation: String,
        /// Underlying cause.
        #[source]
        source: Box<Error>,
    },

    /// A write pipeline failed; batches already flushed stay applied.
    #[error("Write failed during {operation}: {source}")]
    Write {
        /// Pipeline step that failed (e.g. "point submit", "batch flush").
        operation: String,
        /// Underlying cause.
        #[source]
        source: Box<Error>,
    },

    /// Invalid configuration detected at pipeline construction.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A point was submitted to a writer that was already closed.
    #[error("Batch writer is closed")]
    WriterClosed,
}

impl Error {
    /// Wrap this error as a fetch-pipeline failure.
    pub fn into_fetch(self, operation: impl Into<String>) -> Error {
        match self {
            // Already wrapped at the boundary; do not double-wrap.
            e @ Error::Fetch { .. } => e,
            other => Error::Fetch {
                operation: operation.into(),
                source: Box::new(other),
            },
        }
    }

    /// Wrap this error as a write-pipeline failure.
    pub fn into_write(self, operation: impl Into<String>) -> Error {
        match self {
            e @ Error::Write { .. } => e,
            other => Error::Write {
                operation: operation.into(),
                source: Box::new(other),
            },
        }
    }
}

/// Result type alias for influxdb-bridge operations.
pub type Result<T> = std::result::Result<T, Error>;
