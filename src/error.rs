//! Error types for vantage.

use thiserror::Error;

/// Errors that can occur while building, searching, or tuning an index.
#[derive(Debug, Error)]
pub enum VantageError {
    /// Invalid parameter value (bad flag, unknown space or method, bad
    /// pruner coefficients).
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// I/O failure with the offending path attached.
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A line of a dataset file could not be parsed.
    #[error("{file}:{line}: {msg}")]
    Parse {
        file: String,
        line: usize,
        msg: String,
    },

    /// A dataset row has a different number of components than the rows
    /// before it.
    #[error("{file}:{line}: row has {got} components, previous rows have {expected}")]
    DimensionMismatch {
        file: String,
        line: usize,
        got: usize,
        expected: usize,
    },

    /// The tuner could not find parameters meeting the recall floor.
    #[error("failed to reach the desired recall {desired:.4}: best achieved {achieved:.4}")]
    RecallUnmet { desired: f64, achieved: f64 },

    /// An internal consistency check failed.
    #[error("internal invariant violated: {0}")]
    InternalInvariant(String),
}

/// Result type alias for vantage operations.
pub type Result<T> = std::result::Result<T, VantageError>;

impl VantageError {
    /// Attach a path to an `std::io::Error`.
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        VantageError::Io {
            path: path.into(),
            source,
        }
    }
}
