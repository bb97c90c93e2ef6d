//! Error types for featurelane
//!
//! Every failure the control plane can produce is a variant of [`Error`].
//! Variants are grouped into an [`ErrorKind`] that decides how the failure
//! is handled:
//!
//! - **DataIntegrity**: a persisted record can no longer be decoded. Fatal
//!   for that record and never retried.
//! - **Conflict**: an optimistic-concurrency check failed. The caller
//!   re-reads the latest snapshot and tries again.
//! - **Executor**: the external execution backend failed or timed out.
//!   Retried with backoff, then surfaced as an `ERROR` job.
//! - **Validation**: the input was rejected before it reached storage.

use thiserror::Error;

/// Result type alias for featurelane operations
pub type Result<T> = std::result::Result<T, Error>;

/// Handling category for an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    DataIntegrity,
    Conflict,
    Executor,
    Validation,
    Other,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::DataIntegrity => write!(f, "data_integrity"),
            ErrorKind::Conflict => write!(f, "conflict"),
            ErrorKind::Executor => write!(f, "executor"),
            ErrorKind::Validation => write!(f, "validation"),
            ErrorKind::Other => write!(f, "other"),
        }
    }
}

/// All errors that can occur in featurelane
#[derive(Error, Debug)]
pub enum Error {
    /// Persisted store config bytes do not decode under the schema of its type
    #[error("Corrupt {store_type} config: {reason}")]
    CorruptConfig { store_type: String, reason: String },

    /// Store type name is not one of the supported backends
    #[error("Unsupported store type '{0}'")]
    UnsupportedStoreType(String),

    /// A persisted row could not be mapped back to a registry entity
    #[error("Corrupt registry record '{record}': {reason}")]
    CorruptRecord { record: String, reason: String },

    /// Optimistic-concurrency check failed on commit
    #[error("Conflict on '{target}': expected version {expected}, found {actual}")]
    Conflict {
        target: String,
        expected: u64,
        actual: u64,
    },

    /// Incompatible schema change submitted for an existing feature set
    #[error("Version conflict for feature set '{reference}': {reason}")]
    VersionConflict { reference: String, reason: String },

    /// External job executor reported a failure
    #[error("Executor error: {0}")]
    Executor(String),

    /// External job executor did not answer in time
    #[error("Executor call '{operation}' timed out after {timeout_ms}ms")]
    ExecutorTimeout { operation: String, timeout_ms: u64 },

    /// Malformed input rejected before persistence
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Store '{0}' not found")]
    StoreNotFound(String),

    #[error("Feature set '{0}' not found")]
    FeatureSetNotFound(String),

    /// Illegal ingestion job status change
    #[error("Invalid job transition for '{job_id}': {from} -> {to}")]
    InvalidTransition {
        job_id: String,
        from: String,
        to: String,
    },

    /// Repository backend failure (SQLite, I/O)
    ///
    /// Backends use `anyhow` internally; the original error is preserved.
    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Handling category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::CorruptConfig { .. }
            | Error::UnsupportedStoreType(_)
            | Error::CorruptRecord { .. } => ErrorKind::DataIntegrity,
            Error::Conflict { .. } | Error::VersionConflict { .. } => ErrorKind::Conflict,
            Error::Executor(_) | Error::ExecutorTimeout { .. } => ErrorKind::Executor,
            Error::Validation(_) => ErrorKind::Validation,
            Error::StoreNotFound(_)
            | Error::FeatureSetNotFound(_)
            | Error::InvalidTransition { .. }
            | Error::Storage(_)
            | Error::Serialization(_)
            | Error::Config(_)
            | Error::Internal(_) => ErrorKind::Other,
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn executor(msg: impl Into<String>) -> Self {
        Self::Executor(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn corrupt_config(store_type: impl Into<String>, reason: impl ToString) -> Self {
        Self::CorruptConfig {
            store_type: store_type.into(),
            reason: reason.to_string(),
        }
    }
}
