use crate::domain::transaction::TransactionStatus;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PaymentError>;

/// Every failure the engine can surface to a caller.
///
/// Messages are written to be safe for end users: they never contain
/// decrypted credentials, raw tokens or provider secrets.
#[derive(Error, Debug)]
pub enum PaymentError {
    /// Rejected input (non-positive amount, out-of-bounds amount, missing fields).
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unknown or inactive gateway/method, or a provider the factory cannot build.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The provider call failed or answered with `success: false`.
    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: TransactionStatus,
        to: TransactionStatus,
    },

    /// Optimistic-concurrency check kept failing, or a conflicting operation is in flight.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "storage-rocksdb")]
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),
}

impl From<reqwest::Error> for PaymentError {
    fn from(err: reqwest::Error) -> Self {
        // Strip the URL: it may carry credentials in the query string.
        PaymentError::Gateway(err.without_url().to_string())
    }
}

impl PaymentError {
    /// Whether a caller may reasonably retry the same request later.
    ///
    /// The engine itself never retries gateway calls.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PaymentError::Gateway(_) | PaymentError::Conflict(_))
    }
}
