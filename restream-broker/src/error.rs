use thiserror::Error;

/// Errors surfaced by broker operations.
///
/// Absence-style conditions (unknown stream, already-done stream) are
/// conveyed through `Option`/`bool` return values and no-ops rather than
/// errors; the one failure a caller can observe is the backing chunk store
/// refusing an operation.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The backing chunk log store failed.
    #[error("chunk store error: {0}")]
    Store(#[from] anyhow::Error),
}

/// Result alias for broker operations.
pub type BrokerResult<T> = Result<T, BrokerError>;
