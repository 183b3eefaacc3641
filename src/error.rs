//! Error types for the event sink

use crate::client::KinesisClientError;
use crate::retry::RetryError;
use thiserror::Error;
use tokio::sync::AcquireError;
use tokio::task::JoinError;

/// Main error type for processor and coordinator operations
#[derive(Debug, Error)]
pub enum ProcessorError {
    /// A lifecycle method was called in a state that forbids it
    #[error("Invalid lifecycle call: cannot {operation} while processor is {state}")]
    InvalidLifecycleCall {
        operation: &'static str,
        state: String,
    },

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Failed to get iterator: {0}")]
    GetIteratorFailed(String),

    #[error("Iterator expired for shard {0}")]
    IteratorExpired(String),

    #[error("Failed to get records: {0}")]
    GetRecordsFailed(String),

    #[error("AWS Kinesis error: {0}")]
    KinesisError(String),

    #[error("Shard refresh error: {0}")]
    ShardRefreshError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Maximum retry attempts reached: {0}")]
    MaxRetriesExceeded(String),

    #[error("Shutdown requested")]
    Shutdown,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type for processor operations
pub type Result<T> = std::result::Result<T, ProcessorError>;

/// Raised while extracting fields from a raw payload.
///
/// Never leaves the transformer; every variant degrades to a fallback event.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("Payload is not valid JSON: {0}")]
    MalformedPayload(#[from] serde_json::Error),

    #[error("Payload is JSON but not an object (found {0})")]
    UnexpectedShape(&'static str),
}

/// Error type for event store operations
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Failed to save event {id}@{occurred_at}: {reason}")]
    SaveFailed {
        id: String,
        occurred_at: i64,
        reason: String,
    },

    #[error("Failed to retrieve event {id}@{occurred_at}: {reason}")]
    RetrieveFailed {
        id: String,
        occurred_at: i64,
        reason: String,
    },

    #[error("Stored item is not a valid event: {0}")]
    InvalidItem(String),
}

/// Error type for checkpoint operations
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Failed to save checkpoint: {0}")]
    SaveFailed(String),

    #[error("Failed to retrieve checkpoint: {0}")]
    RetrieveFailed(String),

    #[error("Invalid checkpoint data: {0}")]
    InvalidData(String),
}

impl From<KinesisClientError> for ProcessorError {
    fn from(err: KinesisClientError) -> Self {
        match err {
            KinesisClientError::ExpiredIterator => ProcessorError::IteratorExpired(String::new()),
            KinesisClientError::ThroughputExceeded => {
                ProcessorError::KinesisError("Throughput exceeded".to_string())
            }
            KinesisClientError::AccessDenied => {
                ProcessorError::KinesisError("Access denied".to_string())
            }
            KinesisClientError::InvalidArgument(msg) => {
                ProcessorError::KinesisError(format!("Invalid argument: {}", msg))
            }
            KinesisClientError::ResourceNotFound(msg) => {
                ProcessorError::KinesisError(format!("Resource not found: {}", msg))
            }
            KinesisClientError::KmsError(msg) => {
                ProcessorError::KinesisError(format!("KMS error: {}", msg))
            }
            KinesisClientError::Timeout(msg) => {
                ProcessorError::KinesisError(format!("Timeout: {}", msg))
            }
            KinesisClientError::ConnectionError(msg) => {
                ProcessorError::KinesisError(format!("Connection error: {}", msg))
            }
            KinesisClientError::Other(msg) => ProcessorError::KinesisError(msg),
        }
    }
}

impl<E: std::fmt::Display> From<RetryError<E>> for ProcessorError {
    fn from(err: RetryError<E>) -> Self {
        match err {
            RetryError::MaxRetriesExceeded {
                attempts,
                last_error,
            } => ProcessorError::MaxRetriesExceeded(format!(
                "After {} attempts: {}",
                attempts, last_error
            )),
            RetryError::Permanent(e) => ProcessorError::Other(anyhow::anyhow!("{}", e)),
            RetryError::Interrupted => ProcessorError::Shutdown,
        }
    }
}

impl From<AcquireError> for ProcessorError {
    fn from(err: AcquireError) -> Self {
        ProcessorError::Other(err.into())
    }
}

impl From<JoinError> for ProcessorError {
    fn from(err: JoinError) -> Self {
        ProcessorError::Other(err.into())
    }
}
