//! Kinesis Event Sink - persists stream records as normalized events
//!
//! Records read from an AWS Kinesis stream are normalized into
//! [`NormalizedEvent`]s, written through an [`EventStore`], and checkpointed
//! once per batch. A [`PollingCoordinator`] drives one
//! [`ShardRecordProcessor`] per shard.

pub mod client;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod factory;
pub mod model;
pub mod monitoring;
pub mod persistence;
pub mod processor;
pub mod retry;
pub mod store;
pub mod transform;

// Test utilities are also exported for integration tests
#[cfg(any(test, feature = "test-utils"))]
pub mod test;
#[cfg(test)]
mod tests;

pub use client::{KinesisClientError, KinesisClientTrait, ShardInfo, StartingPosition};
pub use config::{AppConfig, AwsClients};
pub use coordinator::{CoordinatorConfig, InitialPosition, PollingCoordinator, ShardExit};
pub use error::{CheckpointError, PersistenceError, ProcessorError, Result, TransformError};
pub use factory::{EventProcessorFactory, ShardRecordProcessorFactory};
pub use model::{EventKey, NormalizedEvent, RawRecord};
pub use monitoring::{MetricsAggregator, MonitoringConfig, ProcessingEvent};
pub use processor::{
    BatchOutcome, Checkpointer, EventShardProcessor, ProcessorState, ShardRecordProcessor,
    ShardStats, TerminationReason,
};
pub use retry::{Backoff, ExponentialBackoff, RetryConfig};
pub use transform::{Clock, RecordTransformer, SystemClock};

pub use persistence::{EventStore, InMemoryEventStore};
pub use store::{CheckpointStore, InMemoryCheckpointStore, ShardCheckpoint, StoreCheckpointer};

#[cfg(feature = "dynamodb-store")]
pub use persistence::DynamoDbEventStore;
#[cfg(feature = "dynamodb-store")]
pub use store::DynamoDbCheckpointStore;
