//! Per-shard checkpoint storage and the checkpoint handle built on it

use crate::error::CheckpointError;
use crate::processor::Checkpointer;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

#[cfg(feature = "dynamodb-store")]
pub mod dynamodb;
pub mod memory;

#[cfg(feature = "dynamodb-store")]
pub use dynamodb::DynamoDbCheckpointStore;
pub use memory::InMemoryCheckpointStore;

const SHARD_END_MARKER: &str = "SHARD_END";

/// How far a shard has been handled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShardCheckpoint {
    /// Every record up to and including this sequence number is handled
    Sequence(String),
    /// The shard is closed and fully consumed
    ShardEnd,
}

impl ShardCheckpoint {
    pub fn as_str(&self) -> &str {
        match self {
            ShardCheckpoint::Sequence(sequence) => sequence,
            ShardCheckpoint::ShardEnd => SHARD_END_MARKER,
        }
    }

    pub fn parse(value: &str) -> Result<Self, CheckpointError> {
        match value {
            "" => Err(CheckpointError::InvalidData("empty checkpoint".to_string())),
            SHARD_END_MARKER => Ok(ShardCheckpoint::ShardEnd),
            sequence => Ok(ShardCheckpoint::Sequence(sequence.to_string())),
        }
    }

    pub fn is_shard_end(&self) -> bool {
        matches!(self, ShardCheckpoint::ShardEnd)
    }

    pub fn sequence_number(&self) -> Option<&str> {
        match self {
            ShardCheckpoint::Sequence(sequence) => Some(sequence),
            ShardCheckpoint::ShardEnd => None,
        }
    }
}

impl fmt::Display for ShardCheckpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trait for checkpoint storage implementations
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Retrieve the checkpoint for a given shard
    async fn get_checkpoint(&self, shard_id: &str) -> anyhow::Result<Option<ShardCheckpoint>>;

    /// Save a checkpoint for a given shard
    async fn save_checkpoint(
        &self,
        shard_id: &str,
        checkpoint: &ShardCheckpoint,
    ) -> anyhow::Result<()>;
}

/// Checkpoint handle for one shard and one target position
///
/// Handed to the shard processor with each batch; `checkpoint()` writes the
/// target into the store. Without a target (nothing read from the shard yet)
/// it succeeds without writing.
pub struct StoreCheckpointer<S: CheckpointStore + ?Sized> {
    store: Arc<S>,
    shard_id: String,
    target: Option<ShardCheckpoint>,
}

impl<S: CheckpointStore + ?Sized> StoreCheckpointer<S> {
    pub fn new(store: Arc<S>, shard_id: impl Into<String>, target: Option<ShardCheckpoint>) -> Self {
        Self {
            store,
            shard_id: shard_id.into(),
            target,
        }
    }

    pub fn target(&self) -> Option<&ShardCheckpoint> {
        self.target.as_ref()
    }
}

#[async_trait]
impl<S: CheckpointStore + ?Sized> Checkpointer for StoreCheckpointer<S> {
    async fn checkpoint(&self) -> Result<(), CheckpointError> {
        let Some(target) = &self.target else {
            debug!(shard_id = %self.shard_id, "No position to checkpoint yet");
            return Ok(());
        };

        self.store
            .save_checkpoint(&self.shard_id, target)
            .await
            .map_err(|e| CheckpointError::SaveFailed(format!("{:#}", e)))
    }
}
