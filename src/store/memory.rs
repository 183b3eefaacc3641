use crate::store::{CheckpointStore, ShardCheckpoint};
use async_trait::async_trait;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::RwLock;
use tracing::{debug, instrument, trace};

/// In-memory implementation of checkpoint storage
#[derive(Debug, Default, Clone)]
pub struct InMemoryCheckpointStore {
    checkpoints: Arc<RwLock<HashMap<String, ShardCheckpoint>>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        debug!("Initializing in-memory checkpoint store");
        Self::default()
    }

    /// Snapshot of every stored checkpoint
    pub async fn get_all_checkpoints(&self) -> HashMap<String, ShardCheckpoint> {
        self.checkpoints.read().await.clone()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    #[instrument(skip(self))]
    async fn get_checkpoint(&self, shard_id: &str) -> anyhow::Result<Option<ShardCheckpoint>> {
        let checkpoint = self.checkpoints.read().await.get(shard_id).cloned();

        trace!(
            shard_id = %shard_id,
            checkpoint = ?checkpoint,
            "Retrieved checkpoint from memory"
        );

        Ok(checkpoint)
    }

    #[instrument(skip(self))]
    async fn save_checkpoint(
        &self,
        shard_id: &str,
        checkpoint: &ShardCheckpoint,
    ) -> anyhow::Result<()> {
        self.checkpoints
            .write()
            .await
            .insert(shard_id.to_string(), checkpoint.clone());

        debug!(
            shard_id = %shard_id,
            checkpoint = %checkpoint,
            "Checkpoint saved to memory"
        );

        Ok(())
    }
}
