use crate::persistence::dynamodb::{classify_error, retry_transient, DynamoCallError};
use crate::retry::RetryConfig;
use crate::store::{CheckpointStore, ShardCheckpoint};
use async_trait::async_trait;
use aws_sdk_dynamodb::{types::AttributeValue, Client as DynamoClient};
use tracing::{debug, instrument, trace};

const SHARD_ID_ATTR: &str = "shard_id";
const CHECKPOINT_ATTR: &str = "checkpoint";
const UPDATED_AT_ATTR: &str = "updated_at";

/// Checkpoints kept in a DynamoDB table keyed by `shard_id`
#[derive(Debug, Clone)]
pub struct DynamoDbCheckpointStore {
    client: DynamoClient,
    table_name: String,
    key_prefix: String,
    retry_config: RetryConfig,
}

impl DynamoDbCheckpointStore {
    pub fn builder() -> DynamoDbCheckpointStoreBuilder {
        DynamoDbCheckpointStoreBuilder::new()
    }

    fn prefixed_key(&self, shard_id: &str) -> String {
        format!("{}{}", self.key_prefix, shard_id)
    }
}

#[async_trait]
impl CheckpointStore for DynamoDbCheckpointStore {
    #[instrument(skip(self), fields(table = %self.table_name, prefix = %self.key_prefix))]
    async fn get_checkpoint(&self, shard_id: &str) -> anyhow::Result<Option<ShardCheckpoint>> {
        let key = self.prefixed_key(shard_id);
        let stored = retry_transient(&self.retry_config, || async {
            let response = self
                .client
                .get_item()
                .table_name(&self.table_name)
                .key(SHARD_ID_ATTR, AttributeValue::S(key.clone()))
                .consistent_read(true)
                .send()
                .await
                .map_err(|e| classify_error("GetItem checkpoint", e))?;

            let value = response
                .item
                .and_then(|item| item.get(CHECKPOINT_ATTR).cloned())
                .and_then(|attr| attr.as_s().ok().cloned());

            Ok::<Option<String>, DynamoCallError>(value)
        })
        .await
        .map_err(|e| anyhow::anyhow!("Failed to get checkpoint from DynamoDB: {}", e))?;

        let checkpoint = stored
            .as_deref()
            .map(ShardCheckpoint::parse)
            .transpose()?;

        debug!(
            shard_id = %shard_id,
            key = %key,
            checkpoint = ?checkpoint,
            "Retrieved checkpoint from DynamoDB"
        );

        Ok(checkpoint)
    }

    #[instrument(skip(self), fields(table = %self.table_name, prefix = %self.key_prefix))]
    async fn save_checkpoint(
        &self,
        shard_id: &str,
        checkpoint: &ShardCheckpoint,
    ) -> anyhow::Result<()> {
        let key = self.prefixed_key(shard_id);
        trace!(
            shard_id = %shard_id,
            key = %key,
            checkpoint = %checkpoint,
            "Saving checkpoint to DynamoDB"
        );

        retry_transient(&self.retry_config, || async {
            self.client
                .put_item()
                .table_name(&self.table_name)
                .item(SHARD_ID_ATTR, AttributeValue::S(key.clone()))
                .item(CHECKPOINT_ATTR, AttributeValue::S(checkpoint.to_string()))
                .item(
                    UPDATED_AT_ATTR,
                    AttributeValue::S(chrono::Utc::now().to_rfc3339()),
                )
                .send()
                .await
                .map_err(|e| classify_error("PutItem checkpoint", e))?;

            Ok::<(), DynamoCallError>(())
        })
        .await
        .map_err(|e| anyhow::anyhow!("Failed to save checkpoint to DynamoDB: {}", e))?;

        debug!(
            shard_id = %shard_id,
            key = %key,
            checkpoint = %checkpoint,
            "Successfully saved checkpoint to DynamoDB"
        );

        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct DynamoDbCheckpointStoreBuilder {
    client: Option<DynamoClient>,
    table_name: Option<String>,
    key_prefix: Option<String>,
    retry_config: RetryConfig,
}

impl DynamoDbCheckpointStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(mut self, client: DynamoClient) -> Self {
        self.client = Some(client);
        self
    }

    pub fn with_table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = Some(table_name.into());
        self
    }

    pub fn with_key_prefix(mut self, key_prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(key_prefix.into());
        self
    }

    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    pub fn build(self) -> anyhow::Result<DynamoDbCheckpointStore> {
        Ok(DynamoDbCheckpointStore {
            client: self
                .client
                .ok_or_else(|| anyhow::anyhow!("DynamoDB client is required"))?,
            table_name: self
                .table_name
                .filter(|name| !name.is_empty())
                .ok_or_else(|| anyhow::anyhow!("Table name is required"))?,
            key_prefix: self.key_prefix.unwrap_or_default(),
            retry_config: self.retry_config,
        })
    }
}
