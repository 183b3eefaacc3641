use crate::error::PersistenceError;
use crate::model::NormalizedEvent;
use crate::persistence::EventStore;
use crate::retry::{RetryConfig, RetryError, RetryHandle};
use async_trait::async_trait;
use aws_sdk_dynamodb::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_dynamodb::{types::AttributeValue, Client as DynamoClient};
use std::collections::HashMap;
use std::future::Future;
use thiserror::Error;
use tracing::{debug, instrument, trace, warn};

/// Partition key
pub const ID_ATTR: &str = "id";
/// Sort key, epoch milliseconds
pub const TIMESTAMP_ATTR: &str = "timestamp";
pub const EVENT_TYPE_ATTR: &str = "eventType";
pub const DATA_ATTR: &str = "data";
pub const STATUS_ATTR: &str = "status";

/// Failure of a single DynamoDB call
#[derive(Debug, Clone, Error)]
pub enum DynamoCallError {
    #[error("{0}")]
    Transient(String),

    #[error("{0}")]
    Permanent(String),
}

impl DynamoCallError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, DynamoCallError::Transient(_))
    }
}

/// Error codes worth another attempt
fn is_transient_code(code: &str) -> bool {
    matches!(
        code,
        "ProvisionedThroughputExceededException"
            | "ThrottlingException"
            | "RequestLimitExceeded"
            | "InternalServerError"
    )
}

pub(crate) fn classify_error<E, R>(operation: &str, err: SdkError<E, R>) -> DynamoCallError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let message = format!("{} failed: {}", operation, DisplayErrorContext(&err));

    let transient = match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => true,
        _ => err.code().is_some_and(is_transient_code),
    };

    if transient {
        DynamoCallError::Transient(message)
    } else {
        DynamoCallError::Permanent(message)
    }
}

/// Retries only transient DynamoDB failures
pub(crate) async fn retry_transient<F, Fut, T>(
    config: &RetryConfig,
    operation: F,
) -> Result<T, RetryError<DynamoCallError>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DynamoCallError>>,
{
    let result = RetryHandle::new(config.clone())
        .retry_if(operation, DynamoCallError::is_retryable)
        .await;

    if let Err(RetryError::Permanent(e)) = &result {
        warn!(error = %e, "DynamoDB call failed permanently, not retrying");
    }
    result
}

/// Normalized events stored one item per `(id, timestamp)`
#[derive(Debug, Clone)]
pub struct DynamoDbEventStore {
    client: DynamoClient,
    table_name: String,
    retry_config: RetryConfig,
}

impl DynamoDbEventStore {
    pub fn builder() -> DynamoDbEventStoreBuilder {
        DynamoDbEventStoreBuilder::new()
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }
}

#[async_trait]
impl EventStore for DynamoDbEventStore {
    #[instrument(
        skip(self, event),
        fields(table = %self.table_name, id = %event.id, occurred_at = event.occurred_at)
    )]
    async fn save_event(&self, event: &NormalizedEvent) -> Result<(), PersistenceError> {
        let item = to_item(event);

        retry_transient(&self.retry_config, || async {
            self.client
                .put_item()
                .table_name(&self.table_name)
                .set_item(Some(item.clone()))
                .send()
                .await
                .map_err(|e| classify_error("PutItem", e))?;

            Ok::<(), DynamoCallError>(())
        })
        .await
            .map_err(|e| PersistenceError::SaveFailed {
                id: event.id.clone(),
                occurred_at: event.occurred_at,
                reason: e.to_string(),
            })?;

        debug!("Successfully saved event to DynamoDB");
        Ok(())
    }

    #[instrument(skip(self), fields(table = %self.table_name))]
    async fn get_event(
        &self,
        id: &str,
        occurred_at: i64,
    ) -> Result<Option<NormalizedEvent>, PersistenceError> {
        let item = retry_transient(&self.retry_config, || async {
            let response = self
                .client
                .get_item()
                .table_name(&self.table_name)
                .key(ID_ATTR, AttributeValue::S(id.to_string()))
                .key(TIMESTAMP_ATTR, AttributeValue::N(occurred_at.to_string()))
                .send()
                .await
                .map_err(|e| classify_error("GetItem", e))?;

            Ok::<_, DynamoCallError>(response.item)
        })
        .await
            .map_err(|e| PersistenceError::RetrieveFailed {
                id: id.to_string(),
                occurred_at,
                reason: e.to_string(),
            })?;

        trace!(found = item.is_some(), "Looked up event in DynamoDB");
        item.as_ref().map(from_item).transpose()
    }
}

pub(crate) fn to_item(event: &NormalizedEvent) -> HashMap<String, AttributeValue> {
    HashMap::from([
        (ID_ATTR.to_string(), AttributeValue::S(event.id.clone())),
        (
            TIMESTAMP_ATTR.to_string(),
            AttributeValue::N(event.occurred_at.to_string()),
        ),
        (
            EVENT_TYPE_ATTR.to_string(),
            AttributeValue::S(event.event_type.clone()),
        ),
        (DATA_ATTR.to_string(), AttributeValue::S(event.payload.clone())),
        (STATUS_ATTR.to_string(), AttributeValue::S(event.status.clone())),
    ])
}

pub(crate) fn from_item(
    item: &HashMap<String, AttributeValue>,
) -> Result<NormalizedEvent, PersistenceError> {
    let text = |name: &str| -> Result<String, PersistenceError> {
        item.get(name)
            .and_then(|attr| attr.as_s().ok())
            .cloned()
            .ok_or_else(|| PersistenceError::InvalidItem(format!("missing string attribute {}", name)))
    };

    let occurred_at = item
        .get(TIMESTAMP_ATTR)
        .and_then(|attr| attr.as_n().ok())
        .ok_or_else(|| {
            PersistenceError::InvalidItem(format!("missing number attribute {}", TIMESTAMP_ATTR))
        })?
        .parse::<i64>()
        .map_err(|e| PersistenceError::InvalidItem(format!("bad {}: {}", TIMESTAMP_ATTR, e)))?;

    Ok(NormalizedEvent {
        id: text(ID_ATTR)?,
        event_type: text(EVENT_TYPE_ATTR)?,
        payload: text(DATA_ATTR)?,
        occurred_at,
        status: text(STATUS_ATTR)?,
    })
}

#[derive(Debug, Default)]
pub struct DynamoDbEventStoreBuilder {
    client: Option<DynamoClient>,
    table_name: Option<String>,
    retry_config: RetryConfig,
}

impl DynamoDbEventStoreBuilder {
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

    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    pub fn build(self) -> anyhow::Result<DynamoDbEventStore> {
        Ok(DynamoDbEventStore {
            client: self
                .client
                .ok_or_else(|| anyhow::anyhow!("DynamoDB client is required"))?,
            table_name: self
                .table_name
                .filter(|name| !name.is_empty())
                .ok_or_else(|| anyhow::anyhow!("Table name is required"))?,
            retry_config: self.retry_config,
        })
    }
}
