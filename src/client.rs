//! Thin async interface over the Kinesis read API

use crate::model::RawRecord;
use async_trait::async_trait;
use aws_sdk_kinesis::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_kinesis::types::{Record, Shard, ShardIteratorType};
use aws_sdk_kinesis::Client;
use aws_smithy_types_convert::date_time::DateTimeExt;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, trace};

/// Classified failure of a Kinesis API call
#[derive(Debug, Clone, Error)]
pub enum KinesisClientError {
    #[error("Shard iterator expired")]
    ExpiredIterator,

    #[error("Provisioned throughput exceeded")]
    ThroughputExceeded,

    #[error("Access denied")]
    AccessDenied,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("KMS error: {0}")]
    KmsError(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("{0}")]
    Other(String),
}

impl KinesisClientError {
    /// Transient failures worth retrying with backoff
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            KinesisClientError::ThroughputExceeded
                | KinesisClientError::Timeout(_)
                | KinesisClientError::ConnectionError(_)
        )
    }
}

/// Identity and lineage of one shard
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardInfo {
    pub shard_id: String,
    pub parent_shard_id: Option<String>,
    pub adjacent_parent_shard_id: Option<String>,
}

impl ShardInfo {
    pub fn new(shard_id: impl Into<String>) -> Self {
        Self {
            shard_id: shard_id.into(),
            parent_shard_id: None,
            adjacent_parent_shard_id: None,
        }
    }

    pub fn with_parent(mut self, parent_shard_id: impl Into<String>) -> Self {
        self.parent_shard_id = Some(parent_shard_id.into());
        self
    }

    /// Parent shards that must be fully consumed before this one is read
    pub fn parents(&self) -> impl Iterator<Item = &str> {
        self.parent_shard_id
            .iter()
            .chain(self.adjacent_parent_shard_id.iter())
            .map(String::as_str)
    }
}

impl From<&Shard> for ShardInfo {
    fn from(shard: &Shard) -> Self {
        Self {
            shard_id: shard.shard_id().to_string(),
            parent_shard_id: shard.parent_shard_id().map(String::from),
            adjacent_parent_shard_id: shard.adjacent_parent_shard_id().map(String::from),
        }
    }
}

/// Where a shard iterator should start
#[derive(Debug, Clone, PartialEq)]
pub enum StartingPosition {
    TrimHorizon,
    Latest,
    AtTimestamp(DateTime<Utc>),
    AfterSequenceNumber(String),
}

/// One `GetRecords` response
#[derive(Debug, Clone, Default)]
pub struct RecordsPage {
    pub records: Vec<RawRecord>,
    /// `None` once the shard is closed and fully read
    pub next_iterator: Option<String>,
    pub millis_behind_latest: Option<i64>,
}

#[async_trait]
pub trait KinesisClientTrait: Send + Sync {
    async fn list_shards(&self, stream_name: &str) -> Result<Vec<ShardInfo>, KinesisClientError>;

    async fn get_shard_iterator(
        &self,
        stream_name: &str,
        shard_id: &str,
        position: &StartingPosition,
    ) -> Result<String, KinesisClientError>;

    async fn get_records(
        &self,
        iterator: &str,
        limit: i32,
    ) -> Result<RecordsPage, KinesisClientError>;
}

#[async_trait]
impl KinesisClientTrait for Client {
    async fn list_shards(&self, stream_name: &str) -> Result<Vec<ShardInfo>, KinesisClientError> {
        let mut shards = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            // The API rejects stream_name together with next_token.
            let request = match &next_token {
                Some(token) => self.list_shards().next_token(token),
                None => self.list_shards().stream_name(stream_name),
            };
            let response = request.send().await.map_err(classify_error)?;

            shards.extend(response.shards().iter().map(ShardInfo::from));

            match response.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => break,
            }
        }

        debug!(stream = %stream_name, shard_count = shards.len(), "Listed shards");
        Ok(shards)
    }

    async fn get_shard_iterator(
        &self,
        stream_name: &str,
        shard_id: &str,
        position: &StartingPosition,
    ) -> Result<String, KinesisClientError> {
        let mut request = self
            .get_shard_iterator()
            .stream_name(stream_name)
            .shard_id(shard_id);

        request = match position {
            StartingPosition::TrimHorizon => {
                request.shard_iterator_type(ShardIteratorType::TrimHorizon)
            }
            StartingPosition::Latest => request.shard_iterator_type(ShardIteratorType::Latest),
            StartingPosition::AtTimestamp(ts) => request
                .shard_iterator_type(ShardIteratorType::AtTimestamp)
                .timestamp(aws_smithy_types::DateTime::from_chrono_utc(*ts)),
            StartingPosition::AfterSequenceNumber(sequence) => request
                .shard_iterator_type(ShardIteratorType::AfterSequenceNumber)
                .starting_sequence_number(sequence),
        };

        let response = request.send().await.map_err(classify_error)?;
        response
            .shard_iterator()
            .map(String::from)
            .ok_or_else(|| KinesisClientError::Other("No shard iterator returned".to_string()))
    }

    async fn get_records(
        &self,
        iterator: &str,
        limit: i32,
    ) -> Result<RecordsPage, KinesisClientError> {
        let response = self
            .get_records()
            .shard_iterator(iterator)
            .limit(limit)
            .send()
            .await
            .map_err(classify_error)?;

        let records: Vec<RawRecord> = response.records().iter().map(to_raw_record).collect();
        trace!(record_count = records.len(), "Fetched records");

        Ok(RecordsPage {
            records,
            next_iterator: response.next_shard_iterator().map(String::from),
            millis_behind_latest: response.millis_behind_latest(),
        })
    }
}

fn to_raw_record(record: &Record) -> RawRecord {
    RawRecord {
        sequence_number: record.sequence_number().to_string(),
        partition_key: record.partition_key().to_string(),
        data: Bytes::copy_from_slice(record.data().as_ref()),
        approximate_arrival: record
            .approximate_arrival_timestamp()
            .and_then(|ts| ts.to_chrono_utc().ok()),
    }
}

fn classify_error<E, R>(err: SdkError<E, R>) -> KinesisClientError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let message = DisplayErrorContext(&err).to_string();

    match &err {
        SdkError::TimeoutError(_) => return KinesisClientError::Timeout(message),
        SdkError::DispatchFailure(_) => return KinesisClientError::ConnectionError(message),
        _ => {}
    }

    match err.code() {
        Some("ExpiredIteratorException") => KinesisClientError::ExpiredIterator,
        Some("ProvisionedThroughputExceededException") | Some("LimitExceededException") => {
            KinesisClientError::ThroughputExceeded
        }
        Some("AccessDeniedException") => KinesisClientError::AccessDenied,
        Some("InvalidArgumentException") => KinesisClientError::InvalidArgument(message),
        Some("ResourceNotFoundException") => KinesisClientError::ResourceNotFound(message),
        Some(code) if code.starts_with("KMS") => KinesisClientError::KmsError(message),
        _ => KinesisClientError::Other(message),
    }
}
