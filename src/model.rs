//! Data types that flow through the pipeline

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Classification used when a record carries no usable `eventType`
pub const DEFAULT_EVENT_TYPE: &str = "KINESIS_EVENT";

/// Status stamped on every event produced by the transformer
pub const STATUS_PROCESSED: &str = "PROCESSED";

/// Canonical persisted representation of one stream record
///
/// Keyed by `(id, occurred_at)`. Instances are never mutated after
/// construction; writing the same key again replaces the whole item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    pub id: String,
    #[serde(rename = "eventType")]
    pub event_type: String,
    #[serde(rename = "data")]
    pub payload: String,
    #[serde(rename = "timestamp")]
    pub occurred_at: i64,
    pub status: String,
}

impl NormalizedEvent {
    pub fn key(&self) -> EventKey {
        EventKey {
            id: self.id.clone(),
            occurred_at: self.occurred_at,
        }
    }
}

/// Composite persistence key of a [`NormalizedEvent`]
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventKey {
    pub id: String,
    pub occurred_at: i64,
}

impl EventKey {
    pub fn new(id: impl Into<String>, occurred_at: i64) -> Self {
        Self {
            id: id.into(),
            occurred_at,
        }
    }
}

/// A record as delivered by the stream, before normalization
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub sequence_number: String,
    pub partition_key: String,
    pub data: Bytes,
    pub approximate_arrival: Option<DateTime<Utc>>,
}

impl RawRecord {
    pub fn new(
        sequence_number: impl Into<String>,
        partition_key: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            sequence_number: sequence_number.into(),
            partition_key: partition_key.into(),
            data: data.into(),
            approximate_arrival: None,
        }
    }
}
