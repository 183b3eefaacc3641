//! Conversion of raw record payloads into [`NormalizedEvent`]s

use crate::error::TransformError;
use crate::model::{NormalizedEvent, DEFAULT_EVENT_TYPE, STATUS_PROCESSED};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};
use uuid::Uuid;

const ID_FIELD: &str = "id";
const EVENT_TYPE_FIELD: &str = "eventType";

/// Source of processing timestamps
pub trait Clock: Send + Sync {
    /// Current time in epoch milliseconds
    fn now_millis(&self) -> i64;
}

/// Wall clock backed by `chrono::Utc`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Turns raw payload bytes into normalized events.
///
/// `transform` is total: payloads that are not JSON objects still produce an
/// event, with a generated id and the default event type.
#[derive(Clone)]
pub struct RecordTransformer {
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for RecordTransformer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordTransformer").finish_non_exhaustive()
    }
}

impl Default for RecordTransformer {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordTransformer {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    pub fn transform(&self, raw_payload: &[u8]) -> NormalizedEvent {
        let payload = String::from_utf8_lossy(raw_payload).into_owned();

        let (id, event_type) = match parse_fields(raw_payload) {
            Ok(fields) => (
                text_field(&fields, ID_FIELD).unwrap_or_else(generate_id),
                text_field(&fields, EVENT_TYPE_FIELD)
                    .unwrap_or_else(|| DEFAULT_EVENT_TYPE.to_string()),
            ),
            Err(e) => {
                debug!(error = %e, "Payload not structured, using fallback event");
                (generate_id(), DEFAULT_EVENT_TYPE.to_string())
            }
        };

        let event = NormalizedEvent {
            id,
            event_type,
            payload,
            occurred_at: self.clock.now_millis(),
            status: STATUS_PROCESSED.to_string(),
        };

        trace!(
            id = %event.id,
            event_type = %event.event_type,
            occurred_at = event.occurred_at,
            "Transformed record"
        );

        event
    }
}

fn parse_fields(raw_payload: &[u8]) -> Result<Map<String, Value>, TransformError> {
    match serde_json::from_slice::<Value>(raw_payload)? {
        Value::Object(fields) => Ok(fields),
        Value::Array(_) => Err(TransformError::UnexpectedShape("array")),
        Value::String(_) => Err(TransformError::UnexpectedShape("string")),
        Value::Number(_) => Err(TransformError::UnexpectedShape("number")),
        Value::Bool(_) => Err(TransformError::UnexpectedShape("boolean")),
        Value::Null => Err(TransformError::UnexpectedShape("null")),
    }
}

/// Scalar field rendered as text; empty, null and nested values count as absent.
fn text_field(fields: &Map<String, Value>, name: &str) -> Option<String> {
    let text = match fields.get(name)? {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null | Value::Array(_) | Value::Object(_) => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn generate_id() -> String {
    Uuid::new_v4().to_string()
}
