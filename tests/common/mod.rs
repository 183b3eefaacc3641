// tests/common/mod.rs
#![allow(dead_code)]

use async_trait::async_trait;
use kinesis_event_sink::client::RecordsPage;
use kinesis_event_sink::{
    CheckpointError, Checkpointer, Clock, EventStore, InMemoryEventStore, KinesisClientError,
    KinesisClientTrait, NormalizedEvent, PersistenceError, RawRecord, ShardInfo, StartingPosition,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use tokio::sync::Mutex;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

pub fn init_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env()
                    .add_directive("kinesis_event_sink=debug".parse().expect("valid directive"))
                    .add_directive("test=debug".parse().expect("valid directive")),
            )
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub fn record(sequence_number: &str, payload: &[u8]) -> RawRecord {
    RawRecord::new(sequence_number, "pk", payload.to_vec())
}

/// Checkpointer that counts calls and can be told to fail
#[derive(Debug, Default, Clone)]
pub struct RecordingCheckpointer {
    calls: Arc<AtomicUsize>,
    failures_remaining: Arc<AtomicUsize>,
}

impl RecordingCheckpointer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(count: usize) -> Self {
        let checkpointer = Self::default();
        checkpointer.failures_remaining.store(count, Ordering::SeqCst);
        checkpointer
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Checkpointer for RecordingCheckpointer {
    async fn checkpoint(&self) -> Result<(), CheckpointError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        {
            Ok(_) => Err(CheckpointError::SaveFailed("checkpoint table unavailable".to_string())),
            Err(_) => Ok(()),
        }
    }
}

/// In-memory store that rejects events with selected ids
#[derive(Debug, Default, Clone)]
pub struct FlakyEventStore {
    inner: InMemoryEventStore,
    failing_ids: Arc<Mutex<HashSet<String>>>,
    attempts: Arc<Mutex<Vec<String>>>,
}

impl FlakyEventStore {
    pub fn failing_for(ids: &[&str]) -> Self {
        Self {
            failing_ids: Arc::new(Mutex::new(ids.iter().map(|id| id.to_string()).collect())),
            ..Self::default()
        }
    }

    pub fn inner(&self) -> &InMemoryEventStore {
        &self.inner
    }

    pub async fn attempts(&self) -> Vec<String> {
        self.attempts.lock().await.clone()
    }
}

#[async_trait]
impl EventStore for FlakyEventStore {
    async fn save_event(&self, event: &NormalizedEvent) -> Result<(), PersistenceError> {
        self.attempts.lock().await.push(event.id.clone());
        if self.failing_ids.lock().await.contains(&event.id) {
            return Err(PersistenceError::SaveFailed {
                id: event.id.clone(),
                occurred_at: event.occurred_at,
                reason: "conditional check failed".to_string(),
            });
        }
        self.inner.save_event(event).await
    }

    async fn get_event(
        &self,
        id: &str,
        occurred_at: i64,
    ) -> Result<Option<NormalizedEvent>, PersistenceError> {
        self.inner.get_event(id, occurred_at).await
    }
}

/// Clock frozen at one instant
#[derive(Debug, Clone, Copy)]
pub struct FrozenClock(pub i64);

impl Clock for FrozenClock {
    fn now_millis(&self) -> i64 {
        self.0
    }
}

/// Stream client serving scripted pages for a fixed set of shards
#[derive(Debug, Default, Clone)]
pub struct ScriptedStream {
    shards: Vec<ShardInfo>,
    pages: Arc<Mutex<HashMap<String, RecordsPage>>>,
}

impl ScriptedStream {
    pub fn new(shards: Vec<ShardInfo>) -> Self {
        Self {
            shards,
            ..Self::default()
        }
    }

    /// Serve `records` at `iterator`, continuing at `next` (None closes the shard)
    pub async fn page(&self, iterator: &str, records: Vec<RawRecord>, next: Option<&str>) {
        self.pages.lock().await.insert(
            iterator.to_string(),
            RecordsPage {
                records,
                next_iterator: next.map(String::from),
                millis_behind_latest: None,
            },
        );
    }
}

#[async_trait]
impl KinesisClientTrait for ScriptedStream {
    async fn list_shards(&self, _stream_name: &str) -> Result<Vec<ShardInfo>, KinesisClientError> {
        Ok(self.shards.clone())
    }

    async fn get_shard_iterator(
        &self,
        _stream_name: &str,
        shard_id: &str,
        position: &StartingPosition,
    ) -> Result<String, KinesisClientError> {
        Ok(match position {
            StartingPosition::AfterSequenceNumber(sequence) => format!("{}@{}", shard_id, sequence),
            _ => format!("{}@start", shard_id),
        })
    }

    async fn get_records(
        &self,
        iterator: &str,
        _limit: i32,
    ) -> Result<RecordsPage, KinesisClientError> {
        Ok(self
            .pages
            .lock()
            .await
            .get(iterator)
            .cloned()
            .unwrap_or_else(|| RecordsPage {
                records: Vec::new(),
                next_iterator: Some(iterator.to_string()),
                millis_behind_latest: None,
            }))
    }
}
