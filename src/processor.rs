//! Per-shard record processing
//!
//! This module defines the lifecycle interface a coordination layer drives
//! for each shard it owns, and [`EventShardProcessor`], the implementation
//! that normalizes each record, persists it and checkpoints once per batch.
//!
//! Failure policy:
//!
//! - a record that cannot be persisted is logged and skipped; the batch
//!   carries on with the next record
//! - a failed checkpoint is logged and not retried; the next batch (or a
//!   restart from the previous checkpoint) covers it, so delivery is
//!   at-least-once
//! - lifecycle calls made in the wrong state are rejected with
//!   [`ProcessorError::InvalidLifecycleCall`] and have no side effects

use crate::error::{CheckpointError, PersistenceError, ProcessorError, Result};
use crate::model::{NormalizedEvent, RawRecord};
use crate::monitoring::{CheckpointReason, LifecycleEventType, ProcessingEvent};
use crate::persistence::EventStore;
use crate::transform::RecordTransformer;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

/// Capability to record progress through a shard
///
/// Supplied by the coordination layer with every batch and with the
/// terminal `shard_ended` / `shutdown_requested` calls.
#[async_trait]
pub trait Checkpointer: Send + Sync {
    /// Mark every record delivered so far as durably handled
    async fn checkpoint(&self) -> std::result::Result<(), CheckpointError>;
}

/// Lifecycle a coordination layer drives for one shard
///
/// Calls for a single instance are strictly sequential, hence `&mut self`.
///
/// # Examples
///
/// ```rust
/// use kinesis_event_sink::{
///     Checkpointer, CheckpointError, EventShardProcessor, InMemoryEventStore,
///     RawRecord, ShardRecordProcessor,
/// };
/// use std::sync::Arc;
///
/// struct NoopCheckpointer;
///
/// #[async_trait::async_trait]
/// impl Checkpointer for NoopCheckpointer {
///     async fn checkpoint(&self) -> Result<(), CheckpointError> {
///         Ok(())
///     }
/// }
///
/// # tokio_test::block_on(async {
/// let store = Arc::new(InMemoryEventStore::new());
/// let mut processor = EventShardProcessor::new(store.clone());
///
/// processor.initialize("shardId-000000000000").await?;
/// let records = vec![RawRecord::new("1", "pk", &br#"{"id":"a1","eventType":"CLICK"}"#[..])];
/// let outcome = processor.process_batch(&records, &NoopCheckpointer).await?;
///
/// assert_eq!(outcome.persisted, 1);
/// assert!(outcome.checkpointed);
/// # Ok::<(), kinesis_event_sink::ProcessorError>(())
/// # }).unwrap();
/// ```
#[async_trait]
pub trait ShardRecordProcessor: Send {
    /// Bind the instance to a shard; must precede everything else
    async fn initialize(&mut self, shard_id: &str) -> Result<()>;

    /// Handle one ordered batch, then checkpoint exactly once
    async fn process_batch(
        &mut self,
        records: &[RawRecord],
        checkpointer: &dyn Checkpointer,
    ) -> Result<BatchOutcome>;

    /// Ownership of the shard was revoked; no checkpoint may follow
    async fn lease_lost(&mut self) -> Result<()>;

    /// The shard is closed and fully read; checkpoint its end
    async fn shard_ended(&mut self, checkpointer: &dyn Checkpointer) -> Result<()>;

    /// The worker is stopping; checkpoint current progress
    async fn shutdown_requested(&mut self, checkpointer: &dyn Checkpointer) -> Result<()>;
}

/// Why a processor stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    LeaseLost,
    ShardEnded,
    ShutdownRequested,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    Created,
    Initialized,
    Active,
    Terminated(TerminationReason),
}

impl ProcessorState {
    fn accepts_work(self) -> bool {
        matches!(self, ProcessorState::Initialized | ProcessorState::Active)
    }
}

impl fmt::Display for ProcessorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessorState::Created => f.write_str("created"),
            ProcessorState::Initialized => f.write_str("initialized"),
            ProcessorState::Active => f.write_str("active"),
            ProcessorState::Terminated(TerminationReason::LeaseLost) => {
                f.write_str("terminated (lease lost)")
            }
            ProcessorState::Terminated(TerminationReason::ShardEnded) => {
                f.write_str("terminated (shard ended)")
            }
            ProcessorState::Terminated(TerminationReason::ShutdownRequested) => {
                f.write_str("terminated (shutdown requested)")
            }
        }
    }
}

/// Result of one `process_batch` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub persisted: usize,
    pub failed: usize,
    pub checkpointed: bool,
}

/// Counters private to one processor instance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShardStats {
    pub batches: u64,
    pub records_persisted: u64,
    pub records_failed: u64,
    pub checkpoint_failures: u64,
}

/// Shard processor that persists every record as a [`NormalizedEvent`]
pub struct EventShardProcessor<S: EventStore + ?Sized> {
    store: Arc<S>,
    transformer: RecordTransformer,
    monitoring_tx: Option<mpsc::Sender<ProcessingEvent>>,
    shard_id: Option<String>,
    state: ProcessorState,
    stats: ShardStats,
}

impl<S: EventStore + ?Sized> EventShardProcessor<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self::with_parts(store, RecordTransformer::new(), None)
    }

    pub(crate) fn with_parts(
        store: Arc<S>,
        transformer: RecordTransformer,
        monitoring_tx: Option<mpsc::Sender<ProcessingEvent>>,
    ) -> Self {
        Self {
            store,
            transformer,
            monitoring_tx,
            shard_id: None,
            state: ProcessorState::Created,
            stats: ShardStats::default(),
        }
    }

    pub fn shard_id(&self) -> Option<&str> {
        self.shard_id.as_deref()
    }

    pub fn state(&self) -> ProcessorState {
        self.state
    }

    pub fn stats(&self) -> ShardStats {
        self.stats
    }

    fn shard_label(&self) -> String {
        self.shard_id.clone().unwrap_or_default()
    }

    fn ensure_accepts_work(&self, operation: &'static str) -> Result<()> {
        if self.state.accepts_work() {
            Ok(())
        } else {
            warn!(
                shard_id = %self.shard_label(),
                state = %self.state,
                operation = operation,
                "Rejected lifecycle call"
            );
            Err(ProcessorError::InvalidLifecycleCall {
                operation,
                state: self.state.to_string(),
            })
        }
    }

    async fn send_monitoring_event(&self, event: ProcessingEvent) {
        if let Some(tx) = &self.monitoring_tx {
            if let Err(e) = tx.send(event).await {
                warn!(error = %e, "Failed to send monitoring event");
            }
        }
    }

    async fn process_record(
        &self,
        record: &RawRecord,
    ) -> std::result::Result<NormalizedEvent, PersistenceError> {
        let event = self.transformer.transform(&record.data);
        self.store.save_event(&event).await?;
        Ok(event)
    }

    /// Issue one checkpoint; failures are reported, never propagated.
    async fn checkpoint(
        &mut self,
        checkpointer: &dyn Checkpointer,
        reason: CheckpointReason,
    ) -> bool {
        let shard_id = self.shard_label();

        let (success, error) = match checkpointer.checkpoint().await {
            Ok(()) => {
                debug!(shard_id = %shard_id, reason = %reason, "Checkpoint successful");
                (true, None)
            }
            Err(e) => {
                self.stats.checkpoint_failures += 1;
                error!(
                    shard_id = %shard_id,
                    reason = %reason,
                    error = %e,
                    "Checkpoint failed"
                );
                (false, Some(e.to_string()))
            }
        };

        self.send_monitoring_event(ProcessingEvent::checkpoint(shard_id, reason, success, error))
            .await;
        success
    }

    async fn terminate(&mut self, reason: TerminationReason) {
        self.state = ProcessorState::Terminated(reason);
        let event_type = match reason {
            TerminationReason::LeaseLost => LifecycleEventType::LeaseLost,
            TerminationReason::ShardEnded => LifecycleEventType::ShardEnded,
            TerminationReason::ShutdownRequested => LifecycleEventType::ShutdownRequested,
        };
        self.send_monitoring_event(ProcessingEvent::lifecycle(self.shard_label(), event_type))
            .await;
    }
}

#[async_trait]
impl<S: EventStore + ?Sized + 'static> ShardRecordProcessor for EventShardProcessor<S> {
    async fn initialize(&mut self, shard_id: &str) -> Result<()> {
        if self.state != ProcessorState::Created {
            return Err(ProcessorError::InvalidLifecycleCall {
                operation: "initialize",
                state: self.state.to_string(),
            });
        }

        self.shard_id = Some(shard_id.to_string());
        self.state = ProcessorState::Initialized;
        info!(shard_id = %shard_id, "Initializing record processor");

        self.send_monitoring_event(ProcessingEvent::lifecycle(
            shard_id.to_string(),
            LifecycleEventType::Initialized,
        ))
        .await;
        Ok(())
    }

    async fn process_batch(
        &mut self,
        records: &[RawRecord],
        checkpointer: &dyn Checkpointer,
    ) -> Result<BatchOutcome> {
        self.ensure_accepts_work("process batch")?;
        self.state = ProcessorState::Active;

        let shard_id = self.shard_label();
        let batch_start = Instant::now();
        let mut outcome = BatchOutcome::default();

        debug!(
            shard_id = %shard_id,
            record_count = records.len(),
            "Processing batch"
        );

        for record in records {
            match self.process_record(record).await {
                Ok(event) => {
                    outcome.persisted += 1;
                    trace!(
                        shard_id = %shard_id,
                        sequence = %record.sequence_number,
                        event_id = %event.id,
                        "Record persisted"
                    );
                    self.send_monitoring_event(ProcessingEvent::record_persisted(
                        shard_id.clone(),
                        record.sequence_number.clone(),
                        event.id,
                        event.occurred_at,
                    ))
                    .await;
                }
                Err(e) => {
                    outcome.failed += 1;
                    error!(
                        shard_id = %shard_id,
                        sequence = %record.sequence_number,
                        partition_key = %record.partition_key,
                        error = %e,
                        "Error processing record"
                    );
                    self.send_monitoring_event(ProcessingEvent::record_failed(
                        shard_id.clone(),
                        record.sequence_number.clone(),
                        e.to_string(),
                    ))
                    .await;
                }
            }
        }

        self.stats.batches += 1;
        self.stats.records_persisted += outcome.persisted as u64;
        self.stats.records_failed += outcome.failed as u64;

        self.send_monitoring_event(ProcessingEvent::batch_complete(
            shard_id.clone(),
            outcome.persisted,
            outcome.failed,
            batch_start.elapsed(),
        ))
        .await;

        outcome.checkpointed = self
            .checkpoint(checkpointer, CheckpointReason::BatchComplete)
            .await;

        debug!(
            shard_id = %shard_id,
            persisted = outcome.persisted,
            failed = outcome.failed,
            checkpointed = outcome.checkpointed,
            "Batch complete"
        );

        Ok(outcome)
    }

    async fn lease_lost(&mut self) -> Result<()> {
        self.ensure_accepts_work("handle lease loss")?;
        warn!(shard_id = %self.shard_label(), "Lease lost for shard");
        self.terminate(TerminationReason::LeaseLost).await;
        Ok(())
    }

    async fn shard_ended(&mut self, checkpointer: &dyn Checkpointer) -> Result<()> {
        self.ensure_accepts_work("end shard")?;
        info!(shard_id = %self.shard_label(), "Shard ended");
        self.checkpoint(checkpointer, CheckpointReason::ShardEnded)
            .await;
        self.terminate(TerminationReason::ShardEnded).await;
        Ok(())
    }

    async fn shutdown_requested(&mut self, checkpointer: &dyn Checkpointer) -> Result<()> {
        self.ensure_accepts_work("shut down")?;
        info!(shard_id = %self.shard_label(), "Shutdown requested for shard");
        self.checkpoint(checkpointer, CheckpointReason::ShutdownRequested)
            .await;
        self.terminate(TerminationReason::ShutdownRequested).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DEFAULT_EVENT_TYPE, STATUS_PROCESSED};
    use crate::monitoring::ProcessingEventType;
    use crate::persistence::InMemoryEventStore;
    use crate::test::mocks::{MockCheckpointer, MockEventStore};
    use crate::test::TestUtils;
    use pretty_assertions::assert_eq;

    async fn initialized<S: EventStore + 'static>(store: Arc<S>) -> EventShardProcessor<S> {
        let mut processor = EventShardProcessor::new(store);
        processor
            .initialize("shard-1")
            .await
            .expect("fresh processor initializes");
        processor
    }

    #[tokio::test]
    async fn test_end_to_end_batch() -> anyhow::Result<()> {
        let store = Arc::new(InMemoryEventStore::new());
        let checkpointer = MockCheckpointer::new();
        let mut processor = initialized(store.clone()).await;

        let records = vec![
            TestUtils::create_test_record("1", br#"{"id":"a1","eventType":"CLICK"}"#),
            TestUtils::create_test_record("2", b"not json"),
        ];
        let outcome = processor.process_batch(&records, &checkpointer).await?;

        assert_eq!(
            outcome,
            BatchOutcome {
                persisted: 2,
                failed: 0,
                checkpointed: true
            }
        );
        assert_eq!(checkpointer.checkpoint_count(), 1);

        let events = store.events().await;
        assert_eq!(events.len(), 2);

        let clicked = events.iter().find(|e| e.id == "a1").expect("a1 stored");
        assert_eq!(clicked.event_type, "CLICK");
        assert_eq!(clicked.status, STATUS_PROCESSED);

        let fallback = events.iter().find(|e| e.id != "a1").expect("fallback stored");
        assert!(!fallback.id.is_empty());
        assert_eq!(fallback.event_type, DEFAULT_EVENT_TYPE);
        assert_eq!(fallback.payload, "not json");
        assert_eq!(fallback.status, STATUS_PROCESSED);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_save_does_not_abort_batch() -> anyhow::Result<()> {
        let store = Arc::new(MockEventStore::new());
        store.fail_saves_for_id("r2");
        let checkpointer = MockCheckpointer::new();
        let mut processor = initialized(store.clone()).await;

        let records: Vec<RawRecord> = (1..=4)
            .map(|i| {
                TestUtils::create_test_record(&i.to_string(), format!(r#"{{"id":"r{}"}}"#, i).as_bytes())
            })
            .collect();
        let outcome = processor.process_batch(&records, &checkpointer).await?;

        assert_eq!(outcome.persisted, 3);
        assert_eq!(outcome.failed, 1);
        assert!(outcome.checkpointed);
        assert_eq!(
            store.save_attempt_ids(),
            vec!["r1", "r2", "r3", "r4"],
            "records are attempted in order, including those after the failure"
        );
        assert_eq!(checkpointer.checkpoint_count(), 1);
        assert_eq!(processor.stats().records_failed, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_batch_still_checkpoints() -> anyhow::Result<()> {
        let store = Arc::new(MockEventStore::new());
        let checkpointer = MockCheckpointer::new();
        let mut processor = initialized(store.clone()).await;

        let outcome = processor.process_batch(&[], &checkpointer).await?;

        assert_eq!(outcome.persisted + outcome.failed, 0);
        assert_eq!(checkpointer.checkpoint_count(), 1);
        assert!(store.save_attempt_ids().is_empty());
        assert_eq!(store.get_count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_checkpoint_failure_is_contained() -> anyhow::Result<()> {
        let store = Arc::new(InMemoryEventStore::new());
        let checkpointer = MockCheckpointer::new();
        checkpointer.fail_next(1);
        let mut processor = initialized(store.clone()).await;

        let batch = vec![TestUtils::create_test_record("1", br#"{"id":"x"}"#)];
        let first = processor.process_batch(&batch, &checkpointer).await?;
        assert!(!first.checkpointed);
        assert_eq!(first.persisted, 1);

        // Still running, and the next batch checkpoints again.
        let second = processor.process_batch(&batch, &checkpointer).await?;
        assert!(second.checkpointed);
        assert_eq!(checkpointer.checkpoint_count(), 2);
        assert_eq!(processor.state(), ProcessorState::Active);
        assert_eq!(processor.stats().checkpoint_failures, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_no_checkpoint_after_lease_lost() -> anyhow::Result<()> {
        let store = Arc::new(MockEventStore::new());
        let checkpointer = MockCheckpointer::new();
        let mut processor = initialized(store.clone()).await;

        processor.lease_lost().await?;
        assert_eq!(
            processor.state(),
            ProcessorState::Terminated(TerminationReason::LeaseLost)
        );

        let batch = vec![TestUtils::create_test_record("1", b"{}")];
        assert!(matches!(
            processor.process_batch(&batch, &checkpointer).await,
            Err(ProcessorError::InvalidLifecycleCall { .. })
        ));
        assert!(processor.shard_ended(&checkpointer).await.is_err());
        assert!(processor.shutdown_requested(&checkpointer).await.is_err());
        assert!(processor.lease_lost().await.is_err());

        assert_eq!(checkpointer.checkpoint_count(), 0);
        assert!(store.save_attempt_ids().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_shard_ended_checkpoints_and_terminates() -> anyhow::Result<()> {
        let checkpointer = MockCheckpointer::new();
        let mut processor = initialized(Arc::new(InMemoryEventStore::new())).await;

        processor.shard_ended(&checkpointer).await?;

        assert_eq!(checkpointer.checkpoint_count(), 1);
        assert_eq!(
            processor.state(),
            ProcessorState::Terminated(TerminationReason::ShardEnded)
        );
        assert!(processor.process_batch(&[], &checkpointer).await.is_err());
        assert_eq!(checkpointer.checkpoint_count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_shutdown_checkpoint_failure_still_terminates() -> anyhow::Result<()> {
        let checkpointer = MockCheckpointer::new();
        checkpointer.fail_next(1);
        let mut processor = initialized(Arc::new(InMemoryEventStore::new())).await;

        processor.shutdown_requested(&checkpointer).await?;

        assert_eq!(checkpointer.checkpoint_count(), 1);
        assert_eq!(
            processor.state(),
            ProcessorState::Terminated(TerminationReason::ShutdownRequested)
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_lifecycle_guards() -> anyhow::Result<()> {
        let checkpointer = MockCheckpointer::new();
        let mut processor = EventShardProcessor::new(Arc::new(InMemoryEventStore::new()));

        assert!(processor.process_batch(&[], &checkpointer).await.is_err());
        assert!(processor.lease_lost().await.is_err());
        assert_eq!(processor.state(), ProcessorState::Created);

        processor.initialize("shard-1").await?;
        assert!(matches!(
            processor.initialize("shard-2").await,
            Err(ProcessorError::InvalidLifecycleCall {
                operation: "initialize",
                ..
            })
        ));
        assert_eq!(processor.shard_id(), Some("shard-1"));
        assert_eq!(checkpointer.checkpoint_count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_emits_monitoring_events() -> anyhow::Result<()> {
        let (tx, mut rx) = mpsc::channel(32);
        let store = Arc::new(MockEventStore::new());
        store.fail_saves_for_id("bad");
        let checkpointer = MockCheckpointer::new();
        let mut processor =
            EventShardProcessor::with_parts(store, RecordTransformer::new(), Some(tx));

        processor.initialize("shard-7").await?;
        processor
            .process_batch(
                &[
                    TestUtils::create_test_record("1", br#"{"id":"good"}"#),
                    TestUtils::create_test_record("2", br#"{"id":"bad"}"#),
                ],
                &checkpointer,
            )
            .await?;
        processor.lease_lost().await?;
        drop(processor);

        let mut kinds = Vec::new();
        while let Some(event) = rx.recv().await {
            assert_eq!(event.shard_id, "shard-7");
            kinds.push(match event.event_type {
                ProcessingEventType::Lifecycle { event_type } => format!("{:?}", event_type),
                ProcessingEventType::RecordPersisted { .. } => "persisted".to_string(),
                ProcessingEventType::RecordFailed { .. } => "failed".to_string(),
                ProcessingEventType::BatchComplete { .. } => "batch".to_string(),
                ProcessingEventType::Checkpoint { success, .. } => format!("checkpoint:{}", success),
            });
        }

        assert_eq!(
            kinds,
            vec![
                "Initialized",
                "persisted",
                "failed",
                "batch",
                "checkpoint:true",
                "LeaseLost"
            ]
        );
        Ok(())
    }
}
