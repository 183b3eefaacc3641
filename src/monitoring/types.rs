use std::fmt;
use std::time::{Duration, SystemTime};

/// Configuration for the monitoring system
#[derive(Debug, Clone)]
pub struct MonitoringConfig {
    /// Whether monitoring is enabled
    pub enabled: bool,
    /// Size of the monitoring channel buffer
    pub channel_size: usize,
    /// How often to emit aggregated metrics
    pub metrics_interval: Duration,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            channel_size: 1000,
            metrics_interval: Duration::from_secs(60),
        }
    }
}

/// A monitoring event emitted by a shard processor
#[derive(Debug, Clone)]
pub struct ProcessingEvent {
    /// When the event occurred
    pub timestamp: SystemTime,
    /// ID of the shard this event relates to
    pub shard_id: String,
    /// The type of event and its details
    pub event_type: ProcessingEventType,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProcessingEventType {
    RecordPersisted {
        sequence_number: String,
        event_id: String,
        occurred_at: i64,
    },
    RecordFailed {
        sequence_number: String,
        error: String,
    },
    BatchComplete {
        persisted_count: usize,
        failed_count: usize,
        duration: Duration,
    },
    Checkpoint {
        reason: CheckpointReason,
        success: bool,
        error: Option<String>,
    },
    Lifecycle {
        event_type: LifecycleEventType,
    },
}

/// Why a checkpoint was attempted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointReason {
    BatchComplete,
    ShardEnded,
    ShutdownRequested,
}

impl fmt::Display for CheckpointReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CheckpointReason::BatchComplete => "batch complete",
            CheckpointReason::ShardEnded => "shard ended",
            CheckpointReason::ShutdownRequested => "shutdown requested",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEventType {
    Initialized,
    LeaseLost,
    ShardEnded,
    ShutdownRequested,
}

impl ProcessingEvent {
    fn new(shard_id: String, event_type: ProcessingEventType) -> Self {
        Self {
            timestamp: SystemTime::now(),
            shard_id,
            event_type,
        }
    }

    pub fn record_persisted(
        shard_id: String,
        sequence_number: String,
        event_id: String,
        occurred_at: i64,
    ) -> Self {
        Self::new(
            shard_id,
            ProcessingEventType::RecordPersisted {
                sequence_number,
                event_id,
                occurred_at,
            },
        )
    }

    pub fn record_failed(shard_id: String, sequence_number: String, error: String) -> Self {
        Self::new(
            shard_id,
            ProcessingEventType::RecordFailed {
                sequence_number,
                error,
            },
        )
    }

    pub fn batch_complete(
        shard_id: String,
        persisted_count: usize,
        failed_count: usize,
        duration: Duration,
    ) -> Self {
        Self::new(
            shard_id,
            ProcessingEventType::BatchComplete {
                persisted_count,
                failed_count,
                duration,
            },
        )
    }

    pub fn checkpoint(
        shard_id: String,
        reason: CheckpointReason,
        success: bool,
        error: Option<String>,
    ) -> Self {
        Self::new(
            shard_id,
            ProcessingEventType::Checkpoint {
                reason,
                success,
                error,
            },
        )
    }

    pub fn lifecycle(shard_id: String, event_type: LifecycleEventType) -> Self {
        Self::new(shard_id, ProcessingEventType::Lifecycle { event_type })
    }
}
