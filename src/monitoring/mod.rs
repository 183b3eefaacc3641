//! Monitoring for the shard processors
//!
//! Processors emit [`ProcessingEvent`]s over an optional bounded channel;
//! [`MetricsAggregator`] folds them into per-shard counters and logs them on
//! a fixed interval.

mod metrics;
mod types;

pub use metrics::{MetricsAggregator, ShardMetrics};
pub use types::{
    CheckpointReason, LifecycleEventType, MonitoringConfig, ProcessingEvent, ProcessingEventType,
};
