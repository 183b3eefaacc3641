use super::types::{LifecycleEventType, ProcessingEvent, ProcessingEventType};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, RwLock};
use tokio::time::interval;
use tracing::{debug, info, trace, warn};

/// Aggregated counters for a single shard
#[derive(Debug, Clone)]
pub struct ShardMetrics {
    pub records_persisted: u64,
    pub records_failed: u64,
    pub batches: u64,
    pub batch_time: Duration,
    pub max_batch_time: Duration,
    pub checkpoints_succeeded: u64,
    pub checkpoints_failed: u64,
    /// Last lifecycle transition seen for the shard
    pub lifecycle: Option<LifecycleEventType>,
    pub last_updated: Instant,
}

impl Default for ShardMetrics {
    fn default() -> Self {
        Self {
            records_persisted: 0,
            records_failed: 0,
            batches: 0,
            batch_time: Duration::ZERO,
            max_batch_time: Duration::ZERO,
            checkpoints_succeeded: 0,
            checkpoints_failed: 0,
            lifecycle: None,
            last_updated: Instant::now(),
        }
    }
}

impl ShardMetrics {
    pub fn avg_batch_time(&self) -> Duration {
        if self.batches == 0 {
            Duration::ZERO
        } else {
            self.batch_time / u32::try_from(self.batches).unwrap_or(u32::MAX)
        }
    }
}

/// Folds monitoring events into per-shard metrics
pub struct MetricsAggregator {
    metrics: Arc<RwLock<HashMap<String, ShardMetrics>>>,
    metrics_interval: Duration,
    monitoring_rx: mpsc::Receiver<ProcessingEvent>,
}

impl MetricsAggregator {
    pub fn new(metrics_interval: Duration, monitoring_rx: mpsc::Receiver<ProcessingEvent>) -> Self {
        Self {
            metrics: Arc::new(RwLock::new(HashMap::new())),
            metrics_interval,
            monitoring_rx,
        }
    }

    /// Shared view of the metrics, usable after `run` has taken `self`
    pub fn metrics_handle(&self) -> Arc<RwLock<HashMap<String, ShardMetrics>>> {
        self.metrics.clone()
    }

    /// Consume events until every sender is dropped, logging metrics on each tick
    pub async fn run(mut self) {
        let mut ticker = interval(self.metrics_interval);

        loop {
            tokio::select! {
                event = self.monitoring_rx.recv() => match event {
                    Some(event) => self.process_event(event).await,
                    None => break,
                },
                _ = ticker.tick() => self.emit_metrics().await,
            }
        }

        self.emit_metrics().await;
        debug!("Monitoring channel closed, metrics aggregator stopped");
    }

    pub async fn process_event(&self, event: ProcessingEvent) {
        let mut metrics = self.metrics.write().await;
        let shard = metrics.entry(event.shard_id.clone()).or_default();

        match event.event_type {
            ProcessingEventType::RecordPersisted {
                sequence_number,
                event_id,
                ..
            } => {
                shard.records_persisted += 1;
                trace!(
                    shard_id = %event.shard_id,
                    sequence = %sequence_number,
                    event_id = %event_id,
                    "Record persisted"
                );
            }
            ProcessingEventType::RecordFailed {
                sequence_number,
                error,
            } => {
                shard.records_failed += 1;
                trace!(
                    shard_id = %event.shard_id,
                    sequence = %sequence_number,
                    error = %error,
                    "Record failed"
                );
            }
            ProcessingEventType::BatchComplete { duration, .. } => {
                shard.batches += 1;
                shard.batch_time += duration;
                shard.max_batch_time = shard.max_batch_time.max(duration);
            }
            ProcessingEventType::Checkpoint { success, .. } => {
                if success {
                    shard.checkpoints_succeeded += 1;
                } else {
                    shard.checkpoints_failed += 1;
                }
            }
            ProcessingEventType::Lifecycle { event_type } => {
                shard.lifecycle = Some(event_type);
            }
        }

        shard.last_updated = Instant::now();
    }

    async fn emit_metrics(&self) {
        let metrics = self.metrics.read().await;

        for (shard_id, shard) in metrics.iter() {
            info!(
                shard_id = %shard_id,
                records_persisted = shard.records_persisted,
                records_failed = shard.records_failed,
                batches = shard.batches,
                avg_batch_time_ms = shard.avg_batch_time().as_millis() as u64,
                max_batch_time_ms = shard.max_batch_time.as_millis() as u64,
                checkpoints_succeeded = shard.checkpoints_succeeded,
                checkpoints_failed = shard.checkpoints_failed,
                lifecycle = ?shard.lifecycle,
                "Shard metrics"
            );

            if shard.checkpoints_failed > 0 {
                warn!(
                    shard_id = %shard_id,
                    failures = shard.checkpoints_failed,
                    "Checkpoint failures detected"
                );
            }
        }
    }

    pub async fn get_metrics(&self) -> HashMap<String, ShardMetrics> {
        self.metrics.read().await.clone()
    }

    pub async fn get_shard_metrics(&self, shard_id: &str) -> Option<ShardMetrics> {
        self.metrics.read().await.get(shard_id).cloned()
    }
}
