//! Creation of per-shard processors

use crate::monitoring::ProcessingEvent;
use crate::persistence::EventStore;
use crate::processor::{EventShardProcessor, ShardRecordProcessor};
use crate::transform::RecordTransformer;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Produces a fresh, uninitialized processor for every shard lease
pub trait ShardRecordProcessorFactory: Send + Sync {
    type Processor: ShardRecordProcessor + 'static;

    fn create_processor(&self) -> Self::Processor;
}

/// Factory handing out [`EventShardProcessor`]s that share one event store
///
/// Only the store (and the stateless transformer) is shared; stats, state
/// and shard binding are private to each instance.
pub struct EventProcessorFactory<S: EventStore + ?Sized> {
    store: Arc<S>,
    transformer: RecordTransformer,
    monitoring_tx: Option<mpsc::Sender<ProcessingEvent>>,
}

impl<S: EventStore + ?Sized> EventProcessorFactory<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            transformer: RecordTransformer::new(),
            monitoring_tx: None,
        }
    }

    pub fn with_transformer(mut self, transformer: RecordTransformer) -> Self {
        self.transformer = transformer;
        self
    }

    /// Every processor created afterwards reports to `tx`
    pub fn with_monitoring(mut self, tx: mpsc::Sender<ProcessingEvent>) -> Self {
        self.monitoring_tx = Some(tx);
        self
    }
}

impl<S: EventStore + ?Sized + 'static> ShardRecordProcessorFactory for EventProcessorFactory<S> {
    type Processor = EventShardProcessor<S>;

    fn create_processor(&self) -> Self::Processor {
        EventShardProcessor::with_parts(
            self.store.clone(),
            self.transformer.clone(),
            self.monitoring_tx.clone(),
        )
    }
}
