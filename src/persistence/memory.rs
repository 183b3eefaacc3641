use crate::error::PersistenceError;
use crate::model::{EventKey, NormalizedEvent};
use crate::persistence::EventStore;
use async_trait::async_trait;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::RwLock;
use tracing::{debug, instrument, trace};

/// Event store held in process memory
#[derive(Debug, Default, Clone)]
pub struct InMemoryEventStore {
    events: Arc<RwLock<HashMap<EventKey, NormalizedEvent>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        debug!("Initializing in-memory event store");
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.events.read().await.is_empty()
    }

    /// All stored events ordered by key
    pub async fn events(&self) -> Vec<NormalizedEvent> {
        let events = self.events.read().await;
        let mut keys: Vec<&EventKey> = events.keys().collect();
        keys.sort();
        keys.into_iter().map(|key| events[key].clone()).collect()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    #[instrument(skip(self, event), fields(id = %event.id, occurred_at = event.occurred_at))]
    async fn save_event(&self, event: &NormalizedEvent) -> Result<(), PersistenceError> {
        self.events.write().await.insert(event.key(), event.clone());
        trace!("Event saved to memory");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_event(
        &self,
        id: &str,
        occurred_at: i64,
    ) -> Result<Option<NormalizedEvent>, PersistenceError> {
        Ok(self
            .events
            .read()
            .await
            .get(&EventKey::new(id, occurred_at))
            .cloned())
    }
}
