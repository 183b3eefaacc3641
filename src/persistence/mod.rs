//! Persistence port for normalized events
//!
//! The processor only needs to save an event and, on auxiliary read paths,
//! look one up by its full key. Implementations must be safe to share
//! between shard workers: the processor calls them without any locking.

use crate::error::PersistenceError;
use crate::model::NormalizedEvent;
use async_trait::async_trait;

#[cfg(feature = "dynamodb-store")]
pub mod dynamodb;
pub mod memory;

#[cfg(feature = "dynamodb-store")]
pub use dynamodb::DynamoDbEventStore;
pub use memory::InMemoryEventStore;

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Upsert by `(id, occurred_at)`; saving the same event twice leaves the
    /// same stored state.
    async fn save_event(&self, event: &NormalizedEvent) -> Result<(), PersistenceError>;

    /// Point lookup by full key; `Ok(None)` when no such event exists.
    async fn get_event(
        &self,
        id: &str,
        occurred_at: i64,
    ) -> Result<Option<NormalizedEvent>, PersistenceError>;
}
