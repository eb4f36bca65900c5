use std::collections::{BTreeMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use flowops_events::IntegrationEvent;

use super::r#trait::{EventStore, EventStoreError, StoredEvent, StoredEventRecord, decode_in_order};

#[derive(Debug, Default)]
struct Log {
    ordered: BTreeMap<(DateTime<Utc>, Uuid), StoredEvent>,
    ids: HashSet<Uuid>,
}

/// In-memory append-only event store.
///
/// Keeps events in their serialized form, so reads exercise the same decode path as the
/// Postgres store. Intended for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    log: RwLock<Log>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.log.read().map(|log| log.ids.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append an already-serialized record as-is.
    pub fn append_stored(&self, record: StoredEvent) -> Result<(), EventStoreError> {
        let mut log = self.log.write().map_err(|_| EventStoreError::LockPoisoned)?;
        if !log.ids.insert(record.id) {
            return Err(EventStoreError::DuplicateEvent(record.id));
        }
        log.ordered.insert(record.ordering_key(), record);
        Ok(())
    }

    fn snapshot(&self) -> Result<Vec<StoredEvent>, EventStoreError> {
        let log = self.log.read().map_err(|_| EventStoreError::LockPoisoned)?;
        Ok(log.ordered.values().cloned().collect())
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, event: &IntegrationEvent) -> Result<(), EventStoreError> {
        self.append_stored(StoredEvent::from_event(event)?)
    }

    async fn get_all(&self) -> Result<Vec<IntegrationEvent>, EventStoreError> {
        Ok(decode_in_order(self.snapshot()?))
    }

    async fn list_records(&self) -> Result<Vec<StoredEventRecord>, EventStoreError> {
        Ok(self.snapshot()?.iter().map(StoredEvent::record).collect())
    }
}
