use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use flowops_events::{DecodeError, EventKind, IntegrationEvent};
use std::sync::Arc;

/// An integration event in its persisted shape: type tag + JSON payload.
///
/// This is what both backends actually hold. Turning it back into an [`IntegrationEvent`]
/// goes through [`EventKind::decode`], so a record written by a newer build (unknown tag)
/// or a damaged payload surfaces as a [`DecodeError`] instead of a panic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub id: Uuid,
    pub event_type: String,
    pub occurred_on: DateTime<Utc>,
    pub version: u32,
    pub payload: JsonValue,
}

/// Stored event metadata without the payload, for observability listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEventRecord {
    pub id: Uuid,
    pub event_type: String,
    pub occurred_on: DateTime<Utc>,
    pub version: u32,
}

impl StoredEvent {
    pub fn from_event(event: &IntegrationEvent) -> Result<Self, EventStoreError> {
        let payload = event.kind.to_payload().map_err(|e| {
            EventStoreError::Serialization(format!("payload serialization failed: {e}"))
        })?;

        Ok(Self {
            id: event.id,
            event_type: event.event_type().as_str().to_string(),
            occurred_on: event.occurred_on,
            version: event.version,
            payload,
        })
    }

    pub fn decode(&self) -> Result<IntegrationEvent, DecodeError> {
        let kind = EventKind::decode(&self.event_type, self.payload.clone())?;
        Ok(IntegrationEvent {
            id: self.id,
            occurred_on: self.occurred_on,
            version: self.version,
            kind,
        })
    }

    pub fn record(&self) -> StoredEventRecord {
        StoredEventRecord {
            id: self.id,
            event_type: self.event_type.clone(),
            occurred_on: self.occurred_on,
            version: self.version,
        }
    }

    pub fn ordering_key(&self) -> (DateTime<Utc>, Uuid) {
        (self.occurred_on, self.id)
    }
}

/// Event store operation error.
///
/// These are **infrastructure errors**; they are propagated to the command caller
/// unchanged and never retried by the store itself.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EventStoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("event {0} already appended")]
    DuplicateEvent(Uuid),

    #[error("event store lock poisoned")]
    LockPoisoned,
}

/// Append-only log of integration events.
///
/// ## Append Semantics
///
/// `append()` returns `Ok` only once the event is durable: a caller may assume it survives
/// a crash immediately afterwards. A failed append must not be half-visible.
///
/// ## Read Semantics
///
/// `get_all()` returns every decodable event sorted by `(occurred_on, id)` ascending.
/// Records that cannot be decoded are skipped with a warning so one bad row never blocks
/// replay of the rest.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn append(&self, event: &IntegrationEvent) -> Result<(), EventStoreError>;

    async fn get_all(&self) -> Result<Vec<IntegrationEvent>, EventStoreError>;

    /// Metadata of every stored record, same order as `get_all`, without decoding payloads.
    async fn list_records(&self) -> Result<Vec<StoredEventRecord>, EventStoreError>;
}

#[async_trait]
impl<S> EventStore for Arc<S>
where
    S: EventStore + ?Sized,
{
    async fn append(&self, event: &IntegrationEvent) -> Result<(), EventStoreError> {
        (**self).append(event).await
    }

    async fn get_all(&self) -> Result<Vec<IntegrationEvent>, EventStoreError> {
        (**self).get_all().await
    }

    async fn list_records(&self) -> Result<Vec<StoredEventRecord>, EventStoreError> {
        (**self).list_records().await
    }
}

/// Decode records in replay order, skipping (and logging) the ones that fail.
pub fn decode_in_order(mut records: Vec<StoredEvent>) -> Vec<IntegrationEvent> {
    records.sort_by_key(StoredEvent::ordering_key);
    records
        .iter()
        .filter_map(|record| match record.decode() {
            Ok(event) => Some(event),
            Err(err) => {
                tracing::warn!(
                    event_id = %record.id,
                    event_type = %record.event_type,
                    error = %err,
                    "skipping undecodable stored event"
                );
                None
            }
        })
        .collect()
}
