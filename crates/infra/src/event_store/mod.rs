//! Append-only integration event log.
//!
//! This module defines the storage boundary for integration events plus the storing bus,
//! the adapter that makes every publish durable before anyone else sees it.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, StoredEventRecord, decode_in_order};

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use flowops_core::ErrorKind;
use flowops_events::{DeliveryError, EventBus, EventHandler, EventType, IntegrationEvent};

/// Failure of a publish through [`StoringEventBus`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PublishError {
    /// Nothing was stored and nothing was forwarded.
    #[error("event store append failed: {0}")]
    Store(#[from] EventStoreError),

    /// The event is durable; at least one subscriber failed.
    #[error("event stored but delivery failed: {0}")]
    Delivery(#[from] DeliveryError),
}

impl PublishError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PublishError::Store(_) => ErrorKind::StoreFailure,
            PublishError::Delivery(_) => ErrorKind::DeliveryFailure,
        }
    }

    /// Whether the event reached the store.
    pub fn is_durable(&self) -> bool {
        matches!(self, PublishError::Delivery(_))
    }
}

/// Adapter that appends every event to a store before forwarding it to an inner bus.
///
/// This ensures the ordering invariant: **forwarding happens only after append succeeds**.
/// A delivery failure after a successful append is reported, never reverted.
pub struct StoringEventBus<S, B> {
    store: S,
    bus: B,
}

impl<S, B> StoringEventBus<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_parts(self) -> (S, B) {
        (self.store, self.bus)
    }
}

#[async_trait]
impl<S, B> EventBus for StoringEventBus<S, B>
where
    S: EventStore,
    B: EventBus<Error = DeliveryError>,
{
    type Error = PublishError;

    fn subscribe(&self, event_type: EventType, handler: Arc<dyn EventHandler>) {
        self.bus.subscribe(event_type, handler)
    }

    async fn publish(&self, event: IntegrationEvent) -> Result<(), Self::Error> {
        // 1) Append (durable step)
        self.store.append(&event).await?;

        // 2) Forward to subscribers
        let event_id = event.id;
        let event_type = event.event_type();
        self.bus.publish(event).await.map_err(|err| {
            tracing::error!(
                event_id = %event_id,
                event_type = %event_type,
                failed_handlers = err.failures.len(),
                "event stored but delivery failed"
            );
            PublishError::Delivery(err)
        })
    }
}
