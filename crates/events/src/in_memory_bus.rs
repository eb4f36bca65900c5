//! In-process event bus.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use futures::future::join_all;
use thiserror::Error;
use uuid::Uuid;

use crate::bus::{EventBus, EventHandler};
use crate::integration::{EventType, IntegrationEvent};

/// One handler that failed during a publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerFailure {
    pub handler: String,
    pub reason: String,
}

/// Aggregated handler failures for a single publish.
///
/// Every matching handler has already run by the time this is returned.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{} handler(s) failed for {event_type} event {event_id}", failures.len())]
pub struct DeliveryError {
    pub event_id: Uuid,
    pub event_type: EventType,
    pub failures: Vec<HandlerFailure>,
}

/// In-memory pub/sub bus.
///
/// - Type tag → ordered list of handlers
/// - Each handler runs as its own tokio task; the publish awaits all of them
/// - Handlers may publish again from inside `handle` (the registry lock is not held while awaiting)
#[derive(Default)]
pub struct InMemoryEventBus {
    handlers: RwLock<HashMap<EventType, Vec<Arc<dyn EventHandler>>>>,
}

impl core::fmt::Debug for InMemoryEventBus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        let counts: HashMap<&'static str, usize> = handlers
            .iter()
            .map(|(event_type, list)| (event_type.as_str(), list.len()))
            .collect();
        f.debug_struct("InMemoryEventBus")
            .field("handlers", &counts)
            .finish()
    }
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of handlers currently registered for `event_type`.
    pub fn handler_count(&self, event_type: EventType) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event_type)
            .map_or(0, Vec::len)
    }

    fn handlers_for(&self, event_type: EventType) -> Vec<Arc<dyn EventHandler>> {
        // The registry only ever grows, so a poisoned lock still holds a usable map.
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event_type)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    type Error = DeliveryError;

    fn subscribe(&self, event_type: EventType, handler: Arc<dyn EventHandler>) {
        tracing::debug!(event_type = %event_type, handler = handler.name(), "handler subscribed");
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(event_type)
            .or_default()
            .push(handler);
    }

    async fn publish(&self, event: IntegrationEvent) -> Result<(), Self::Error> {
        let event_type = event.event_type();
        let handlers = self.handlers_for(event_type);
        if handlers.is_empty() {
            return Ok(());
        }

        let event_id = event.id;
        let event = Arc::new(event);
        let (names, tasks): (Vec<String>, Vec<_>) = handlers
            .into_iter()
            .map(|handler| {
                let event = Arc::clone(&event);
                let name = handler.name().to_string();
                let task = tokio::spawn(async move { handler.handle(&event).await });
                (name, task)
            })
            .unzip();

        let failures: Vec<HandlerFailure> = names
            .into_iter()
            .zip(join_all(tasks).await)
            .filter_map(|(handler, outcome)| {
                let reason = match outcome {
                    Ok(Ok(())) => return None,
                    Ok(Err(err)) => err.to_string(),
                    Err(join_err) => format!("handler task did not complete: {join_err}"),
                };
                tracing::warn!(
                    event_id = %event_id,
                    event_type = %event_type,
                    handler = %handler,
                    reason = %reason,
                    "event handler failed"
                );
                Some(HandlerFailure { handler, reason })
            })
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(DeliveryError {
                event_id,
                event_type,
                failures,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{HandlerError, handler_fn};
    use crate::integration::{EventKind, SubscriptionCancelled, SubscriptionSuspended};
    use chrono::Utc;
    use flowops_core::{CustomerId, SubscriptionId};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn suspended() -> IntegrationEvent {
        IntegrationEvent::new(
            EventKind::SubscriptionSuspended(SubscriptionSuspended {
                subscription_id: SubscriptionId::new(),
                customer_id: CustomerId::new(),
                plan_code: "BASIC".to_string(),
                suspended_at: Utc::now(),
            }),
            Utc::now(),
        )
    }

    fn cancelled() -> IntegrationEvent {
        IntegrationEvent::new(
            EventKind::SubscriptionCancelled(SubscriptionCancelled {
                subscription_id: SubscriptionId::new(),
                customer_id: CustomerId::new(),
                plan_code: "BASIC".to_string(),
                cancelled_at: Utc::now(),
            }),
            Utc::now(),
        )
    }

    fn counting(name: &str, counter: &Arc<AtomicUsize>) -> Arc<dyn EventHandler> {
        let counter = Arc::clone(counter);
        handler_fn(name, move |_| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<(), HandlerError>(())
            }
        })
    }

    #[tokio::test]
    async fn publish_without_handlers_is_a_no_op() {
        let bus = InMemoryEventBus::new();
        bus.publish(suspended()).await.unwrap();
    }

    #[tokio::test]
    async fn delivers_only_to_handlers_of_the_concrete_type() {
        let bus = InMemoryEventBus::new();
        let suspended_calls = Arc::new(AtomicUsize::new(0));
        let cancelled_calls = Arc::new(AtomicUsize::new(0));
        bus.subscribe(
            EventType::SubscriptionSuspended,
            counting("suspended-a", &suspended_calls),
        );
        bus.subscribe(
            EventType::SubscriptionSuspended,
            counting("suspended-b", &suspended_calls),
        );
        bus.subscribe(
            EventType::SubscriptionCancelled,
            counting("cancelled", &cancelled_calls),
        );

        bus.publish(suspended()).await.unwrap();

        assert_eq!(suspended_calls.load(Ordering::SeqCst), 2);
        assert_eq!(cancelled_calls.load(Ordering::SeqCst), 0);
        assert_eq!(bus.handler_count(EventType::SubscriptionSuspended), 2);
    }

    #[tokio::test]
    async fn failures_are_aggregated_after_every_handler_ran() {
        let bus = InMemoryEventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        bus.subscribe(EventType::SubscriptionCancelled, counting("first", &calls));
        bus.subscribe(
            EventType::SubscriptionCancelled,
            handler_fn("broken", |_| async { Err::<(), _>(HandlerError::new("boom")) }),
        );
        bus.subscribe(EventType::SubscriptionCancelled, counting("last", &calls));

        let event = cancelled();
        let err = bus.publish(event.clone()).await.unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(err.event_id, event.id);
        assert_eq!(
            err.failures,
            vec![HandlerFailure {
                handler: "broken".to_string(),
                reason: "boom".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn panicking_handler_is_reported_as_a_failure() {
        let bus = InMemoryEventBus::new();
        bus.subscribe(
            EventType::SubscriptionSuspended,
            handler_fn("panics", |event: IntegrationEvent| async move {
                assert_eq!(event.version, 0, "handler bug");
                Ok::<(), HandlerError>(())
            }),
        );

        let err = bus.publish(suspended()).await.unwrap_err();
        assert_eq!(err.failures.len(), 1);
        assert_eq!(err.failures[0].handler, "panics");
    }

    #[tokio::test]
    async fn handlers_may_publish_again() {
        let bus = Arc::new(InMemoryEventBus::new());
        let cancelled_calls = Arc::new(AtomicUsize::new(0));
        bus.subscribe(
            EventType::SubscriptionCancelled,
            counting("cancelled", &cancelled_calls),
        );

        let inner = Arc::clone(&bus);
        bus.subscribe(
            EventType::SubscriptionSuspended,
            handler_fn("cascade", move |_| {
                let inner = Arc::clone(&inner);
                async move {
                    inner
                        .publish(cancelled())
                        .await
                        .map_err(|e| HandlerError::new(e.to_string()))
                }
            }),
        );

        bus.publish(suspended()).await.unwrap();
        assert_eq!(cancelled_calls.load(Ordering::SeqCst), 1);
    }
}
