//! Billing reactions to subscription lifecycle events.
//!
//! The handler issues the first invoice of every activated subscription by publishing an
//! `InvoiceIssued` event back through the storing bus. Cancellations are only logged.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tracing::{error, info};

use flowops_billing::{IssueInvoice, PlanPricing};
use flowops_core::Clock;
use flowops_events::{
    EventBus, EventHandler, EventKind, EventType, HandlerError, IntegrationEvent,
    SubscriptionActivated, SubscriptionCancelled,
};

use crate::event_store::PublishError;
use crate::retry::RetryPolicy;

/// Issues invoices on activation.
///
/// Holds the bus weakly: the bus owns the handler registration, so a strong reference
/// would keep both alive forever.
pub struct BillingHandler<B> {
    bus: Weak<B>,
    pricing: PlanPricing,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl<B> BillingHandler<B>
where
    B: EventBus<Error = PublishError> + 'static,
{
    pub const NAME: &'static str = "billing.invoicing";

    pub fn new(bus: &Arc<B>, pricing: PlanPricing, retry: RetryPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            bus: Arc::downgrade(bus),
            pricing,
            retry,
            clock,
        }
    }

    /// Build the handler and subscribe it to activations and cancellations.
    pub fn register(
        bus: &Arc<B>,
        pricing: PlanPricing,
        retry: RetryPolicy,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let handler = Arc::new(Self::new(bus, pricing, retry, clock));
        bus.subscribe(EventType::SubscriptionActivated, handler.clone());
        bus.subscribe(EventType::SubscriptionCancelled, handler.clone());
        handler
    }

    pub fn pricing(&self) -> &PlanPricing {
        &self.pricing
    }

    async fn issue_first_invoice(&self, activated: &SubscriptionActivated) -> Result<(), HandlerError> {
        let bus = self
            .bus
            .upgrade()
            .ok_or_else(|| HandlerError::new("event bus is no longer available"))?;

        let issued_at = self.clock.now();
        let kind = IssueInvoice::for_activation(activated, &self.pricing, issued_at)
            .map_err(|e| HandlerError::new(e.to_string()))?
            .into_event()
            .map_err(|e| HandlerError::new(e.to_string()))?;
        let event = IntegrationEvent::new(kind, issued_at);
        let invoice_event_id = event.id;

        self.retry
            .run("issue_invoice", || bus.publish(event.clone()))
            .await
            .map_err(|e| {
                error!(
                    subscription_id = %activated.subscription_id,
                    event_id = %invoice_event_id,
                    error = %e,
                    "failed to publish invoice"
                );
                HandlerError::new(format!("invoice for {}: {e}", activated.subscription_id))
            })?;

        if let EventKind::InvoiceIssued(invoice) = &event.kind {
            info!(
                invoice_id = %invoice.invoice_id,
                subscription_id = %invoice.subscription_id,
                amount = %invoice.amount,
                currency = %invoice.currency,
                "invoice issued"
            );
        }
        Ok(())
    }

    fn note_cancellation(&self, cancelled: &SubscriptionCancelled) {
        info!(
            subscription_id = %cancelled.subscription_id,
            customer_id = %cancelled.customer_id,
            "subscription cancelled, no further invoices"
        );
    }
}

#[async_trait]
impl<B> EventHandler for BillingHandler<B>
where
    B: EventBus<Error = PublishError> + 'static,
{
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn handle(&self, event: &IntegrationEvent) -> Result<(), HandlerError> {
        match &event.kind {
            EventKind::SubscriptionActivated(activated) => self.issue_first_invoice(activated).await,
            EventKind::SubscriptionCancelled(cancelled) => {
                self.note_cancellation(cancelled);
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::{
        EventStore, EventStoreError, InMemoryEventStore, StoredEventRecord, StoringEventBus,
    };
    use chrono::{Months, TimeZone, Utc};
    use flowops_core::{CustomerId, FixedClock, SubscriptionId};
    use flowops_events::InMemoryEventBus;
    use rust_decimal::Decimal;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Fails the first `failures` invoice appends, then behaves like the inner store.
    struct FlakyInvoiceStore {
        inner: InMemoryEventStore,
        failures: AtomicU32,
    }

    #[async_trait]
    impl EventStore for FlakyInvoiceStore {
        async fn append(&self, event: &IntegrationEvent) -> Result<(), EventStoreError> {
            if event.event_type() == EventType::InvoiceIssued
                && self
                    .failures
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
            {
                return Err(EventStoreError::Database("connection reset".to_string()));
            }
            self.inner.append(event).await
        }

        async fn get_all(&self) -> Result<Vec<IntegrationEvent>, EventStoreError> {
            self.inner.get_all().await
        }

        async fn list_records(&self) -> Result<Vec<StoredEventRecord>, EventStoreError> {
            self.inner.list_records().await
        }
    }

    type TestBus = StoringEventBus<Arc<FlakyInvoiceStore>, InMemoryEventBus>;

    fn stack(failures: u32) -> (Arc<FlakyInvoiceStore>, Arc<TestBus>) {
        let store = Arc::new(FlakyInvoiceStore {
            inner: InMemoryEventStore::new(),
            failures: AtomicU32::new(failures),
        });
        let bus = Arc::new(StoringEventBus::new(Arc::clone(&store), InMemoryEventBus::new()));
        let clock = Arc::new(FixedClock(Utc.with_ymd_and_hms(2025, 5, 1, 8, 0, 0).unwrap()));
        BillingHandler::register(
            &bus,
            PlanPricing::standard(),
            RetryPolicy::new(3, Duration::from_millis(1)),
            clock,
        );
        (store, bus)
    }

    fn activation(plan: &str) -> IntegrationEvent {
        let now = Utc::now();
        IntegrationEvent::new(
            EventKind::SubscriptionActivated(SubscriptionActivated {
                subscription_id: SubscriptionId::new(),
                customer_id: CustomerId::new(),
                plan_code: plan.to_string(),
                activated_at: now,
                expires_at: now + Months::new(1),
            }),
            now,
        )
    }

    fn invoices(events: &[IntegrationEvent]) -> Vec<Decimal> {
        events
            .iter()
            .filter_map(|e| match &e.kind {
                EventKind::InvoiceIssued(i) => Some(i.amount),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn activation_issues_priced_invoice() {
        let (store, bus) = stack(0);
        bus.publish(activation("basic")).await.unwrap();

        let events = store.get_all().await.unwrap();
        assert_eq!(invoices(&events), vec![Decimal::new(999, 2)]);
    }

    #[tokio::test]
    async fn transient_store_failures_are_retried() {
        let (store, bus) = stack(2);
        bus.publish(activation("PREMIUM")).await.unwrap();

        let events = store.get_all().await.unwrap();
        assert_eq!(invoices(&events), vec![Decimal::new(2999, 2)]);
        assert_eq!(store.failures.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_as_delivery_failure() {
        let (store, bus) = stack(10);
        let err = bus.publish(activation("BASIC")).await.unwrap_err();

        let delivery = match err {
            PublishError::Delivery(delivery) => delivery,
            other => panic!("expected delivery failure, got {other:?}"),
        };
        assert_eq!(delivery.failures.len(), 1);
        assert_eq!(delivery.failures[0].handler, BillingHandler::<TestBus>::NAME);
        // 1 attempt + 3 retries consumed
        assert_eq!(store.failures.load(Ordering::SeqCst), 6);
        assert!(invoices(&store.get_all().await.unwrap()).is_empty());
    }

    #[tokio::test]
    async fn unknown_plan_is_reported() {
        let (store, bus) = stack(0);
        let err = bus.publish(activation("GOLD")).await.unwrap_err();
        assert!(err.is_durable());
        assert_eq!(store.get_all().await.unwrap().len(), 1);
    }
}
