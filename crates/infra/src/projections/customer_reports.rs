//! Customer reports projection.
//!
//! Tracks, per customer, how many subscriptions are currently active and how much has
//! been invoiced and paid. Every backend folds events through [`ReportDelta::for_event`]
//! and [`CustomerReport::apply`], so live delivery and replay agree on every store.

use std::collections::BTreeSet;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use flowops_core::{CustomerId, SubscriptionId};
use flowops_events::{EventKind, EventType, IntegrationEvent};

use super::Projection;
use crate::read_model::{ReadModelError, ReportStore};

/// Read model: per-customer subscription and billing totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerReport {
    pub customer_id: CustomerId,
    pub active_subscriptions: u32,
    pub total_invoiced: Decimal,
    pub total_paid: Decimal,
}

impl CustomerReport {
    pub fn new(customer_id: CustomerId) -> Self {
        Self {
            customer_id,
            active_subscriptions: 0,
            total_invoiced: Decimal::ZERO,
            total_paid: Decimal::ZERO,
        }
    }

    /// Fold one delta into the report. The active counter never goes below zero.
    pub fn apply(&mut self, delta: &ReportDelta) {
        match delta.active {
            ActiveChange::Unchanged => {}
            ActiveChange::Started(_) => {
                self.active_subscriptions = self.active_subscriptions.saturating_add(1);
            }
            ActiveChange::Stopped(_) => {
                self.active_subscriptions = self.active_subscriptions.saturating_sub(1);
            }
        }
        self.total_invoiced += delta.invoiced;
        self.total_paid += delta.paid;
    }
}

/// Effect of an event on the customer's active subscription set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveChange {
    Unchanged,
    Started(SubscriptionId),
    Stopped(SubscriptionId),
}

impl ActiveChange {
    pub fn apply_to_index(&self, index: &mut BTreeSet<SubscriptionId>) {
        match *self {
            ActiveChange::Unchanged => {}
            ActiveChange::Started(id) => {
                index.insert(id);
            }
            ActiveChange::Stopped(id) => {
                index.remove(&id);
            }
        }
    }
}

/// The change one event makes to one customer's report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportDelta {
    pub customer_id: CustomerId,
    pub active: ActiveChange,
    pub invoiced: Decimal,
    pub paid: Decimal,
}

impl ReportDelta {
    pub fn for_event(kind: &EventKind) -> ReportDelta {
        let mut delta = ReportDelta {
            customer_id: kind.customer_id(),
            active: ActiveChange::Unchanged,
            invoiced: Decimal::ZERO,
            paid: Decimal::ZERO,
        };
        match kind {
            EventKind::SubscriptionActivated(e) => {
                delta.active = ActiveChange::Started(e.subscription_id)
            }
            EventKind::SubscriptionResumed(e) => {
                delta.active = ActiveChange::Started(e.subscription_id)
            }
            EventKind::SubscriptionSuspended(e) => {
                delta.active = ActiveChange::Stopped(e.subscription_id)
            }
            EventKind::SubscriptionCancelled(e) => {
                delta.active = ActiveChange::Stopped(e.subscription_id)
            }
            EventKind::SubscriptionExpired(e) => {
                delta.active = ActiveChange::Stopped(e.subscription_id)
            }
            EventKind::InvoiceIssued(e) => delta.invoiced = e.amount,
            EventKind::InvoicePaid(e) => delta.paid = e.amount,
        }
        delta
    }
}

/// Customer reports projection over any [`ReportStore`].
#[derive(Debug)]
pub struct CustomerReportProjection<S> {
    store: S,
}

impl<S> CustomerReportProjection<S>
where
    S: ReportStore,
{
    pub const NAME: &'static str = "reporting.customer_reports";

    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Report for `customer_id`, or a zeroed one if the customer has no history yet.
    pub async fn get_or_default(
        &self,
        customer_id: CustomerId,
    ) -> Result<CustomerReport, ReadModelError> {
        Ok(self
            .store
            .get(customer_id)
            .await?
            .unwrap_or_else(|| CustomerReport::new(customer_id)))
    }

    pub async fn active_subscription_ids(
        &self,
        customer_id: CustomerId,
    ) -> Result<Vec<SubscriptionId>, ReadModelError> {
        self.store.active_subscription_ids(customer_id).await
    }
}

#[async_trait]
impl<S> Projection for CustomerReportProjection<S>
where
    S: ReportStore,
{
    fn name(&self) -> &str {
        Self::NAME
    }

    fn handles(&self, _event_type: EventType) -> bool {
        true
    }

    async fn apply(&self, event: &IntegrationEvent) -> Result<(), ReadModelError> {
        let delta = ReportDelta::for_event(&event.kind);
        let report = self.store.apply(&delta).await?;
        tracing::debug!(
            event_id = %event.id,
            customer_id = %report.customer_id,
            active = report.active_subscriptions,
            "customer report updated"
        );
        Ok(())
    }

    async fn reset(&self) -> Result<(), ReadModelError> {
        self.store.clear().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::read_model::InMemoryReportStore;
    use chrono::Utc;
    use flowops_core::InvoiceId;
    use flowops_events::{
        InvoiceIssued, InvoicePaid, SubscriptionActivated, SubscriptionCancelled,
        SubscriptionSuspended,
    };
    use proptest::prelude::*;

    fn activated(customer_id: CustomerId, subscription_id: SubscriptionId) -> EventKind {
        let now = Utc::now();
        EventKind::SubscriptionActivated(SubscriptionActivated {
            subscription_id,
            customer_id,
            plan_code: "BASIC".to_string(),
            activated_at: now,
            expires_at: now,
        })
    }

    fn cancelled(customer_id: CustomerId, subscription_id: SubscriptionId) -> EventKind {
        EventKind::SubscriptionCancelled(SubscriptionCancelled {
            subscription_id,
            customer_id,
            plan_code: "BASIC".to_string(),
            cancelled_at: Utc::now(),
        })
    }

    fn suspended(customer_id: CustomerId, subscription_id: SubscriptionId) -> EventKind {
        EventKind::SubscriptionSuspended(SubscriptionSuspended {
            subscription_id,
            customer_id,
            plan_code: "BASIC".to_string(),
            suspended_at: Utc::now(),
        })
    }

    fn issued(customer_id: CustomerId, amount: Decimal) -> EventKind {
        EventKind::InvoiceIssued(InvoiceIssued {
            invoice_id: InvoiceId::new(),
            customer_id,
            subscription_id: SubscriptionId::new(),
            plan_code: "BASIC".to_string(),
            amount,
            currency: "PLN".to_string(),
            issued_at: Utc::now(),
        })
    }

    fn paid(customer_id: CustomerId, amount: Decimal) -> EventKind {
        EventKind::InvoicePaid(InvoicePaid {
            invoice_id: InvoiceId::new(),
            customer_id,
            subscription_id: SubscriptionId::new(),
            amount,
            currency: "PLN".to_string(),
            paid_at: Utc::now(),
            payment_method: None,
            transaction_id: None,
        })
    }

    fn envelope(kind: EventKind) -> IntegrationEvent {
        IntegrationEvent::new(kind, Utc::now())
    }

    #[test]
    fn stopping_never_goes_negative() {
        let customer = CustomerId::new();
        let mut report = CustomerReport::new(customer);
        report.apply(&ReportDelta::for_event(&cancelled(customer, SubscriptionId::new())));
        assert_eq!(report.active_subscriptions, 0);
    }

    #[tokio::test]
    async fn activation_then_cancellation() {
        let projection = CustomerReportProjection::new(InMemoryReportStore::new());
        let customer = CustomerId::new();
        let subscription = SubscriptionId::new();

        projection.apply(&envelope(activated(customer, subscription))).await.unwrap();
        let report = projection.get_or_default(customer).await.unwrap();
        assert_eq!(report.active_subscriptions, 1);
        assert_eq!(
            projection.active_subscription_ids(customer).await.unwrap(),
            vec![subscription]
        );

        projection.apply(&envelope(cancelled(customer, subscription))).await.unwrap();
        let report = projection.get_or_default(customer).await.unwrap();
        assert_eq!(report.active_subscriptions, 0);
        assert!(projection.active_subscription_ids(customer).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn invoice_totals_accumulate() {
        let projection = CustomerReportProjection::new(InMemoryReportStore::new());
        let customer = CustomerId::new();
        let price = Decimal::new(999, 2);

        projection.apply(&envelope(issued(customer, price))).await.unwrap();
        projection.apply(&envelope(paid(customer, price))).await.unwrap();

        let report = projection.get_or_default(customer).await.unwrap();
        assert_eq!(report.total_invoiced, price);
        assert_eq!(report.total_paid, price);
        assert_eq!(report.active_subscriptions, 0);
    }

    #[tokio::test]
    async fn unknown_customer_reads_as_zero() {
        let projection = CustomerReportProjection::new(InMemoryReportStore::new());
        let customer = CustomerId::new();
        assert_eq!(
            projection.get_or_default(customer).await.unwrap(),
            CustomerReport::new(customer)
        );
        assert!(projection.store().get(customer).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reset_erases_everything() {
        let projection = CustomerReportProjection::new(InMemoryReportStore::new());
        let customer = CustomerId::new();
        projection
            .apply(&envelope(activated(customer, SubscriptionId::new())))
            .await
            .unwrap();

        projection.reset().await.unwrap();
        assert!(projection.store().list().await.unwrap().is_empty());
        assert!(projection.active_subscription_ids(customer).await.unwrap().is_empty());
    }

    #[derive(Debug, Clone)]
    enum Step {
        Activate(u8),
        Suspend(u8),
        Cancel(u8),
        Issue(i64),
        Pay(i64),
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            (0u8..4).prop_map(Step::Activate),
            (0u8..4).prop_map(Step::Suspend),
            (0u8..4).prop_map(Step::Cancel),
            (1i64..100_000).prop_map(Step::Issue),
            (1i64..100_000).prop_map(Step::Pay),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: the store and a plain fold of the same deltas agree, and totals never
        /// go negative.
        #[test]
        fn store_matches_plain_fold(steps in prop::collection::vec(step(), 0..40)) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let customer = CustomerId::new();
            let subscriptions: Vec<SubscriptionId> = (0..4).map(|_| SubscriptionId::new()).collect();
            let projection = CustomerReportProjection::new(InMemoryReportStore::new());
            let mut expected = CustomerReport::new(customer);

            for step in steps {
                let kind = match step {
                    Step::Activate(i) => activated(customer, subscriptions[i as usize]),
                    Step::Suspend(i) => suspended(customer, subscriptions[i as usize]),
                    Step::Cancel(i) => cancelled(customer, subscriptions[i as usize]),
                    Step::Issue(cents) => issued(customer, Decimal::new(cents, 2)),
                    Step::Pay(cents) => paid(customer, Decimal::new(cents, 2)),
                };
                expected.apply(&ReportDelta::for_event(&kind));
                runtime.block_on(projection.apply(&envelope(kind))).unwrap();
            }

            let actual = runtime.block_on(projection.get_or_default(customer)).unwrap();
            prop_assert_eq!(&actual, &expected);
            prop_assert!(actual.total_invoiced >= Decimal::ZERO);
            prop_assert!(actual.total_paid >= Decimal::ZERO);
        }
    }
}
