//! Read side: subscription lookups, projections, the raw event list and replay.

use std::sync::Arc;

use thiserror::Error;

use flowops_billing::{PlanPrice, PlanPricing};
use flowops_core::{Cancellation, CustomerId, DomainError, ErrorKind, SubscriptionId};
use flowops_subscriptions::{Subscription, SubscriptionRepository, SubscriptionStatus};

use crate::event_store::{EventStore, EventStoreError, StoredEventRecord};
use crate::projections::{
    CustomerReport, ReplayEngine, ReplayError, ReplayOptions, ReplaySummary, SnapshotPage,
    SnapshotPageQuery, SubscriptionSnapshot,
};
use crate::read_model::{ReadModelError, ReportStore, SnapshotStore};

#[derive(Debug, Error)]
pub enum QueryError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("read model error: {0}")]
    ReadModel(#[from] ReadModelError),

    #[error("event store error: {0}")]
    EventStore(#[from] EventStoreError),

    #[error(transparent)]
    Replay(#[from] ReplayError),
}

impl QueryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            QueryError::Domain(e) => e.kind(),
            QueryError::ReadModel(ReadModelError::InvalidQuery(_)) => ErrorKind::Validation,
            QueryError::ReadModel(_) | QueryError::EventStore(_) => ErrorKind::StoreFailure,
            QueryError::Replay(e) => e.kind(),
        }
    }
}

pub struct QueryService<R> {
    repository: R,
    events: Arc<dyn EventStore>,
    reports: Arc<dyn ReportStore>,
    snapshots: Arc<dyn SnapshotStore>,
    replay: ReplayEngine<Arc<dyn EventStore>>,
    pricing: PlanPricing,
}

impl<R> QueryService<R>
where
    R: SubscriptionRepository,
{
    pub fn new(
        repository: R,
        events: Arc<dyn EventStore>,
        reports: Arc<dyn ReportStore>,
        snapshots: Arc<dyn SnapshotStore>,
        replay: ReplayEngine<Arc<dyn EventStore>>,
        pricing: PlanPricing,
    ) -> Self {
        Self {
            repository,
            events,
            reports,
            snapshots,
            replay,
            pricing,
        }
    }

    /// Current aggregate state; `NotFound` if the id was never created.
    pub async fn subscription(&self, id: SubscriptionId) -> Result<Subscription, QueryError> {
        self.repository
            .get(id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("subscription {id}")).into())
    }

    /// Report for the customer; zeros if no event concerned them yet.
    pub async fn customer_report(&self, customer_id: CustomerId) -> Result<CustomerReport, QueryError> {
        Ok(self
            .reports
            .get(customer_id)
            .await?
            .unwrap_or_else(|| CustomerReport::new(customer_id)))
    }

    pub async fn active_subscription_ids(
        &self,
        customer_id: CustomerId,
    ) -> Result<Vec<SubscriptionId>, QueryError> {
        Ok(self.reports.active_subscription_ids(customer_id).await?)
    }

    /// Raw persisted records in replay order, without payloads.
    pub async fn events(&self) -> Result<Vec<StoredEventRecord>, QueryError> {
        Ok(self.events.list_records().await?)
    }

    pub async fn subscription_snapshot(
        &self,
        id: SubscriptionId,
    ) -> Result<SubscriptionSnapshot, QueryError> {
        self.snapshots
            .get(id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("subscription snapshot {id}")).into())
    }

    pub async fn subscriptions_by_customer(
        &self,
        customer_id: CustomerId,
        status: Option<SubscriptionStatus>,
    ) -> Result<Vec<SubscriptionSnapshot>, QueryError> {
        Ok(self.snapshots.list_by_customer(customer_id, status).await?)
    }

    pub async fn subscriptions_page(&self, query: &SnapshotPageQuery) -> Result<SnapshotPage, QueryError> {
        Ok(self.snapshots.page(query).await?)
    }

    pub fn plans(&self) -> Vec<PlanPrice> {
        self.pricing.plans()
    }

    /// Rebuild every registered projection from the event log.
    pub async fn replay(
        &self,
        options: ReplayOptions,
        cancel: &Cancellation,
    ) -> Result<ReplaySummary, QueryError> {
        Ok(self.replay.rebuild(options, cancel).await?)
    }
}
