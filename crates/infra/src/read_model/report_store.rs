use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use flowops_core::{CustomerId, SubscriptionId};

use super::ReadModelError;
use crate::projections::customer_reports::{CustomerReport, ReportDelta};

/// Storage for per-customer reports and the active-subscription index.
///
/// `apply` must be atomic per customer and must use [`CustomerReport::apply`] so every
/// backend folds deltas identically.
#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Apply one delta, creating the zeroed row first if needed. Returns the new state.
    async fn apply(&self, delta: &ReportDelta) -> Result<CustomerReport, ReadModelError>;

    async fn get(&self, customer_id: CustomerId) -> Result<Option<CustomerReport>, ReadModelError>;

    /// Ids of the customer's active subscriptions, sorted.
    async fn active_subscription_ids(
        &self,
        customer_id: CustomerId,
    ) -> Result<Vec<SubscriptionId>, ReadModelError>;

    /// Every report, ordered by customer id.
    async fn list(&self) -> Result<Vec<CustomerReport>, ReadModelError>;

    /// Remove all reports and index rows (rebuild support).
    async fn clear(&self) -> Result<(), ReadModelError>;
}

#[async_trait]
impl<S> ReportStore for Arc<S>
where
    S: ReportStore + ?Sized,
{
    async fn apply(&self, delta: &ReportDelta) -> Result<CustomerReport, ReadModelError> {
        (**self).apply(delta).await
    }

    async fn get(&self, customer_id: CustomerId) -> Result<Option<CustomerReport>, ReadModelError> {
        (**self).get(customer_id).await
    }

    async fn active_subscription_ids(
        &self,
        customer_id: CustomerId,
    ) -> Result<Vec<SubscriptionId>, ReadModelError> {
        (**self).active_subscription_ids(customer_id).await
    }

    async fn list(&self) -> Result<Vec<CustomerReport>, ReadModelError> {
        (**self).list().await
    }

    async fn clear(&self) -> Result<(), ReadModelError> {
        (**self).clear().await
    }
}

#[derive(Debug, Clone)]
struct Entry {
    report: CustomerReport,
    active: BTreeSet<SubscriptionId>,
}

/// In-memory report store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryReportStore {
    inner: RwLock<HashMap<CustomerId, Entry>>,
}

impl InMemoryReportStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReportStore for InMemoryReportStore {
    async fn apply(&self, delta: &ReportDelta) -> Result<CustomerReport, ReadModelError> {
        let mut map = self.inner.write().map_err(|_| ReadModelError::LockPoisoned)?;
        let entry = map.entry(delta.customer_id).or_insert_with(|| Entry {
            report: CustomerReport::new(delta.customer_id),
            active: BTreeSet::new(),
        });
        entry.report.apply(delta);
        delta.active.apply_to_index(&mut entry.active);
        Ok(entry.report.clone())
    }

    async fn get(&self, customer_id: CustomerId) -> Result<Option<CustomerReport>, ReadModelError> {
        let map = self.inner.read().map_err(|_| ReadModelError::LockPoisoned)?;
        Ok(map.get(&customer_id).map(|e| e.report.clone()))
    }

    async fn active_subscription_ids(
        &self,
        customer_id: CustomerId,
    ) -> Result<Vec<SubscriptionId>, ReadModelError> {
        let map = self.inner.read().map_err(|_| ReadModelError::LockPoisoned)?;
        Ok(map
            .get(&customer_id)
            .map(|e| e.active.iter().copied().collect())
            .unwrap_or_default())
    }

    async fn list(&self) -> Result<Vec<CustomerReport>, ReadModelError> {
        let map = self.inner.read().map_err(|_| ReadModelError::LockPoisoned)?;
        let mut reports: Vec<CustomerReport> = map.values().map(|e| e.report.clone()).collect();
        reports.sort_by_key(|r| r.customer_id);
        Ok(reports)
    }

    async fn clear(&self) -> Result<(), ReadModelError> {
        self.inner
            .write()
            .map_err(|_| ReadModelError::LockPoisoned)?
            .clear();
        Ok(())
    }
}
