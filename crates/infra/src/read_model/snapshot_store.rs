use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use flowops_core::{CustomerId, SubscriptionId};
use flowops_events::EventKind;
use flowops_subscriptions::SubscriptionStatus;

use super::ReadModelError;
use crate::projections::subscription_snapshots::{
    SnapshotOrder, SnapshotPage, SnapshotPageQuery, SortDirection, SubscriptionSnapshot,
};

/// Storage for subscription snapshot rows.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Fold `kind` into the row it concerns, atomically per subscription id.
    ///
    /// Returns the stored row, or `None` when the event does not concern a subscription row.
    async fn apply(&self, kind: &EventKind) -> Result<Option<SubscriptionSnapshot>, ReadModelError>;

    async fn get(
        &self,
        subscription_id: SubscriptionId,
    ) -> Result<Option<SubscriptionSnapshot>, ReadModelError>;

    /// Rows for one customer, most recently activated first.
    async fn list_by_customer(
        &self,
        customer_id: CustomerId,
        status: Option<SubscriptionStatus>,
    ) -> Result<Vec<SubscriptionSnapshot>, ReadModelError>;

    async fn page(&self, query: &SnapshotPageQuery) -> Result<SnapshotPage, ReadModelError>;

    async fn clear(&self) -> Result<(), ReadModelError>;
}

#[async_trait]
impl<S> SnapshotStore for Arc<S>
where
    S: SnapshotStore + ?Sized,
{
    async fn apply(&self, kind: &EventKind) -> Result<Option<SubscriptionSnapshot>, ReadModelError> {
        (**self).apply(kind).await
    }

    async fn get(
        &self,
        subscription_id: SubscriptionId,
    ) -> Result<Option<SubscriptionSnapshot>, ReadModelError> {
        (**self).get(subscription_id).await
    }

    async fn list_by_customer(
        &self,
        customer_id: CustomerId,
        status: Option<SubscriptionStatus>,
    ) -> Result<Vec<SubscriptionSnapshot>, ReadModelError> {
        (**self).list_by_customer(customer_id, status).await
    }

    async fn page(&self, query: &SnapshotPageQuery) -> Result<SnapshotPage, ReadModelError> {
        (**self).page(query).await
    }

    async fn clear(&self) -> Result<(), ReadModelError> {
        (**self).clear().await
    }
}

/// Sort rows the way the SQL backend's `ORDER BY <column> <dir>, subscription_id <dir>` does
/// (Postgres puts NULLs last ascending and first descending).
pub(crate) fn sort_rows(rows: &mut [SubscriptionSnapshot], order_by: SnapshotOrder, direction: SortDirection) {
    rows.sort_by(|a, b| {
        let primary = match order_by {
            SnapshotOrder::ActivatedAt => {
                (a.activated_at.is_none(), a.activated_at).cmp(&(b.activated_at.is_none(), b.activated_at))
            }
            SnapshotOrder::Status => a.status.as_str().cmp(b.status.as_str()),
        };
        let ordering: Ordering = primary.then_with(|| a.subscription_id.cmp(&b.subscription_id));
        match direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    });
}

/// In-memory snapshot store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    rows: RwLock<HashMap<SubscriptionId, SubscriptionSnapshot>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn filtered(
        &self,
        keep: impl Fn(&SubscriptionSnapshot) -> bool,
    ) -> Result<Vec<SubscriptionSnapshot>, ReadModelError> {
        let rows = self.rows.read().map_err(|_| ReadModelError::LockPoisoned)?;
        Ok(rows.values().filter(|row| keep(row)).cloned().collect())
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn apply(&self, kind: &EventKind) -> Result<Option<SubscriptionSnapshot>, ReadModelError> {
        let mut rows = self.rows.write().map_err(|_| ReadModelError::LockPoisoned)?;
        let id = kind.subscription_id();
        let Some(next) = SubscriptionSnapshot::fold(rows.get(&id).cloned(), kind) else {
            return Ok(None);
        };
        rows.insert(next.subscription_id, next.clone());
        Ok(Some(next))
    }

    async fn get(
        &self,
        subscription_id: SubscriptionId,
    ) -> Result<Option<SubscriptionSnapshot>, ReadModelError> {
        let rows = self.rows.read().map_err(|_| ReadModelError::LockPoisoned)?;
        Ok(rows.get(&subscription_id).cloned())
    }

    async fn list_by_customer(
        &self,
        customer_id: CustomerId,
        status: Option<SubscriptionStatus>,
    ) -> Result<Vec<SubscriptionSnapshot>, ReadModelError> {
        let mut rows = self.filtered(|row| {
            row.customer_id == customer_id && status.is_none_or(|s| s == row.status)
        })?;
        sort_rows(&mut rows, SnapshotOrder::ActivatedAt, SortDirection::Desc);
        Ok(rows)
    }

    async fn page(&self, query: &SnapshotPageQuery) -> Result<SnapshotPage, ReadModelError> {
        query.validate()?;
        let mut rows = self.filtered(|row| query.matches(row))?;
        sort_rows(&mut rows, query.order_by, query.direction);

        let total = rows.len() as u64;
        let offset = usize::try_from(query.offset()).unwrap_or(usize::MAX);
        let items = rows
            .into_iter()
            .skip(offset)
            .take(query.page_size as usize)
            .collect();

        Ok(SnapshotPage {
            items,
            total,
            page: query.page,
            page_size: query.page_size,
        })
    }

    async fn clear(&self) -> Result<(), ReadModelError> {
        self.rows
            .write()
            .map_err(|_| ReadModelError::LockPoisoned)?
            .clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use flowops_events::{SubscriptionActivated, SubscriptionCancelled};

    fn at(day: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap() + Duration::days(day)
    }

    fn activated(customer: CustomerId, day: i64) -> (SubscriptionId, EventKind) {
        let id = SubscriptionId::new();
        let kind = EventKind::SubscriptionActivated(SubscriptionActivated {
            subscription_id: id,
            customer_id: customer,
            plan_code: "BASIC".to_string(),
            activated_at: at(day),
            expires_at: at(day + 31),
        });
        (id, kind)
    }

    fn cancelled(id: SubscriptionId, customer: CustomerId) -> EventKind {
        EventKind::SubscriptionCancelled(SubscriptionCancelled {
            subscription_id: id,
            customer_id: customer,
            plan_code: "BASIC".to_string(),
            cancelled_at: at(40),
        })
    }

    #[tokio::test]
    async fn list_by_customer_filters_and_orders() {
        let store = InMemorySnapshotStore::new();
        let customer = CustomerId::new();
        let (first, first_event) = activated(customer, 1);
        let (second, second_event) = activated(customer, 2);
        let (_, other_event) = activated(CustomerId::new(), 3);

        for kind in [&first_event, &second_event, &other_event] {
            store.apply(kind).await.unwrap();
        }
        store.apply(&cancelled(first, customer)).await.unwrap();

        let all: Vec<_> = store
            .list_by_customer(customer, None)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.subscription_id)
            .collect();
        assert_eq!(all, vec![second, first]);

        let canceled = store
            .list_by_customer(customer, Some(SubscriptionStatus::Canceled))
            .await
            .unwrap();
        assert_eq!(canceled.len(), 1);
        assert_eq!(canceled[0].subscription_id, first);
    }

    #[tokio::test]
    async fn paging_reports_total_and_slices() {
        let store = InMemorySnapshotStore::new();
        let customer = CustomerId::new();
        let mut ids = Vec::new();
        for day in 0..5 {
            let (id, kind) = activated(customer, day);
            store.apply(&kind).await.unwrap();
            ids.push(id);
        }

        let query = SnapshotPageQuery::new(2, 2)
            .unwrap()
            .ordered_by(SnapshotOrder::ActivatedAt, SortDirection::Asc);
        let page = store.page(&query).await.unwrap();
        assert_eq!(page.total, 5);
        let got: Vec<_> = page.items.iter().map(|r| r.subscription_id).collect();
        assert_eq!(got, vec![ids[2], ids[3]]);

        let beyond = store.page(&SnapshotPageQuery::new(9, 2).unwrap()).await.unwrap();
        assert!(beyond.items.is_empty());
        assert_eq!(beyond.total, 5);
    }

    #[tokio::test]
    async fn invalid_page_is_rejected() {
        let store = InMemorySnapshotStore::new();
        let query = SnapshotPageQuery {
            page_size: 500,
            ..SnapshotPageQuery::default()
        };
        assert!(matches!(
            store.page(&query).await,
            Err(ReadModelError::InvalidQuery(_))
        ));
    }
}
