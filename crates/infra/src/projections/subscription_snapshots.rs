//! Subscription snapshots projection.
//!
//! One row per subscription with its latest status and lifecycle timestamps. Rows are
//! upserted by subscription id through [`SubscriptionSnapshot::fold`]; timestamps keep the
//! first value written, so redelivering an event rewrites the same row.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use flowops_core::{CustomerId, SubscriptionId};
use flowops_events::{EventKind, EventType, IntegrationEvent};
use flowops_subscriptions::SubscriptionStatus;

use super::Projection;
use crate::read_model::{ReadModelError, SnapshotStore};

/// Largest page a caller may request.
pub const MAX_PAGE_SIZE: u32 = 200;

/// Read model: flattened subscription row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionSnapshot {
    pub subscription_id: SubscriptionId,
    pub customer_id: CustomerId,
    pub plan_code: String,
    pub status: SubscriptionStatus,
    pub activated_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub suspended_at: Option<DateTime<Utc>>,
    pub resumed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub expired_at: Option<DateTime<Utc>>,
}

impl SubscriptionSnapshot {
    fn blank(subscription_id: SubscriptionId, customer_id: CustomerId, plan_code: &str) -> Self {
        Self {
            subscription_id,
            customer_id,
            plan_code: plan_code.to_string(),
            status: SubscriptionStatus::None,
            activated_at: None,
            expires_at: None,
            suspended_at: None,
            resumed_at: None,
            cancelled_at: None,
            expired_at: None,
        }
    }

    /// Apply one event to the current row (if any) and return the row to store.
    ///
    /// Invoice events leave the row untouched. A lifecycle event that arrives before the
    /// activation still creates the row, so out-of-order delivery is not lost.
    pub fn fold(current: Option<SubscriptionSnapshot>, kind: &EventKind) -> Option<SubscriptionSnapshot> {
        let (subscription_id, customer_id, plan_code) = match kind {
            EventKind::SubscriptionActivated(e) => (e.subscription_id, e.customer_id, &e.plan_code),
            EventKind::SubscriptionSuspended(e) => (e.subscription_id, e.customer_id, &e.plan_code),
            EventKind::SubscriptionResumed(e) => (e.subscription_id, e.customer_id, &e.plan_code),
            EventKind::SubscriptionCancelled(e) => (e.subscription_id, e.customer_id, &e.plan_code),
            EventKind::SubscriptionExpired(e) => (e.subscription_id, e.customer_id, &e.plan_code),
            EventKind::InvoiceIssued(_) | EventKind::InvoicePaid(_) => return current,
        };

        let mut row = current
            .unwrap_or_else(|| SubscriptionSnapshot::blank(subscription_id, customer_id, plan_code));

        match kind {
            EventKind::SubscriptionActivated(e) => {
                row.plan_code = e.plan_code.clone();
                row.status = SubscriptionStatus::Active;
                row.activated_at = row.activated_at.or(Some(e.activated_at));
                row.expires_at = row.expires_at.or(Some(e.expires_at));
                row.suspended_at = None;
                row.resumed_at = None;
                row.cancelled_at = None;
            }
            EventKind::SubscriptionSuspended(e) => {
                row.status = SubscriptionStatus::Suspended;
                row.suspended_at = row.suspended_at.or(Some(e.suspended_at));
            }
            EventKind::SubscriptionResumed(e) => {
                row.status = SubscriptionStatus::Active;
                row.resumed_at = row.resumed_at.or(Some(e.resumed_at));
            }
            EventKind::SubscriptionCancelled(e) => {
                row.status = SubscriptionStatus::Canceled;
                row.cancelled_at = Some(e.cancelled_at);
            }
            EventKind::SubscriptionExpired(e) => {
                row.status = SubscriptionStatus::Expired;
                row.expired_at = Some(e.expired_at);
            }
            EventKind::InvoiceIssued(_) | EventKind::InvoicePaid(_) => {}
        }
        Some(row)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotOrder {
    #[default]
    ActivatedAt,
    Status,
}

impl SnapshotOrder {
    /// Column name used by SQL backends.
    pub fn column(self) -> &'static str {
        match self {
            SnapshotOrder::ActivatedAt => "activated_at",
            SnapshotOrder::Status => "status",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    pub fn keyword(self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// Paged listing of snapshots, optionally filtered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotPageQuery {
    pub customer_id: Option<CustomerId>,
    pub status: Option<SubscriptionStatus>,
    pub page: u32,
    pub page_size: u32,
    pub order_by: SnapshotOrder,
    pub direction: SortDirection,
}

impl Default for SnapshotPageQuery {
    fn default() -> Self {
        Self {
            customer_id: None,
            status: None,
            page: 1,
            page_size: 20,
            order_by: SnapshotOrder::default(),
            direction: SortDirection::default(),
        }
    }
}

impl SnapshotPageQuery {
    pub fn new(page: u32, page_size: u32) -> Result<Self, ReadModelError> {
        let query = Self {
            page,
            page_size,
            ..Self::default()
        };
        query.validate()?;
        Ok(query)
    }

    pub fn for_customer(mut self, customer_id: CustomerId) -> Self {
        self.customer_id = Some(customer_id);
        self
    }

    pub fn with_status(mut self, status: SubscriptionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn ordered_by(mut self, order_by: SnapshotOrder, direction: SortDirection) -> Self {
        self.order_by = order_by;
        self.direction = direction;
        self
    }

    pub fn validate(&self) -> Result<(), ReadModelError> {
        if self.page < 1 {
            return Err(ReadModelError::InvalidQuery("page must be at least 1".to_string()));
        }
        if self.page_size < 1 || self.page_size > MAX_PAGE_SIZE {
            return Err(ReadModelError::InvalidQuery(format!(
                "page_size must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }
        Ok(())
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.page_size)
    }

    pub fn matches(&self, row: &SubscriptionSnapshot) -> bool {
        self.customer_id.is_none_or(|c| c == row.customer_id)
            && self.status.is_none_or(|s| s == row.status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotPage {
    pub items: Vec<SubscriptionSnapshot>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

/// Subscription snapshots projection over any [`SnapshotStore`].
#[derive(Debug)]
pub struct SubscriptionSnapshotProjection<S> {
    store: S,
}

impl<S> SubscriptionSnapshotProjection<S>
where
    S: SnapshotStore,
{
    pub const NAME: &'static str = "subscriptions.snapshots";

    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

#[async_trait]
impl<S> Projection for SubscriptionSnapshotProjection<S>
where
    S: SnapshotStore,
{
    fn name(&self) -> &str {
        Self::NAME
    }

    fn handles(&self, event_type: EventType) -> bool {
        !matches!(event_type, EventType::InvoiceIssued | EventType::InvoicePaid)
    }

    async fn apply(&self, event: &IntegrationEvent) -> Result<(), ReadModelError> {
        if !self.handles(event.event_type()) {
            return Ok(());
        }
        self.store.apply(&event.kind).await?;
        Ok(())
    }

    async fn reset(&self) -> Result<(), ReadModelError> {
        self.store.clear().await
    }
}
