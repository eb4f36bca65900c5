//! Postgres-backed read model stores.
//!
//! Tables are created by [`crate::schema::migrate`]. Each mutating call runs in its own
//! transaction: the target row is locked with `SELECT ... FOR UPDATE`, folded in Rust with
//! the same code the in-memory stores use, then written back. Report rows are created with
//! zeros before the lock is taken, so concurrent deltas for one customer serialize on it.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use flowops_core::{CustomerId, SubscriptionId};
use flowops_events::EventKind;
use flowops_subscriptions::SubscriptionStatus;

use super::{ReadModelError, ReportStore, SnapshotStore};
use crate::projections::customer_reports::{ActiveChange, CustomerReport, ReportDelta};
use crate::projections::subscription_snapshots::{
    SnapshotPage, SnapshotPageQuery, SubscriptionSnapshot,
};

fn db_error(operation: &str, err: sqlx::Error) -> ReadModelError {
    ReadModelError::Database(format!("{operation}: {err}"))
}

/// Customer reports and the active-subscription index in Postgres.
#[derive(Debug, Clone)]
pub struct PostgresReportStore {
    pool: Arc<PgPool>,
}

impl PostgresReportStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    async fn apply_in(
        tx: &mut Transaction<'_, Postgres>,
        delta: &ReportDelta,
    ) -> Result<CustomerReport, sqlx::Error> {
        let customer = delta.customer_id.as_uuid();

        sqlx::query(
            r#"
            INSERT INTO customer_reports (customer_id, active_subscriptions, total_invoiced, total_paid)
            VALUES ($1, 0, 0, 0)
            ON CONFLICT (customer_id) DO NOTHING
            "#,
        )
        .bind(customer)
        .execute(&mut **tx)
        .await?;

        let row = sqlx::query(
            r#"
            SELECT customer_id, active_subscriptions, total_invoiced, total_paid
            FROM customer_reports
            WHERE customer_id = $1
            FOR UPDATE
            "#,
        )
        .bind(customer)
        .fetch_one(&mut **tx)
        .await?;

        let mut report = report_from_row(&row)?;
        report.apply(delta);

        sqlx::query(
            r#"
            UPDATE customer_reports
            SET active_subscriptions = $2, total_invoiced = $3, total_paid = $4
            WHERE customer_id = $1
            "#,
        )
        .bind(customer)
        .bind(i64::from(report.active_subscriptions))
        .bind(report.total_invoiced)
        .bind(report.total_paid)
        .execute(&mut **tx)
        .await?;

        match delta.active {
            ActiveChange::Unchanged => {}
            ActiveChange::Started(subscription_id) => {
                sqlx::query(
                    r#"
                    INSERT INTO active_subscription_ids (customer_id, subscription_id)
                    VALUES ($1, $2)
                    ON CONFLICT DO NOTHING
                    "#,
                )
                .bind(customer)
                .bind(subscription_id.as_uuid())
                .execute(&mut **tx)
                .await?;
            }
            ActiveChange::Stopped(subscription_id) => {
                sqlx::query(
                    "DELETE FROM active_subscription_ids WHERE customer_id = $1 AND subscription_id = $2",
                )
                .bind(customer)
                .bind(subscription_id.as_uuid())
                .execute(&mut **tx)
                .await?;
            }
        }

        Ok(report)
    }
}

#[async_trait]
impl ReportStore for PostgresReportStore {
    #[instrument(skip(self, delta), fields(customer_id = %delta.customer_id), err)]
    async fn apply(&self, delta: &ReportDelta) -> Result<CustomerReport, ReadModelError> {
        let mut tx = self.pool.begin().await.map_err(|e| db_error("begin", e))?;
        let report = Self::apply_in(&mut tx, delta)
            .await
            .map_err(|e| db_error("apply report delta", e))?;
        tx.commit().await.map_err(|e| db_error("commit", e))?;
        Ok(report)
    }

    #[instrument(skip(self), err)]
    async fn get(&self, customer_id: CustomerId) -> Result<Option<CustomerReport>, ReadModelError> {
        let row = sqlx::query(
            r#"
            SELECT customer_id, active_subscriptions, total_invoiced, total_paid
            FROM customer_reports
            WHERE customer_id = $1
            "#,
        )
        .bind(customer_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| db_error("get report", e))?;

        row.as_ref()
            .map(report_from_row)
            .transpose()
            .map_err(|e| db_error("decode report", e))
    }

    #[instrument(skip(self), err)]
    async fn active_subscription_ids(
        &self,
        customer_id: CustomerId,
    ) -> Result<Vec<SubscriptionId>, ReadModelError> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT subscription_id
            FROM active_subscription_ids
            WHERE customer_id = $1
            ORDER BY subscription_id
            "#,
        )
        .bind(customer_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| db_error("list active ids", e))?;

        Ok(ids.into_iter().map(SubscriptionId::from_uuid).collect())
    }

    #[instrument(skip(self), err)]
    async fn list(&self) -> Result<Vec<CustomerReport>, ReadModelError> {
        let rows = sqlx::query(
            r#"
            SELECT customer_id, active_subscriptions, total_invoiced, total_paid
            FROM customer_reports
            ORDER BY customer_id
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| db_error("list reports", e))?;

        rows.iter()
            .map(report_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| db_error("decode report", e))
    }

    #[instrument(skip(self), err)]
    async fn clear(&self) -> Result<(), ReadModelError> {
        let mut tx = self.pool.begin().await.map_err(|e| db_error("begin", e))?;
        sqlx::query("DELETE FROM active_subscription_ids")
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("clear active ids", e))?;
        sqlx::query("DELETE FROM customer_reports")
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("clear reports", e))?;
        tx.commit().await.map_err(|e| db_error("commit", e))
    }
}

fn report_from_row(row: &PgRow) -> Result<CustomerReport, sqlx::Error> {
    let active: i64 = row.try_get("active_subscriptions")?;
    Ok(CustomerReport {
        customer_id: CustomerId::from_uuid(row.try_get("customer_id")?),
        active_subscriptions: u32::try_from(active.max(0)).unwrap_or(u32::MAX),
        total_invoiced: row.try_get::<Decimal, _>("total_invoiced")?,
        total_paid: row.try_get::<Decimal, _>("total_paid")?,
    })
}

const SNAPSHOT_COLUMNS: &str = "subscription_id, customer_id, plan_code, status, activated_at, \
     expires_at, suspended_at, resumed_at, cancelled_at, expired_at";

/// Subscription snapshot rows in Postgres.
#[derive(Debug, Clone)]
pub struct PostgresSnapshotStore {
    pool: Arc<PgPool>,
}

impl PostgresSnapshotStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    async fn apply_in(
        tx: &mut Transaction<'_, Postgres>,
        kind: &EventKind,
    ) -> Result<Option<SubscriptionSnapshot>, sqlx::Error> {
        let id = *kind.subscription_id().as_uuid();

        let row = sqlx::query(&format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM subscription_snapshots WHERE subscription_id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?;
        let current = row.as_ref().map(snapshot_from_row).transpose()?;

        let Some(next) = SubscriptionSnapshot::fold(current, kind) else {
            return Ok(None);
        };

        sqlx::query(
            r#"
            INSERT INTO subscription_snapshots (
                subscription_id, customer_id, plan_code, status, activated_at,
                expires_at, suspended_at, resumed_at, cancelled_at, expired_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (subscription_id) DO UPDATE SET
                customer_id = EXCLUDED.customer_id,
                plan_code = EXCLUDED.plan_code,
                status = EXCLUDED.status,
                activated_at = COALESCE(subscription_snapshots.activated_at, EXCLUDED.activated_at),
                expires_at = COALESCE(subscription_snapshots.expires_at, EXCLUDED.expires_at),
                suspended_at = EXCLUDED.suspended_at,
                resumed_at = EXCLUDED.resumed_at,
                cancelled_at = EXCLUDED.cancelled_at,
                expired_at = EXCLUDED.expired_at
            "#,
        )
        .bind(next.subscription_id.as_uuid())
        .bind(next.customer_id.as_uuid())
        .bind(&next.plan_code)
        .bind(next.status.as_str())
        .bind(next.activated_at)
        .bind(next.expires_at)
        .bind(next.suspended_at)
        .bind(next.resumed_at)
        .bind(next.cancelled_at)
        .bind(next.expired_at)
        .execute(&mut **tx)
        .await?;

        Ok(Some(next))
    }
}

#[async_trait]
impl SnapshotStore for PostgresSnapshotStore {
    #[instrument(
        skip(self, kind),
        fields(subscription_id = %kind.subscription_id(), event_type = %kind.event_type()),
        err
    )]
    async fn apply(&self, kind: &EventKind) -> Result<Option<SubscriptionSnapshot>, ReadModelError> {
        if matches!(kind, EventKind::InvoiceIssued(_) | EventKind::InvoicePaid(_)) {
            return Ok(None);
        }
        let mut tx = self.pool.begin().await.map_err(|e| db_error("begin", e))?;
        let row = Self::apply_in(&mut tx, kind)
            .await
            .map_err(|e| db_error("upsert snapshot", e))?;
        tx.commit().await.map_err(|e| db_error("commit", e))?;
        Ok(row)
    }

    #[instrument(skip(self), err)]
    async fn get(
        &self,
        subscription_id: SubscriptionId,
    ) -> Result<Option<SubscriptionSnapshot>, ReadModelError> {
        let row = sqlx::query(&format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM subscription_snapshots WHERE subscription_id = $1"
        ))
        .bind(subscription_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| db_error("get snapshot", e))?;

        row.as_ref()
            .map(snapshot_from_row)
            .transpose()
            .map_err(|e| db_error("decode snapshot", e))
    }

    #[instrument(skip(self), err)]
    async fn list_by_customer(
        &self,
        customer_id: CustomerId,
        status: Option<SubscriptionStatus>,
    ) -> Result<Vec<SubscriptionSnapshot>, ReadModelError> {
        let rows = sqlx::query(&format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM subscription_snapshots \
             WHERE customer_id = $1 AND ($2::text IS NULL OR status = $2) \
             ORDER BY activated_at DESC, subscription_id DESC"
        ))
        .bind(customer_id.as_uuid())
        .bind(status.map(SubscriptionStatus::as_str))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| db_error("list snapshots", e))?;

        rows.iter()
            .map(snapshot_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| db_error("decode snapshot", e))
    }

    #[instrument(skip(self), err)]
    async fn page(&self, query: &SnapshotPageQuery) -> Result<SnapshotPage, ReadModelError> {
        query.validate()?;
        let customer = query.customer_id.map(|c| *c.as_uuid());
        let status = query.status.map(SubscriptionStatus::as_str);
        let filter = "($1::uuid IS NULL OR customer_id = $1) AND ($2::text IS NULL OR status = $2)";

        let total: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM subscription_snapshots WHERE {filter}"
        ))
        .bind(customer)
        .bind(status)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| db_error("count snapshots", e))?;

        // Column and direction come from closed enums, never from caller text.
        let direction = query.direction.keyword();
        let rows = sqlx::query(&format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM subscription_snapshots WHERE {filter} \
             ORDER BY {column} {direction}, subscription_id {direction} \
             LIMIT $3 OFFSET $4",
            column = query.order_by.column(),
        ))
        .bind(customer)
        .bind(status)
        .bind(i64::from(query.page_size))
        .bind(i64::try_from(query.offset()).unwrap_or(i64::MAX))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| db_error("page snapshots", e))?;

        let items = rows
            .iter()
            .map(snapshot_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| db_error("decode snapshot", e))?;

        Ok(SnapshotPage {
            items,
            total: u64::try_from(total).unwrap_or(0),
            page: query.page,
            page_size: query.page_size,
        })
    }

    #[instrument(skip(self), err)]
    async fn clear(&self) -> Result<(), ReadModelError> {
        sqlx::query("DELETE FROM subscription_snapshots")
            .execute(&*self.pool)
            .await
            .map_err(|e| db_error("clear snapshots", e))?;
        Ok(())
    }
}

fn snapshot_from_row(row: &PgRow) -> Result<SubscriptionSnapshot, sqlx::Error> {
    let status: String = row.try_get("status")?;
    let status = SubscriptionStatus::parse(&status)
        .ok_or_else(|| sqlx::Error::Decode(format!("unknown subscription status {status:?}").into()))?;

    Ok(SubscriptionSnapshot {
        subscription_id: SubscriptionId::from_uuid(row.try_get("subscription_id")?),
        customer_id: CustomerId::from_uuid(row.try_get("customer_id")?),
        plan_code: row.try_get("plan_code")?,
        status,
        activated_at: row.try_get("activated_at")?,
        expires_at: row.try_get("expires_at")?,
        suspended_at: row.try_get("suspended_at")?,
        resumed_at: row.try_get("resumed_at")?,
        cancelled_at: row.try_get("cancelled_at")?,
        expired_at: row.try_get("expired_at")?,
    })
}
