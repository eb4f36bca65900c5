//! Postgres-backed event store implementation.
//!
//! Events live in the `integration_events` table (see [`crate::schema`]). Each call checks
//! a connection out of the pool for the duration of one statement; `append` is a single
//! autocommitted `INSERT`, so a successful return means the row is durable.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | EventStoreError |
//! |------------|----------------------|-----------------|
//! | Database (unique violation) | `23505` | `DuplicateEvent` |
//! | Database (other) | Any other | `Database` |
//! | PoolClosed / network / other | N/A | `Database` |

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Row};
use std::sync::Arc;
use tracing::instrument;

use flowops_events::IntegrationEvent;

use super::r#trait::{EventStore, EventStoreError, StoredEvent, StoredEventRecord, decode_in_order};

/// Postgres-backed append-only event store.
#[derive(Debug, Clone)]
pub struct PostgresEventStore {
    pool: Arc<PgPool>,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    #[instrument(skip(self), err)]
    async fn load_rows(&self) -> Result<Vec<StoredEvent>, EventStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, event_type, occurred_on, version, payload
            FROM integration_events
            ORDER BY occurred_on ASC, id ASC
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_rows", None, e))?;

        let mut stored = Vec::with_capacity(rows.len());
        for row in rows {
            let row = StoredEventRow::from_row(&row).map_err(|e| {
                EventStoreError::Database(format!("failed to read event row: {e}"))
            })?;
            stored.push(row.into());
        }
        Ok(stored)
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    #[instrument(
        skip(self, event),
        fields(event_id = %event.id, event_type = %event.event_type()),
        err
    )]
    async fn append(&self, event: &IntegrationEvent) -> Result<(), EventStoreError> {
        let stored = StoredEvent::from_event(event)?;
        let version = version_to_column(stored.version)?;

        sqlx::query(
            r#"
            INSERT INTO integration_events (id, event_type, occurred_on, version, payload)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(stored.id)
        .bind(&stored.event_type)
        .bind(stored.occurred_on)
        .bind(version)
        .bind(&stored.payload)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("append", Some(stored.id), e))?;

        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<IntegrationEvent>, EventStoreError> {
        Ok(decode_in_order(self.load_rows().await?))
    }

    #[instrument(skip(self), err)]
    async fn list_records(&self) -> Result<Vec<StoredEventRecord>, EventStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, event_type, occurred_on, version
            FROM integration_events
            ORDER BY occurred_on ASC, id ASC
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_records", None, e))?;

        rows.iter()
            .map(|row| {
                Ok(StoredEventRecord {
                    id: row.try_get("id")?,
                    event_type: row.try_get("event_type")?,
                    occurred_on: row.try_get("occurred_on")?,
                    version: version_from_column(row.try_get("version")?)?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(|e| EventStoreError::Database(format!("failed to read event row: {e}")))
    }
}

/// Map SQLx errors to `EventStoreError` with context.
fn map_sqlx_error(operation: &str, event_id: Option<uuid::Uuid>, err: sqlx::Error) -> EventStoreError {
    if let (Some(id), true) = (event_id, is_unique_violation(&err)) {
        return EventStoreError::DuplicateEvent(id);
    }
    match err {
        sqlx::Error::Database(db_err) => {
            EventStoreError::Database(format!("database error in {operation}: {}", db_err.message()))
        }
        sqlx::Error::PoolClosed => {
            EventStoreError::Database(format!("connection pool closed in {operation}"))
        }
        other => EventStoreError::Database(format!("sqlx error in {operation}: {other}")),
    }
}

/// The column is `INTEGER`; versions that do not fit are rejected instead of wrapping.
fn version_to_column(version: u32) -> Result<i32, EventStoreError> {
    i32::try_from(version)
        .map_err(|_| EventStoreError::Serialization(format!("event version {version} exceeds INTEGER range")))
}

fn version_from_column(version: i32) -> Result<u32, sqlx::Error> {
    u32::try_from(version)
        .map_err(|_| sqlx::Error::Decode(format!("negative event version {version}").into()))
}

/// Check if an error is a unique constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}

// SQLx row types

#[derive(Debug)]
struct StoredEventRow {
    id: uuid::Uuid,
    event_type: String,
    occurred_on: DateTime<Utc>,
    version: u32,
    payload: serde_json::Value,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredEventRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoredEventRow {
            id: row.try_get("id")?,
            event_type: row.try_get("event_type")?,
            occurred_on: row.try_get("occurred_on")?,
            version: version_from_column(row.try_get("version")?)?,
            payload: row.try_get("payload")?,
        })
    }
}

impl From<StoredEventRow> for StoredEvent {
    fn from(row: StoredEventRow) -> Self {
        StoredEvent {
            id: row.id,
            event_type: row.event_type,
            occurred_on: row.occurred_on,
            version: row.version,
            payload: row.payload,
        }
    }
}
