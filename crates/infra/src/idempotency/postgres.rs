//! Postgres-backed idempotency store (`idempotency_keys` table).

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::instrument;
use uuid::Uuid;

use flowops_core::SubscriptionId;

use super::{IdempotencyError, IdempotencyKey, IdempotencyOutcome, IdempotencyStore};

#[derive(Debug, Clone)]
pub struct PostgresIdempotencyStore {
    pool: Arc<PgPool>,
}

impl PostgresIdempotencyStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

fn db_error(operation: &str, err: sqlx::Error) -> IdempotencyError {
    IdempotencyError::Database(format!("{operation}: {err}"))
}

#[async_trait]
impl IdempotencyStore for PostgresIdempotencyStore {
    #[instrument(skip(self, key), fields(key = %key), err)]
    async fn try_set(
        &self,
        key: &IdempotencyKey,
        value: SubscriptionId,
    ) -> Result<IdempotencyOutcome, IdempotencyError> {
        let inserted: Option<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO idempotency_keys (key, subscription_id)
            VALUES ($1, $2)
            ON CONFLICT (key) DO NOTHING
            RETURNING subscription_id
            "#,
        )
        .bind(key.as_str())
        .bind(value.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| db_error("insert idempotency key", e))?;

        if let Some(id) = inserted {
            return Ok(IdempotencyOutcome {
                is_new: true,
                value: SubscriptionId::from_uuid(id),
            });
        }

        let existing = self.try_get(key).await?.ok_or_else(|| {
            IdempotencyError::Database(format!("idempotency key {key} vanished after conflict"))
        })?;
        Ok(IdempotencyOutcome {
            is_new: false,
            value: existing,
        })
    }

    #[instrument(skip(self, key), fields(key = %key), err)]
    async fn try_get(&self, key: &IdempotencyKey) -> Result<Option<SubscriptionId>, IdempotencyError> {
        let id: Option<Uuid> =
            sqlx::query_scalar("SELECT subscription_id FROM idempotency_keys WHERE key = $1")
                .bind(key.as_str())
                .fetch_optional(&*self.pool)
                .await
                .map_err(|e| db_error("select idempotency key", e))?;
        Ok(id.map(SubscriptionId::from_uuid))
    }
}
