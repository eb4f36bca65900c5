//! Logical Postgres schema for the event log, read models and idempotency keys.
//!
//! Statements are idempotent (`IF NOT EXISTS`), so [`migrate`] can run on every start.

use sqlx::PgPool;
use tracing::info;

pub const STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS integration_events (
        id          UUID PRIMARY KEY,
        event_type  TEXT NOT NULL,
        occurred_on TIMESTAMPTZ NOT NULL,
        version     INTEGER NOT NULL,
        payload     JSONB NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS integration_events_replay_order
        ON integration_events (occurred_on, id)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS customer_reports (
        customer_id          UUID PRIMARY KEY,
        active_subscriptions BIGINT NOT NULL DEFAULT 0 CHECK (active_subscriptions >= 0),
        total_invoiced       NUMERIC(18, 2) NOT NULL DEFAULT 0,
        total_paid           NUMERIC(18, 2) NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS active_subscription_ids (
        customer_id     UUID NOT NULL,
        subscription_id UUID NOT NULL,
        PRIMARY KEY (customer_id, subscription_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS subscription_snapshots (
        subscription_id UUID PRIMARY KEY,
        customer_id     UUID NOT NULL,
        plan_code       TEXT NOT NULL,
        status          TEXT NOT NULL,
        activated_at    TIMESTAMPTZ NULL,
        expires_at      TIMESTAMPTZ NULL,
        suspended_at    TIMESTAMPTZ NULL,
        resumed_at      TIMESTAMPTZ NULL,
        cancelled_at    TIMESTAMPTZ NULL,
        expired_at      TIMESTAMPTZ NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS subscription_snapshots_customer
        ON subscription_snapshots (customer_id, activated_at DESC)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS idempotency_keys (
        key             VARCHAR(200) PRIMARY KEY,
        subscription_id UUID NOT NULL,
        created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
];

/// Create every table and index that does not exist yet.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::Error> {
    for statement in STATEMENTS {
        sqlx::query(statement).execute(pool).await?;
    }
    info!(statements = STATEMENTS.len(), "schema up to date");
    Ok(())
}
