//! Duplicate command suppression.
//!
//! A caller-supplied key maps to the subscription id its first successful command produced.
//! The first writer wins; later writers get the original value back and change nothing.
//! Keys are compared exactly (case-sensitive, after trimming) and never expire.

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryIdempotencyStore;
pub use postgres::PostgresIdempotencyStore;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use flowops_core::{DomainError, DomainResult, SubscriptionId};

/// Longest key accepted, in characters.
pub const MAX_KEY_LENGTH: usize = 200;

/// A validated, trimmed idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Absent or blank input yields `None`: such requests are never deduplicated.
    pub fn parse(raw: Option<&str>) -> DomainResult<Option<Self>> {
        let Some(key) = raw.map(str::trim).filter(|k| !k.is_empty()) else {
            return Ok(None);
        };
        if key.chars().count() > MAX_KEY_LENGTH {
            return Err(DomainError::validation(format!(
                "idempotency key must be at most {MAX_KEY_LENGTH} characters"
            )));
        }
        Ok(Some(Self(key.to_string())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of [`IdempotencyStore::try_set`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdempotencyOutcome {
    /// `true` if this call stored the value.
    pub is_new: bool,
    /// The value now associated with the key (the first writer's).
    pub value: SubscriptionId,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IdempotencyError {
    #[error("database error: {0}")]
    Database(String),

    #[error("idempotency store lock poisoned")]
    LockPoisoned,
}

#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Store `value` under `key` unless the key already exists.
    async fn try_set(
        &self,
        key: &IdempotencyKey,
        value: SubscriptionId,
    ) -> Result<IdempotencyOutcome, IdempotencyError>;

    async fn try_get(&self, key: &IdempotencyKey) -> Result<Option<SubscriptionId>, IdempotencyError>;
}

#[async_trait]
impl<S> IdempotencyStore for Arc<S>
where
    S: IdempotencyStore + ?Sized,
{
    async fn try_set(
        &self,
        key: &IdempotencyKey,
        value: SubscriptionId,
    ) -> Result<IdempotencyOutcome, IdempotencyError> {
        (**self).try_set(key, value).await
    }

    async fn try_get(&self, key: &IdempotencyKey) -> Result<Option<SubscriptionId>, IdempotencyError> {
        (**self).try_get(key).await
    }
}
