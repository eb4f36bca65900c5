use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::RwLock;

use async_trait::async_trait;

use flowops_core::SubscriptionId;

use super::{IdempotencyError, IdempotencyKey, IdempotencyOutcome, IdempotencyStore};

/// In-memory idempotency store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryIdempotencyStore {
    entries: RwLock<HashMap<IdempotencyKey, SubscriptionId>>,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn try_set(
        &self,
        key: &IdempotencyKey,
        value: SubscriptionId,
    ) -> Result<IdempotencyOutcome, IdempotencyError> {
        let mut entries = self.entries.write().map_err(|_| IdempotencyError::LockPoisoned)?;
        Ok(match entries.entry(key.clone()) {
            Entry::Occupied(existing) => IdempotencyOutcome {
                is_new: false,
                value: *existing.get(),
            },
            Entry::Vacant(slot) => {
                slot.insert(value);
                IdempotencyOutcome {
                    is_new: true,
                    value,
                }
            }
        })
    }

    async fn try_get(&self, key: &IdempotencyKey) -> Result<Option<SubscriptionId>, IdempotencyError> {
        let entries = self.entries.read().map_err(|_| IdempotencyError::LockPoisoned)?;
        Ok(entries.get(key).copied())
    }
}
