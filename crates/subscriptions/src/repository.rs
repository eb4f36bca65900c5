//! Subscription repository: the only owner of live aggregate state.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;

use flowops_core::{AggregateRoot, CustomerId, DomainError, DomainResult, SubscriptionId};

use crate::subscription::Subscription;

/// Storage for subscription aggregates.
///
/// Implementations must make `insert` and `update` atomic per subscription id; no locking
/// across different ids is required.
#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    /// Store a new aggregate. Fails with `Conflict` if the id is already taken.
    async fn insert(&self, subscription: Subscription) -> DomainResult<()>;

    async fn get(&self, id: SubscriptionId) -> DomainResult<Option<Subscription>>;

    /// Run `change` against the current state of `id` and persist the result only if it
    /// returns `Ok`. Concurrent updates of the same id are serialized.
    async fn update<T, F>(&self, id: SubscriptionId, change: F) -> DomainResult<T>
    where
        T: Send,
        F: FnOnce(&mut Subscription) -> DomainResult<T> + Send;

    async fn list_by_customer(&self, customer_id: CustomerId) -> DomainResult<Vec<Subscription>>;
}

#[async_trait]
impl<R> SubscriptionRepository for Arc<R>
where
    R: SubscriptionRepository + ?Sized,
{
    async fn insert(&self, subscription: Subscription) -> DomainResult<()> {
        (**self).insert(subscription).await
    }

    async fn get(&self, id: SubscriptionId) -> DomainResult<Option<Subscription>> {
        (**self).get(id).await
    }

    async fn update<T, F>(&self, id: SubscriptionId, change: F) -> DomainResult<T>
    where
        T: Send,
        F: FnOnce(&mut Subscription) -> DomainResult<T> + Send,
    {
        (**self).update(id, change).await
    }

    async fn list_by_customer(&self, customer_id: CustomerId) -> DomainResult<Vec<Subscription>> {
        (**self).list_by_customer(customer_id).await
    }
}

/// In-memory repository.
///
/// The outer map lock is held only to find or insert an entry; each aggregate has its own
/// mutex, so commands against different subscriptions never wait on each other.
#[derive(Debug, Default)]
pub struct InMemorySubscriptionRepository {
    entries: RwLock<HashMap<SubscriptionId, Arc<Mutex<Subscription>>>>,
}

impl InMemorySubscriptionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entry(&self, id: SubscriptionId) -> Option<Arc<Mutex<Subscription>>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }
}

// Aggregates are only ever replaced wholesale after a successful change, so a poisoned
// lock still guards a consistent value and is safe to recover.
#[async_trait]
impl SubscriptionRepository for InMemorySubscriptionRepository {
    async fn insert(&self, subscription: Subscription) -> DomainResult<()> {
        let id = *subscription.id();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        match entries.entry(id) {
            Entry::Occupied(_) => Err(DomainError::conflict(format!(
                "subscription {id} already exists"
            ))),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(Mutex::new(subscription)));
                Ok(())
            }
        }
    }

    async fn get(&self, id: SubscriptionId) -> DomainResult<Option<Subscription>> {
        Ok(self
            .entry(id)
            .map(|cell| cell.lock().unwrap_or_else(PoisonError::into_inner).clone()))
    }

    async fn update<T, F>(&self, id: SubscriptionId, change: F) -> DomainResult<T>
    where
        T: Send,
        F: FnOnce(&mut Subscription) -> DomainResult<T> + Send,
    {
        let cell = self
            .entry(id)
            .ok_or_else(|| DomainError::not_found(format!("subscription {id}")))?;
        let mut current = cell.lock().unwrap_or_else(PoisonError::into_inner);

        let mut working = current.clone();
        let out = change(&mut working)?;
        *current = working;
        Ok(out)
    }

    async fn list_by_customer(&self, customer_id: CustomerId) -> DomainResult<Vec<Subscription>> {
        let cells: Vec<_> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        let mut found: Vec<Subscription> = cells
            .iter()
            .map(|cell| cell.lock().unwrap_or_else(PoisonError::into_inner).clone())
            .filter(|s| s.customer_id() == customer_id)
            .collect();
        found.sort_by_key(|s| (s.activated_at(), s.id_typed()));
        Ok(found)
    }
}
