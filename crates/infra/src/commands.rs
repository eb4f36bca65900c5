//! Subscription command service.
//!
//! Every command follows the same shape: validate against a working copy of the aggregate,
//! append the resulting event through the storing bus, and only then store the new state.
//! A failed append leaves the aggregate untouched, so the command can simply be retried.
//! Commands on one subscription, and creates sharing one idempotency key, run one at a time.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, instrument};

use flowops_billing::RecordPayment;
use flowops_core::{Cancellation, Cancelled, Clock, CustomerId, DomainError, ErrorKind, SubscriptionId};
use flowops_events::{EventBus, EventKind, IntegrationEvent};
use flowops_subscriptions::{Subscription, SubscriptionRepository};

use crate::event_store::PublishError;
use crate::idempotency::{IdempotencyError, IdempotencyKey, IdempotencyStore};
use crate::locks::KeyedLocks;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error("idempotency store failed: {0}")]
    Idempotency(#[from] IdempotencyError),

    #[error("command cancelled")]
    Cancelled,
}

impl From<Cancelled> for CommandError {
    fn from(_: Cancelled) -> Self {
        CommandError::Cancelled
    }
}

impl CommandError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CommandError::Domain(e) => e.kind(),
            CommandError::Publish(e) => e.kind(),
            CommandError::Idempotency(_) => ErrorKind::StoreFailure,
            CommandError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

/// Command: CreateSubscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSubscription {
    pub customer_id: CustomerId,
    pub plan_code: String,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

impl CreateSubscription {
    pub fn new(customer_id: CustomerId, plan_code: impl Into<String>) -> Self {
        Self {
            customer_id,
            plan_code: plan_code.into(),
            idempotency_key: None,
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOutcome {
    pub subscription_id: SubscriptionId,
    /// `true` when the id comes from an earlier command with the same idempotency key.
    pub replayed: bool,
}

type Transition = fn(&mut Subscription, DateTime<Utc>) -> Result<EventKind, DomainError>;

pub struct SubscriptionCommandService<R, B, I> {
    repository: R,
    bus: Arc<B>,
    idempotency: I,
    clock: Arc<dyn Clock>,
    key_locks: KeyedLocks<String>,
    subscription_locks: KeyedLocks<SubscriptionId>,
}

impl<R, B, I> SubscriptionCommandService<R, B, I>
where
    R: SubscriptionRepository,
    B: EventBus<Error = PublishError>,
    I: IdempotencyStore,
{
    pub fn new(repository: R, bus: Arc<B>, idempotency: I, clock: Arc<dyn Clock>) -> Self {
        Self {
            repository,
            bus,
            idempotency,
            clock,
            key_locks: KeyedLocks::new(),
            subscription_locks: KeyedLocks::new(),
        }
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    /// Create and activate a subscription.
    ///
    /// With an idempotency key, a repeated command returns the first command's id and does
    /// nothing else. Concurrent commands with the same key wait for each other, so exactly
    /// one of them creates the subscription. Across processes the idempotency store still
    /// keeps the first writer.
    #[instrument(skip(self, command, cancel), fields(customer_id = %command.customer_id), err)]
    pub async fn create_subscription(
        &self,
        command: CreateSubscription,
        cancel: &Cancellation,
    ) -> Result<CreateOutcome, CommandError> {
        cancel.ensure_active()?;
        let key = IdempotencyKey::parse(command.idempotency_key.as_deref())?;
        let _reserved = match &key {
            Some(key) => Some(self.key_locks.lock(key.as_str().to_string()).await),
            None => None,
        };

        if let Some(key) = &key {
            if let Some(existing) = self.idempotency.try_get(key).await? {
                info!(subscription_id = %existing, "idempotent create replayed");
                return Ok(CreateOutcome {
                    subscription_id: existing,
                    replayed: true,
                });
            }
        }

        let now = self.clock.now();
        let mut subscription =
            Subscription::create(SubscriptionId::new(), command.customer_id, &command.plan_code)?;
        let activated = subscription.activate(now)?;
        let subscription_id = subscription.id_typed();
        cancel.ensure_active()?;

        let published = self.publish(activated, now).await?;
        self.repository.insert(subscription).await?;

        // The activation is durable from here on, so the key is recorded even if a
        // subscriber failed; a retry must not create a second subscription.
        let mut outcome = CreateOutcome {
            subscription_id,
            replayed: false,
        };
        if let Some(key) = &key {
            let stored = self.idempotency.try_set(key, subscription_id).await?;
            if !stored.is_new {
                outcome = CreateOutcome {
                    subscription_id: stored.value,
                    replayed: true,
                };
            }
        }
        published?;

        info!(subscription_id = %outcome.subscription_id, replayed = outcome.replayed, "subscription created");
        Ok(outcome)
    }

    pub async fn cancel(&self, id: SubscriptionId, cancel: &Cancellation) -> Result<(), CommandError> {
        self.transition(id, cancel, Subscription::cancel).await
    }

    pub async fn suspend(&self, id: SubscriptionId, cancel: &Cancellation) -> Result<(), CommandError> {
        self.transition(id, cancel, Subscription::suspend).await
    }

    pub async fn resume(&self, id: SubscriptionId, cancel: &Cancellation) -> Result<(), CommandError> {
        self.transition(id, cancel, Subscription::resume).await
    }

    /// Expire an active subscription whose billing period has ended.
    pub async fn expire(&self, id: SubscriptionId, cancel: &Cancellation) -> Result<(), CommandError> {
        self.transition(id, cancel, Subscription::expire).await
    }

    /// Record a payment for an issued invoice.
    #[instrument(skip(self, command), fields(invoice_id = %command.invoice_id), err)]
    pub async fn record_payment(&self, command: RecordPayment) -> Result<(), CommandError> {
        let now = self.clock.now();
        let paid = command.into_event(now)?;
        self.bus.publish(IntegrationEvent::new(paid, now)).await?;
        Ok(())
    }

    #[instrument(skip(self, cancel, change), fields(subscription_id = %id), err)]
    async fn transition(
        &self,
        id: SubscriptionId,
        cancel: &Cancellation,
        change: Transition,
    ) -> Result<(), CommandError> {
        cancel.ensure_active()?;
        let _held = self.subscription_locks.lock(id).await;

        let current = self
            .repository
            .get(id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("subscription {id}")))?;
        let now = self.clock.now();
        let mut working = current.clone();
        let kind = change(&mut working, now)?;
        let event_type = kind.event_type();

        let published = self.publish(kind, now).await?;
        self.repository
            .update(id, move |stored| {
                if *stored != current {
                    return Err(DomainError::conflict(format!(
                        "subscription {id} changed outside the command service"
                    )));
                }
                *stored = working;
                Ok(())
            })
            .await?;
        published?;

        info!(subscription_id = %id, event_type = %event_type, "subscription transitioned");
        Ok(())
    }

    /// Append and deliver one event.
    ///
    /// The outer error means nothing was appended. The inner one is a delivery failure of an
    /// event that is already durable; callers record their state before surfacing it.
    async fn publish(
        &self,
        kind: EventKind,
        now: DateTime<Utc>,
    ) -> Result<Result<(), PublishError>, CommandError> {
        match self.bus.publish(IntegrationEvent::new(kind, now)).await {
            Ok(()) => Ok(Ok(())),
            Err(err) if err.is_durable() => Ok(Err(err)),
            Err(err) => Err(err.into()),
        }
    }
}
