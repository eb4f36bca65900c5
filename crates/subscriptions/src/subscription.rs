use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};

use flowops_core::{AggregateRoot, CustomerId, DomainError, DomainResult, SubscriptionId};
use flowops_events::{
    EventKind, SubscriptionActivated, SubscriptionCancelled, SubscriptionExpired,
    SubscriptionResumed, SubscriptionSuspended,
};

/// Length of one billing period, in calendar months.
pub const BILLING_PERIOD_MONTHS: u32 = 1;

/// Subscription status lifecycle.
///
/// `None` is the state of a created but not yet activated subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubscriptionStatus {
    None,
    Active,
    Suspended,
    Canceled,
    Expired,
}

impl SubscriptionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SubscriptionStatus::None => "None",
            SubscriptionStatus::Active => "Active",
            SubscriptionStatus::Suspended => "Suspended",
            SubscriptionStatus::Canceled => "Canceled",
            SubscriptionStatus::Expired => "Expired",
        }
    }

    /// Case-insensitive; accepts the `Cancelled` spelling as well.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "none" => Some(SubscriptionStatus::None),
            "active" => Some(SubscriptionStatus::Active),
            "suspended" => Some(SubscriptionStatus::Suspended),
            "canceled" | "cancelled" => Some(SubscriptionStatus::Canceled),
            "expired" => Some(SubscriptionStatus::Expired),
            _ => None,
        }
    }

    /// Terminal states accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, SubscriptionStatus::Canceled | SubscriptionStatus::Expired)
    }
}

impl core::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate root: Subscription.
///
/// Every transition method checks its guard before touching any field, so a rejected
/// command leaves the aggregate exactly as it was. A successful transition returns the
/// single event describing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    id: SubscriptionId,
    customer_id: CustomerId,
    plan_code: String,
    status: SubscriptionStatus,
    activated_at: Option<DateTime<Utc>>,
    suspended_at: Option<DateTime<Utc>>,
    resumed_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
    version: u64,
}

impl Subscription {
    /// Validate input and build a subscription in status `None`.
    ///
    /// The plan code is trimmed and uppercased.
    pub fn create(
        id: SubscriptionId,
        customer_id: CustomerId,
        plan_code: &str,
    ) -> DomainResult<Self> {
        if customer_id.is_nil() {
            return Err(DomainError::validation("customer id is required"));
        }
        let plan_code = plan_code.trim();
        if plan_code.is_empty() {
            return Err(DomainError::validation("plan code must not be blank"));
        }

        Ok(Self {
            id,
            customer_id,
            plan_code: plan_code.to_uppercase(),
            status: SubscriptionStatus::None,
            activated_at: None,
            suspended_at: None,
            resumed_at: None,
            cancelled_at: None,
            expires_at: None,
            version: 0,
        })
    }

    pub fn id_typed(&self) -> SubscriptionId {
        self.id
    }

    pub fn customer_id(&self) -> CustomerId {
        self.customer_id
    }

    pub fn plan_code(&self) -> &str {
        &self.plan_code
    }

    pub fn status(&self) -> SubscriptionStatus {
        self.status
    }

    pub fn activated_at(&self) -> Option<DateTime<Utc>> {
        self.activated_at
    }

    pub fn suspended_at(&self) -> Option<DateTime<Utc>> {
        self.suspended_at
    }

    pub fn resumed_at(&self) -> Option<DateTime<Utc>> {
        self.resumed_at
    }

    pub fn cancelled_at(&self) -> Option<DateTime<Utc>> {
        self.cancelled_at
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// None → Active. Starts the first billing period.
    pub fn activate(&mut self, now: DateTime<Utc>) -> DomainResult<EventKind> {
        if self.status != SubscriptionStatus::None {
            return Err(self.illegal("activate"));
        }
        let expires_at = now
            .checked_add_months(Months::new(BILLING_PERIOD_MONTHS))
            .ok_or_else(|| DomainError::validation("billing period end is out of range"))?;

        self.status = SubscriptionStatus::Active;
        self.activated_at = Some(now);
        self.expires_at = Some(expires_at);
        self.version += 1;

        Ok(EventKind::SubscriptionActivated(SubscriptionActivated {
            subscription_id: self.id,
            customer_id: self.customer_id,
            plan_code: self.plan_code.clone(),
            activated_at: now,
            expires_at,
        }))
    }

    /// Active → Canceled.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> DomainResult<EventKind> {
        self.require(SubscriptionStatus::Active, "cancel")?;

        self.status = SubscriptionStatus::Canceled;
        self.cancelled_at = Some(now);
        self.version += 1;

        Ok(EventKind::SubscriptionCancelled(SubscriptionCancelled {
            subscription_id: self.id,
            customer_id: self.customer_id,
            plan_code: self.plan_code.clone(),
            cancelled_at: now,
        }))
    }

    /// Active → Suspended.
    pub fn suspend(&mut self, now: DateTime<Utc>) -> DomainResult<EventKind> {
        self.require(SubscriptionStatus::Active, "suspend")?;

        self.status = SubscriptionStatus::Suspended;
        self.suspended_at = Some(now);
        self.version += 1;

        Ok(EventKind::SubscriptionSuspended(SubscriptionSuspended {
            subscription_id: self.id,
            customer_id: self.customer_id,
            plan_code: self.plan_code.clone(),
            suspended_at: now,
        }))
    }

    /// Suspended → Active.
    pub fn resume(&mut self, now: DateTime<Utc>) -> DomainResult<EventKind> {
        self.require(SubscriptionStatus::Suspended, "resume")?;

        self.status = SubscriptionStatus::Active;
        self.resumed_at = Some(now);
        self.version += 1;

        Ok(EventKind::SubscriptionResumed(SubscriptionResumed {
            subscription_id: self.id,
            customer_id: self.customer_id,
            plan_code: self.plan_code.clone(),
            resumed_at: now,
        }))
    }

    /// Active → Expired, once the current period has ended.
    pub fn expire(&mut self, now: DateTime<Utc>) -> DomainResult<EventKind> {
        self.require(SubscriptionStatus::Active, "expire")?;
        match self.expires_at {
            Some(expires_at) if now >= expires_at => {}
            Some(expires_at) => {
                return Err(DomainError::illegal_transition(format!(
                    "cannot expire subscription {} before {expires_at}",
                    self.id
                )));
            }
            None => return Err(self.illegal("expire")),
        }

        self.status = SubscriptionStatus::Expired;
        self.version += 1;

        Ok(EventKind::SubscriptionExpired(SubscriptionExpired {
            subscription_id: self.id,
            customer_id: self.customer_id,
            plan_code: self.plan_code.clone(),
            expired_at: now,
        }))
    }

    fn require(&self, expected: SubscriptionStatus, action: &str) -> DomainResult<()> {
        if self.status == expected {
            Ok(())
        } else {
            Err(self.illegal(action))
        }
    }

    fn illegal(&self, action: &str) -> DomainError {
        DomainError::illegal_transition(format!(
            "cannot {action} subscription {} in status {}",
            self.id, self.status
        ))
    }
}

impl AggregateRoot for Subscription {
    type Id = SubscriptionId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}
