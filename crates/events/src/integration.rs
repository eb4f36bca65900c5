//! Integration events: immutable facts about subscription and billing lifecycle.
//!
//! Every event travels as an [`IntegrationEvent`] envelope (id, occurrence time, schema
//! version) around a closed [`EventKind`] union. Persisted events carry their [`EventType`]
//! tag next to a JSON payload; decoding goes through [`EventKind::decode`], which switches
//! over the known tags instead of resolving types at runtime.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use flowops_core::{CustomerId, InvoiceId, SubscriptionId};

/// Schema version stamped on every event produced by this crate.
pub const CURRENT_EVENT_VERSION: u32 = 1;

/// Stable discriminant of an [`EventKind`] variant.
///
/// The string form is what gets persisted; never rename an existing tag.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventType {
    SubscriptionActivated,
    SubscriptionSuspended,
    SubscriptionResumed,
    SubscriptionCancelled,
    SubscriptionExpired,
    InvoiceIssued,
    InvoicePaid,
}

impl EventType {
    pub const ALL: [EventType; 7] = [
        EventType::SubscriptionActivated,
        EventType::SubscriptionSuspended,
        EventType::SubscriptionResumed,
        EventType::SubscriptionCancelled,
        EventType::SubscriptionExpired,
        EventType::InvoiceIssued,
        EventType::InvoicePaid,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventType::SubscriptionActivated => "subscriptions.subscription.activated",
            EventType::SubscriptionSuspended => "subscriptions.subscription.suspended",
            EventType::SubscriptionResumed => "subscriptions.subscription.resumed",
            EventType::SubscriptionCancelled => "subscriptions.subscription.cancelled",
            EventType::SubscriptionExpired => "subscriptions.subscription.expired",
            EventType::InvoiceIssued => "billing.invoice.issued",
            EventType::InvoicePaid => "billing.invoice.paid",
        }
    }

    /// Resolve a persisted tag. Returns `None` for tags this build does not know.
    pub fn parse(tag: &str) -> Option<EventType> {
        EventType::ALL.into_iter().find(|t| t.as_str() == tag)
    }
}

impl core::fmt::Display for EventType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionActivated {
    pub subscription_id: SubscriptionId,
    pub customer_id: CustomerId,
    pub plan_code: String,
    pub activated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionSuspended {
    pub subscription_id: SubscriptionId,
    pub customer_id: CustomerId,
    pub plan_code: String,
    pub suspended_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionResumed {
    pub subscription_id: SubscriptionId,
    pub customer_id: CustomerId,
    pub plan_code: String,
    pub resumed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionCancelled {
    pub subscription_id: SubscriptionId,
    pub customer_id: CustomerId,
    pub plan_code: String,
    pub cancelled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionExpired {
    pub subscription_id: SubscriptionId,
    pub customer_id: CustomerId,
    pub plan_code: String,
    pub expired_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceIssued {
    pub invoice_id: InvoiceId,
    pub customer_id: CustomerId,
    pub subscription_id: SubscriptionId,
    pub plan_code: String,
    pub amount: Decimal,
    pub currency: String,
    pub issued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoicePaid {
    pub invoice_id: InvoiceId,
    pub customer_id: CustomerId,
    pub subscription_id: SubscriptionId,
    pub amount: Decimal,
    pub currency: String,
    pub paid_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
}

/// Closed set of facts the system publishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    SubscriptionActivated(SubscriptionActivated),
    SubscriptionSuspended(SubscriptionSuspended),
    SubscriptionResumed(SubscriptionResumed),
    SubscriptionCancelled(SubscriptionCancelled),
    SubscriptionExpired(SubscriptionExpired),
    InvoiceIssued(InvoiceIssued),
    InvoicePaid(InvoicePaid),
}

/// Failure to turn a persisted `(tag, payload)` pair back into an [`EventKind`].
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unknown event type tag: {0}")]
    UnknownType(String),

    #[error("malformed payload for {event_type}: {source}")]
    Payload {
        event_type: EventType,
        #[source]
        source: serde_json::Error,
    },
}

impl EventKind {
    pub fn event_type(&self) -> EventType {
        match self {
            EventKind::SubscriptionActivated(_) => EventType::SubscriptionActivated,
            EventKind::SubscriptionSuspended(_) => EventType::SubscriptionSuspended,
            EventKind::SubscriptionResumed(_) => EventType::SubscriptionResumed,
            EventKind::SubscriptionCancelled(_) => EventType::SubscriptionCancelled,
            EventKind::SubscriptionExpired(_) => EventType::SubscriptionExpired,
            EventKind::InvoiceIssued(_) => EventType::InvoiceIssued,
            EventKind::InvoicePaid(_) => EventType::InvoicePaid,
        }
    }

    pub fn customer_id(&self) -> CustomerId {
        match self {
            EventKind::SubscriptionActivated(e) => e.customer_id,
            EventKind::SubscriptionSuspended(e) => e.customer_id,
            EventKind::SubscriptionResumed(e) => e.customer_id,
            EventKind::SubscriptionCancelled(e) => e.customer_id,
            EventKind::SubscriptionExpired(e) => e.customer_id,
            EventKind::InvoiceIssued(e) => e.customer_id,
            EventKind::InvoicePaid(e) => e.customer_id,
        }
    }

    pub fn subscription_id(&self) -> SubscriptionId {
        match self {
            EventKind::SubscriptionActivated(e) => e.subscription_id,
            EventKind::SubscriptionSuspended(e) => e.subscription_id,
            EventKind::SubscriptionResumed(e) => e.subscription_id,
            EventKind::SubscriptionCancelled(e) => e.subscription_id,
            EventKind::SubscriptionExpired(e) => e.subscription_id,
            EventKind::InvoiceIssued(e) => e.subscription_id,
            EventKind::InvoicePaid(e) => e.subscription_id,
        }
    }

    /// Serialize the variant's fields (without the tag).
    pub fn to_payload(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            EventKind::SubscriptionActivated(e) => serde_json::to_value(e),
            EventKind::SubscriptionSuspended(e) => serde_json::to_value(e),
            EventKind::SubscriptionResumed(e) => serde_json::to_value(e),
            EventKind::SubscriptionCancelled(e) => serde_json::to_value(e),
            EventKind::SubscriptionExpired(e) => serde_json::to_value(e),
            EventKind::InvoiceIssued(e) => serde_json::to_value(e),
            EventKind::InvoicePaid(e) => serde_json::to_value(e),
        }
    }

    /// Rebuild a variant from its persisted tag and payload.
    pub fn decode(tag: &str, payload: serde_json::Value) -> Result<EventKind, DecodeError> {
        let event_type =
            EventType::parse(tag).ok_or_else(|| DecodeError::UnknownType(tag.to_string()))?;
        let wrap = |source| DecodeError::Payload { event_type, source };

        let kind = match event_type {
            EventType::SubscriptionActivated => {
                EventKind::SubscriptionActivated(serde_json::from_value(payload).map_err(wrap)?)
            }
            EventType::SubscriptionSuspended => {
                EventKind::SubscriptionSuspended(serde_json::from_value(payload).map_err(wrap)?)
            }
            EventType::SubscriptionResumed => {
                EventKind::SubscriptionResumed(serde_json::from_value(payload).map_err(wrap)?)
            }
            EventType::SubscriptionCancelled => {
                EventKind::SubscriptionCancelled(serde_json::from_value(payload).map_err(wrap)?)
            }
            EventType::SubscriptionExpired => {
                EventKind::SubscriptionExpired(serde_json::from_value(payload).map_err(wrap)?)
            }
            EventType::InvoiceIssued => {
                EventKind::InvoiceIssued(serde_json::from_value(payload).map_err(wrap)?)
            }
            EventType::InvoicePaid => {
                EventKind::InvoicePaid(serde_json::from_value(payload).map_err(wrap)?)
            }
        };
        Ok(kind)
    }
}

/// Envelope published on the bus and appended to the store.
///
/// Events are immutable once built; replay order is `(occurred_on, id)` ascending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrationEvent {
    pub id: Uuid,
    pub occurred_on: DateTime<Utc>,
    pub version: u32,
    pub kind: EventKind,
}

impl IntegrationEvent {
    /// Wrap a fact with a fresh UUIDv7 id and the current schema version.
    pub fn new(kind: EventKind, occurred_on: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            occurred_on,
            version: CURRENT_EVENT_VERSION,
            kind,
        }
    }

    /// Replace the generated id (deterministic tests, rehydration).
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    pub fn event_type(&self) -> EventType {
        self.kind.event_type()
    }

    /// Total order used by the store and by replay.
    pub fn ordering_key(&self) -> (DateTime<Utc>, Uuid) {
        (self.occurred_on, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn activated() -> EventKind {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();
        EventKind::SubscriptionActivated(SubscriptionActivated {
            subscription_id: SubscriptionId::new(),
            customer_id: CustomerId::new(),
            plan_code: "BASIC".to_string(),
            activated_at: at,
            expires_at: at + chrono::Months::new(1),
        })
    }

    #[test]
    fn tags_are_unique_and_parse_back() {
        for event_type in EventType::ALL {
            assert_eq!(EventType::parse(event_type.as_str()), Some(event_type));
        }
        let mut tags: Vec<_> = EventType::ALL.iter().map(|t| t.as_str()).collect();
        tags.sort_unstable();
        tags.dedup();
        assert_eq!(tags.len(), EventType::ALL.len());
    }

    #[test]
    fn decode_restores_the_variant_from_tag_and_payload() {
        let kind = activated();
        let payload = kind.to_payload().unwrap();
        let decoded = EventKind::decode(kind.event_type().as_str(), payload).unwrap();
        assert_eq!(decoded, kind);
    }

    #[test]
    fn decode_rejects_unknown_tags() {
        let err = EventKind::decode("legacy.thing.happened", json!({})).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownType(tag) if tag == "legacy.thing.happened"));
    }

    #[test]
    fn decode_rejects_payloads_of_another_variant() {
        let payload = activated().to_payload().unwrap();
        let err = EventKind::decode(EventType::InvoicePaid.as_str(), payload).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::Payload {
                event_type: EventType::InvoicePaid,
                ..
            }
        ));
    }

    #[test]
    fn optional_payment_fields_may_be_absent() {
        let payload = json!({
            "invoice_id": InvoiceId::new(),
            "customer_id": CustomerId::new(),
            "subscription_id": SubscriptionId::new(),
            "amount": "9.99",
            "currency": "PLN",
            "paid_at": "2025-03-01T10:00:00Z",
        });
        let kind = EventKind::decode("billing.invoice.paid", payload).unwrap();
        match kind {
            EventKind::InvoicePaid(paid) => {
                assert_eq!(paid.amount, Decimal::new(999, 2));
                assert!(paid.payment_method.is_none());
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn new_events_use_the_current_version() {
        let event = IntegrationEvent::new(activated(), Utc::now());
        assert_eq!(event.version, CURRENT_EVENT_VERSION);
        assert_eq!(event.event_type(), EventType::SubscriptionActivated);
    }
}
