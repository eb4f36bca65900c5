//! Integration events and the in-process bus that distributes them.

pub mod bus;
pub mod in_memory_bus;
pub mod integration;

pub use bus::{EventBus, EventHandler, FnHandler, HandlerError, handler_fn};
pub use in_memory_bus::{DeliveryError, HandlerFailure, InMemoryEventBus};
pub use integration::{
    CURRENT_EVENT_VERSION, DecodeError, EventKind, EventType, IntegrationEvent, InvoiceIssued,
    InvoicePaid, SubscriptionActivated, SubscriptionCancelled, SubscriptionExpired,
    SubscriptionResumed, SubscriptionSuspended,
};
