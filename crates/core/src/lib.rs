//! `flowops-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod aggregate;
pub mod cancellation;
pub mod clock;
pub mod error;
pub mod id;
pub mod money;

pub use aggregate::AggregateRoot;
pub use cancellation::{Cancellation, Cancelled};
pub use clock::{Clock, FixedClock, ManualClock, SystemClock};
pub use error::{DomainError, DomainResult, ErrorKind};
pub use id::{CustomerId, InvoiceId, SubscriptionId};
pub use money::{DEFAULT_CURRENCY, Money};
