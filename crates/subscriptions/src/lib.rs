//! Subscription lifecycle: the aggregate state machine and its repository.

pub mod repository;
pub mod subscription;

pub use repository::{InMemorySubscriptionRepository, SubscriptionRepository};
pub use subscription::{Subscription, SubscriptionStatus};
