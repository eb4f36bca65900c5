//! Infrastructure layer: event storage, read models, projections and the services that
//! tie the subscription domain to them.

pub mod billing;
pub mod commands;
pub mod config;
pub mod event_store;
pub mod idempotency;
mod locks;
pub mod projections;
pub mod queries;
pub mod read_model;
pub mod retry;
pub mod schema;

mod integration_tests;

pub use billing::BillingHandler;
pub use commands::{CommandError, CreateOutcome, CreateSubscription, SubscriptionCommandService};
pub use config::{ConfigError, FlowOpsConfig};
pub use event_store::{PublishError, StoringEventBus};
pub use queries::{QueryError, QueryService};
pub use retry::RetryPolicy;
