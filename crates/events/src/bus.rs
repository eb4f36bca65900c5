//! Event publishing/subscription abstraction (mechanics only).
//!
//! This module provides the **event bus pattern**: an in-process pub/sub router that
//! delivers each [`IntegrationEvent`] to the handlers registered for its [`EventType`].
//!
//! ## Delivery Semantics
//!
//! - Handlers are registered per concrete event type; there is no wildcard fan-out.
//! - One `publish` call invokes each matching handler at most once.
//! - Publishing a type nobody subscribed to is a successful no-op.
//! - Retried publishes and replays may deliver the same event again, so consumers must be
//!   idempotent (at-least-once overall).
//!
//! The bus is for distribution, not storage. Durability is the event store's job; see the
//! storing bus in `flowops-infra`, which appends before it forwards.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::integration::{EventType, IntegrationEvent};

/// Failure reported by a single handler.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// A consumer of integration events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Name used in logs and delivery failure reports.
    fn name(&self) -> &str;

    async fn handle(&self, event: &IntegrationEvent) -> Result<(), HandlerError>;
}

/// Domain-agnostic event bus.
///
/// `publish` completes only once every matching handler has completed or failed.
/// Failures are surfaced through `Self::Error`; handlers that succeeded are not rolled back.
#[async_trait]
pub trait EventBus: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Register `handler` for events of `event_type`. Registration order is kept.
    fn subscribe(&self, event_type: EventType, handler: Arc<dyn EventHandler>);

    async fn publish(&self, event: IntegrationEvent) -> Result<(), Self::Error>;
}

#[async_trait]
impl<B> EventBus for Arc<B>
where
    B: EventBus + ?Sized,
{
    type Error = B::Error;

    fn subscribe(&self, event_type: EventType, handler: Arc<dyn EventHandler>) {
        (**self).subscribe(event_type, handler)
    }

    async fn publish(&self, event: IntegrationEvent) -> Result<(), Self::Error> {
        (**self).publish(event).await
    }
}

/// Adapts an async closure into an [`EventHandler`].
pub struct FnHandler<F> {
    name: String,
    f: F,
}

impl<F> core::fmt::Debug for FnHandler<F> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FnHandler").field("name", &self.name).finish()
    }
}

/// Build a handler from a closure receiving an owned copy of each event.
pub fn handler_fn<F, Fut>(name: impl Into<String>, f: F) -> Arc<dyn EventHandler>
where
    F: Fn(IntegrationEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    Arc::new(FnHandler {
        name: name.into(),
        f,
    })
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(IntegrationEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &IntegrationEvent) -> Result<(), HandlerError> {
        (self.f)(event.clone()).await
    }
}
