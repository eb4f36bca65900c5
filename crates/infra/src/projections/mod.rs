//! Projection implementations (read model builders).
//!
//! Projections consume integration events and build query-optimized read models.
//! All projections are:
//! - **Rebuildable**: can be reconstructed from the event log via [`replay::ReplayEngine`]
//! - **Backend-agnostic**: the fold lives here, storage lives in [`crate::read_model`]
//! - **Delivery-tolerant**: safe to run from live bus delivery and from replay

pub mod customer_reports;
pub mod replay;
pub mod subscription_snapshots;

pub use customer_reports::{ActiveChange, CustomerReport, CustomerReportProjection, ReportDelta};
pub use replay::{ReplayEngine, ReplayError, ReplayOptions, ReplaySummary};
pub use subscription_snapshots::{
    SnapshotOrder, SnapshotPage, SnapshotPageQuery, SortDirection, SubscriptionSnapshot,
    SubscriptionSnapshotProjection,
};

use std::sync::Arc;

use async_trait::async_trait;

use flowops_events::{EventBus, EventHandler, EventType, HandlerError, IntegrationEvent};

use crate::read_model::ReadModelError;

/// A read model builder driven by integration events.
#[async_trait]
pub trait Projection: Send + Sync {
    fn name(&self) -> &str;

    /// Whether events of this type change the read model.
    fn handles(&self, event_type: EventType) -> bool;

    async fn apply(&self, event: &IntegrationEvent) -> Result<(), ReadModelError>;

    /// Erase all state so the projection can be rebuilt from scratch.
    async fn reset(&self) -> Result<(), ReadModelError>;
}

#[async_trait]
impl<P> Projection for Arc<P>
where
    P: Projection + ?Sized,
{
    fn name(&self) -> &str {
        (**self).name()
    }

    fn handles(&self, event_type: EventType) -> bool {
        (**self).handles(event_type)
    }

    async fn apply(&self, event: &IntegrationEvent) -> Result<(), ReadModelError> {
        (**self).apply(event).await
    }

    async fn reset(&self) -> Result<(), ReadModelError> {
        (**self).reset().await
    }
}

/// Adapts a [`Projection`] into a bus subscriber.
pub struct ProjectionHandler<P: ?Sized> {
    projection: Arc<P>,
}

impl<P: ?Sized> ProjectionHandler<P> {
    pub fn new(projection: Arc<P>) -> Self {
        Self { projection }
    }
}

#[async_trait]
impl<P> EventHandler for ProjectionHandler<P>
where
    P: Projection + ?Sized + 'static,
{
    fn name(&self) -> &str {
        self.projection.name()
    }

    async fn handle(&self, event: &IntegrationEvent) -> Result<(), HandlerError> {
        self.projection
            .apply(event)
            .await
            .map_err(|e| HandlerError::new(format!("{}: {e}", self.projection.name())))
    }
}

/// Register `projection` on `bus` for every event type it handles.
///
/// Returns how many registrations were made.
pub fn subscribe_projection<B, P>(bus: &B, projection: Arc<P>) -> usize
where
    B: EventBus + ?Sized,
    P: Projection + ?Sized + 'static,
{
    let handler: Arc<dyn EventHandler> = Arc::new(ProjectionHandler::new(Arc::clone(&projection)));
    let mut registered = 0;
    for event_type in EventType::ALL {
        if projection.handles(event_type) {
            bus.subscribe(event_type, Arc::clone(&handler));
            registered += 1;
        }
    }
    registered
}
