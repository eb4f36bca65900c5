//! Projection replay tooling for rebuilding read models from the event log.
//!
//! The engine reads the whole log once and feeds every event, in store order and one at a
//! time, to each registered projection that handles its type. It does not coordinate with
//! live bus traffic; run it while the bus is quiet or accept that live deltas may
//! interleave with the rebuild.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use flowops_core::{Cancellation, ErrorKind};

use super::Projection;
use crate::event_store::{EventStore, EventStoreError};
use crate::read_model::ReadModelError;

/// Error type for projection replay operations.
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("event store error: {0}")]
    EventStore(#[from] EventStoreError),

    #[error("projection {projection} failed: {source}")]
    Projection {
        projection: String,
        #[source]
        source: ReadModelError,
    },

    #[error("replay cancelled")]
    Cancelled,
}

impl ReplayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReplayError::EventStore(_) | ReplayError::Projection { .. } => ErrorKind::StoreFailure,
            ReplayError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

/// Knobs for a single rebuild.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayOptions {
    /// Erase every projection before replaying. Off by default, so replaying onto live
    /// read models accumulates.
    pub reset_projections: bool,
}

impl ReplayOptions {
    pub fn reset() -> Self {
        Self {
            reset_projections: true,
        }
    }
}

/// Counts reported after a finished rebuild.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplaySummary {
    pub total_events: u64,
    /// Events applied to at least one projection.
    pub handled_events: u64,
    /// Events no registered projection handles.
    pub skipped_events: u64,
}

/// Rebuilds projections from an [`EventStore`].
pub struct ReplayEngine<S> {
    store: S,
    projections: Vec<Arc<dyn Projection>>,
}

impl<S> ReplayEngine<S>
where
    S: EventStore,
{
    pub fn new(store: S, projections: Vec<Arc<dyn Projection>>) -> Self {
        Self { store, projections }
    }

    pub fn projection_names(&self) -> Vec<&str> {
        self.projections.iter().map(|p| p.name()).collect()
    }

    /// Replay the full log into every registered projection.
    ///
    /// Cancellation is checked before each event; writes already applied are kept.
    pub async fn rebuild(
        &self,
        options: ReplayOptions,
        cancel: &Cancellation,
    ) -> Result<ReplaySummary, ReplayError> {
        cancel.ensure_active().map_err(|_| ReplayError::Cancelled)?;

        let events = self.store.get_all().await?;
        let mut summary = ReplaySummary {
            total_events: events.len() as u64,
            ..ReplaySummary::default()
        };
        info!(
            total_events = summary.total_events,
            projections = self.projections.len(),
            reset = options.reset_projections,
            "projection replay started"
        );

        if options.reset_projections {
            for projection in &self.projections {
                projection
                    .reset()
                    .await
                    .map_err(|source| ReplayError::Projection {
                        projection: projection.name().to_string(),
                        source,
                    })?;
            }
        }

        for event in &events {
            if cancel.is_cancelled() {
                warn!(
                    handled_events = summary.handled_events,
                    skipped_events = summary.skipped_events,
                    total_events = summary.total_events,
                    "projection replay cancelled"
                );
                return Err(ReplayError::Cancelled);
            }

            let event_type = event.event_type();
            let mut handled = false;
            for projection in self.projections.iter().filter(|p| p.handles(event_type)) {
                projection
                    .apply(event)
                    .await
                    .map_err(|source| ReplayError::Projection {
                        projection: projection.name().to_string(),
                        source,
                    })?;
                handled = true;
            }

            if handled {
                summary.handled_events += 1;
            } else {
                summary.skipped_events += 1;
            }
        }

        info!(
            total_events = summary.total_events,
            handled_events = summary.handled_events,
            skipped_events = summary.skipped_events,
            "projection replay finished"
        );
        Ok(summary)
    }
}
