//! Read model storage: disposable, rebuildable state behind the projections.

pub mod postgres;
pub mod report_store;
pub mod snapshot_store;

pub use postgres::{PostgresReportStore, PostgresSnapshotStore};
pub use report_store::{InMemoryReportStore, ReportStore};
pub use snapshot_store::{InMemorySnapshotStore, SnapshotStore};

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReadModelError {
    #[error("database error: {0}")]
    Database(String),

    #[error("read model lock poisoned")]
    LockPoisoned,

    #[error("invalid query: {0}")]
    InvalidQuery(String),
}
