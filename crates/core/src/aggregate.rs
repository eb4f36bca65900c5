//! Aggregate root trait for domain models.

/// Aggregate root marker + minimal interface.
///
/// Aggregates decide their own state transitions; this trait only exposes identity and
/// a revision counter so repositories and logs can talk about any aggregate uniformly.
pub trait AggregateRoot {
    /// Strongly-typed aggregate identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the aggregate identifier.
    fn id(&self) -> &Self::Id;

    /// Monotonically increasing version of the aggregate's state.
    ///
    /// Incremented once per successful transition; failed transitions leave it unchanged.
    fn version(&self) -> u64;
}
