// ============================================================================
// Event Sourcing Store - Persistence Layer
// ============================================================================

pub mod event_store;
#[cfg(feature = "scylla")]
pub mod scylla_store;

pub use event_store::{EventStore, InMemoryEventStore, StoreError};
#[cfg(feature = "scylla")]
pub use scylla_store::ScyllaEventStore;
