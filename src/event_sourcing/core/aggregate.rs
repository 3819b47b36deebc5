use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::event::EventEnvelope;

// ============================================================================
// Aggregate Root Pattern - Event Sourcing Core
// ============================================================================
//
// Key Principles:
// 1. State is derived from events (not stored directly)
// 2. Commands are validated before emitting events
// 3. Events represent facts that have already happened
// 4. Aggregates enforce business invariants
// 5. All state changes flow through events
//
// Children of an aggregate (cart lines, order items, status history) are
// only ever changed by applying one of the root's events.
//
// ============================================================================

/// Generic Aggregate trait - all event-sourced aggregates implement this
///
/// Type Parameters:
/// - `Event`: The domain event type for this aggregate
/// - `Command`: The command type for this aggregate
/// - `Error`: The error type for business rule violations
pub trait Aggregate: Sized + Send + Sync {
    type Event;
    type Command;
    type Error;

    /// Name used in logs and store partitioning ("Cart", "Order", ...)
    const AGGREGATE_TYPE: &'static str;

    /// Create new aggregate from first event
    fn apply_first_event(aggregate_id: Uuid, event: &Self::Event) -> Result<Self, Self::Error>;

    /// Apply subsequent events to update state
    fn apply_event(&mut self, event: &Self::Event) -> Result<(), Self::Error>;

    /// Validate a creation command (no prior state) and emit the first events
    fn handle_create(command: &Self::Command, now: DateTime<Utc>) -> Result<Vec<Self::Event>, Self::Error>;

    /// Handle command and emit events (business logic)
    fn handle_command(&self, command: &Self::Command, now: DateTime<Utc>) -> Result<Vec<Self::Event>, Self::Error>;

    /// Get aggregate ID
    fn aggregate_id(&self) -> Uuid;

    /// Get current version (sequence number of the last applied event)
    fn version(&self) -> i64;

    /// Load aggregate from event history (reconstruct from events)
    fn load_from_events(aggregate_id: Uuid, events: &[EventEnvelope<Self::Event>]) -> Result<Self, Self::Error> {
        let mut iter = events.iter();
        let first = match iter.next() {
            Some(first) => first,
            None => return Err(Self::empty_history_error()),
        };

        let mut aggregate = Self::apply_first_event(aggregate_id, &first.event_data)?;
        for envelope in iter {
            aggregate.apply_event(&envelope.event_data)?;
        }

        Ok(aggregate)
    }

    /// Apply a freshly decided batch of events on top of the current state
    fn apply_all(mut self, events: &[Self::Event]) -> Result<Self, Self::Error> {
        for event in events {
            self.apply_event(event)?;
        }
        Ok(self)
    }

    /// Error returned when asked to rebuild from an empty stream
    fn empty_history_error() -> Self::Error;
}
