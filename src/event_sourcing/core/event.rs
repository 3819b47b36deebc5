use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

// ============================================================================
// Event Envelope - Event Metadata
// ============================================================================
//
// Wraps domain events with metadata for proper event sourcing.
// This is GENERIC and works with ANY event type.
//
// ============================================================================

/// Generic Event Envelope - wraps any domain event with metadata
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct EventEnvelope<E> {
    // Event Identity
    pub event_id: Uuid,
    pub aggregate_id: Uuid,
    pub sequence_number: i64,

    // Event Type Information
    pub event_type: String,
    pub event_version: i32,

    // Event Payload
    pub event_data: E,

    // Causation & Correlation
    pub causation_id: Option<Uuid>,
    pub correlation_id: Uuid,

    // Who triggered this event
    pub user_id: Option<Uuid>,

    pub timestamp: DateTime<Utc>,

    pub metadata: HashMap<String, String>,
}

impl<E: DomainEvent> EventEnvelope<E> {
    pub fn new(
        aggregate_id: Uuid,
        sequence_number: i64,
        event_data: E,
        correlation_id: Uuid,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            aggregate_id,
            sequence_number,
            event_type: event_data.event_type().to_string(),
            event_version: E::event_version(),
            event_data,
            causation_id: None,
            correlation_id,
            user_id: None,
            timestamp,
            metadata: HashMap::new(),
        }
    }
}

impl<E> EventEnvelope<E> {
    pub fn with_user(mut self, user_id: Option<Uuid>) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn with_causation(mut self, causation_id: Uuid) -> Self {
        self.causation_id = Some(causation_id);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

// ============================================================================
// Domain Event Trait
// ============================================================================

/// All domain events must implement this trait to be used with the event store.
pub trait DomainEvent: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Stable name of this particular event variant, e.g. "CartItemAdded"
    fn event_type(&self) -> &'static str;

    fn event_version() -> i32 where Self: Sized { 1 }
}

// ============================================================================
// Event Serialization Helpers
// ============================================================================

pub fn serialize_event<E: Serialize>(event: &E) -> Result<String, serde_json::Error> {
    serde_json::to_string(event)
}

pub fn deserialize_event<E: DeserializeOwned>(json: &str) -> Result<E, serde_json::Error> {
    serde_json::from_str(json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize, Deserialize, Clone, Debug)]
    struct TestEvent {
        data: String,
    }

    impl DomainEvent for TestEvent {
        fn event_type(&self) -> &'static str { "TestEvent" }
    }

    #[test]
    fn test_event_envelope_creation() {
        let aggregate_id = Uuid::new_v4();
        let correlation_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();

        let envelope = EventEnvelope::new(
            aggregate_id,
            1,
            TestEvent { data: "test".to_string() },
            correlation_id,
            Utc::now(),
        )
        .with_user(Some(user_id))
        .with_metadata("source", "unit-test");

        assert_eq!(envelope.aggregate_id, aggregate_id);
        assert_eq!(envelope.sequence_number, 1);
        assert_eq!(envelope.event_type, "TestEvent");
        assert_eq!(envelope.event_version, 1);
        assert_eq!(envelope.correlation_id, correlation_id);
        assert_eq!(envelope.user_id, Some(user_id));
        assert_eq!(envelope.metadata.get("source").map(String::as_str), Some("unit-test"));
    }

    #[test]
    fn test_event_serialization() {
        let event = TestEvent { data: "test data".to_string() };

        let json = serialize_event(&event).unwrap();
        let deserialized: TestEvent = deserialize_event(&json).unwrap();

        assert_eq!(event.data, deserialized.data);
    }
}
