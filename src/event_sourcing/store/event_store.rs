use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::event_sourcing::core::{DomainEvent, EventEnvelope};
use crate::utils::IsTransient;

// ============================================================================
// Event Store - Repository for Events
// ============================================================================
//
// Responsibilities:
// 1. Append events to an aggregate stream (append-only)
// 2. Load event history for aggregates
// 3. Reject appends whose expected version is stale (optimistic concurrency)
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Concurrency conflict on {aggregate_id}: expected version {expected}, but current is {actual}")]
    Conflict {
        aggregate_id: Uuid,
        expected: i64,
        actual: i64,
    },

    #[error("Cannot append empty event list")]
    EmptyAppend,

    #[error("Event serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

impl IsTransient for StoreError {
    fn is_transient(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

#[async_trait]
pub trait EventStore<E: DomainEvent>: Send + Sync {
    /// Append events to the stream; returns the new version
    async fn append_events(
        &self,
        aggregate_id: Uuid,
        expected_version: i64,
        events: Vec<EventEnvelope<E>>,
    ) -> Result<i64, StoreError>;

    /// Load all events for an aggregate, ordered by sequence number
    async fn load_events(&self, aggregate_id: Uuid) -> Result<Vec<EventEnvelope<E>>, StoreError>;

    /// Current version of an aggregate (0 = does not exist)
    async fn get_current_version(&self, aggregate_id: Uuid) -> Result<i64, StoreError>;

    /// Every aggregate id that has at least one event
    async fn aggregate_ids(&self) -> Result<Vec<Uuid>, StoreError>;

    async fn aggregate_exists(&self, aggregate_id: Uuid) -> Result<bool, StoreError> {
        Ok(self.get_current_version(aggregate_id).await? > 0)
    }
}

// ============================================================================
// In-Memory Event Store
// ============================================================================

/// Process-local event store. The write lock serializes the version check
/// and the append, which makes the compare-and-append atomic.
pub struct InMemoryEventStore<E: DomainEvent> {
    aggregate_type_name: String,
    streams: RwLock<HashMap<Uuid, Vec<EventEnvelope<E>>>>,
}

impl<E: DomainEvent> InMemoryEventStore<E> {
    pub fn new(aggregate_type_name: &str) -> Self {
        Self {
            aggregate_type_name: aggregate_type_name.to_string(),
            streams: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl<E: DomainEvent> EventStore<E> for InMemoryEventStore<E> {
    async fn append_events(
        &self,
        aggregate_id: Uuid,
        expected_version: i64,
        events: Vec<EventEnvelope<E>>,
    ) -> Result<i64, StoreError> {
        if events.is_empty() {
            return Err(StoreError::EmptyAppend);
        }

        let mut streams = self.streams.write().await;
        let stream = streams.entry(aggregate_id).or_default();

        let current_version = stream.len() as i64;
        if current_version != expected_version {
            return Err(StoreError::Conflict {
                aggregate_id,
                expected: expected_version,
                actual: current_version,
            });
        }

        let event_count = events.len();
        let mut new_version = expected_version;
        for mut envelope in events {
            new_version += 1;
            envelope.sequence_number = new_version;
            stream.push(envelope);
        }

        tracing::debug!(
            aggregate_id = %aggregate_id,
            aggregate_type = %self.aggregate_type_name,
            new_version = new_version,
            event_count = event_count,
            "Appended events to event store"
        );

        Ok(new_version)
    }

    async fn load_events(&self, aggregate_id: Uuid) -> Result<Vec<EventEnvelope<E>>, StoreError> {
        let streams = self.streams.read().await;
        Ok(streams.get(&aggregate_id).cloned().unwrap_or_default())
    }

    async fn get_current_version(&self, aggregate_id: Uuid) -> Result<i64, StoreError> {
        let streams = self.streams.read().await;
        Ok(streams.get(&aggregate_id).map(|s| s.len() as i64).unwrap_or(0))
    }

    async fn aggregate_ids(&self) -> Result<Vec<Uuid>, StoreError> {
        let streams = self.streams.read().await;
        Ok(streams
            .iter()
            .filter(|(_, events)| !events.is_empty())
            .map(|(id, _)| *id)
            .collect())
    }
}
