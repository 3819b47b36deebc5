use std::sync::Arc;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::event_sourcing::core::{Aggregate, DomainEvent, EventEnvelope};
use crate::event_sourcing::store::{EventStore, StoreError};
use crate::utils::{retry_on_transient, IsTransient, RetryConfig, RetryResult};

// ============================================================================
// Command Handler
// ============================================================================
//
// Orchestrates: Command → Aggregate → Events → Event Store
//
// Every command runs as load → decide → append. The append carries the
// version the decision was based on; a concurrent writer makes it fail with
// a conflict, and the whole cycle is retried against fresh state.
//
// ============================================================================

/// Per-command metadata threaded into the event envelopes
#[derive(Debug, Clone, Copy)]
pub struct CommandContext {
    pub correlation_id: Uuid,
    pub user_id: Option<Uuid>,
    pub now: DateTime<Utc>,
}

impl CommandContext {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            user_id: None,
            now,
        }
    }

    pub fn with_user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HandlerError<E> {
    #[error("{aggregate_type} not found: {aggregate_id}")]
    NotFound {
        aggregate_type: &'static str,
        aggregate_id: Uuid,
    },

    #[error("{aggregate_type} already exists: {aggregate_id}")]
    AlreadyExists {
        aggregate_type: &'static str,
        aggregate_id: Uuid,
    },

    #[error("{0}")]
    Domain(E),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl<E> IsTransient for HandlerError<E> {
    fn is_transient(&self) -> bool {
        matches!(self, HandlerError::Store(e) if e.is_transient())
    }
}

pub struct CommandHandler<A: Aggregate> {
    event_store: Arc<dyn EventStore<A::Event>>,
    retry: RetryConfig,
}

impl<A> CommandHandler<A>
where
    A: Aggregate,
    A::Event: DomainEvent,
    A::Command: Sync,
    A::Error: std::fmt::Display + Send,
{
    pub fn new(event_store: Arc<dyn EventStore<A::Event>>) -> Self {
        Self {
            event_store,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn event_store(&self) -> &Arc<dyn EventStore<A::Event>> {
        &self.event_store
    }

    /// Rebuild the aggregate from its stream
    pub async fn load(&self, aggregate_id: Uuid) -> Result<A, HandlerError<A::Error>> {
        let events = self.event_store.load_events(aggregate_id).await?;
        if events.is_empty() {
            return Err(HandlerError::NotFound {
                aggregate_type: A::AGGREGATE_TYPE,
                aggregate_id,
            });
        }
        A::load_from_events(aggregate_id, &events).map_err(HandlerError::Domain)
    }

    /// Start a new stream with a creation command
    pub async fn create(
        &self,
        aggregate_id: Uuid,
        command: &A::Command,
        ctx: CommandContext,
    ) -> Result<A, HandlerError<A::Error>> {
        let domain_events = A::handle_create(command, ctx.now).map_err(HandlerError::Domain)?;

        let first = domain_events.first().ok_or(StoreError::EmptyAppend)?;
        let aggregate = A::apply_first_event(aggregate_id, first).map_err(HandlerError::Domain)?;
        let aggregate = aggregate
            .apply_all(&domain_events[1..])
            .map_err(HandlerError::Domain)?;

        match self.append(aggregate_id, 0, domain_events, ctx).await {
            Ok(_) => Ok(aggregate),
            Err(HandlerError::Store(StoreError::Conflict { .. })) => Err(HandlerError::AlreadyExists {
                aggregate_type: A::AGGREGATE_TYPE,
                aggregate_id,
            }),
            Err(e) => Err(e),
        }
    }

    /// Handle a command against an existing aggregate, retrying on conflicts
    pub async fn handle(
        &self,
        aggregate_id: Uuid,
        command: &A::Command,
        ctx: CommandContext,
    ) -> Result<A, HandlerError<A::Error>> {
        let result = retry_on_transient(self.retry.clone(), |_attempt| {
            self.try_handle(aggregate_id, command, ctx)
        })
        .await;

        match result {
            RetryResult::Success(aggregate) => Ok(aggregate),
            RetryResult::Failed(e) | RetryResult::PermanentFailure(e) => Err(e),
        }
    }

    async fn try_handle(
        &self,
        aggregate_id: Uuid,
        command: &A::Command,
        ctx: CommandContext,
    ) -> Result<A, HandlerError<A::Error>> {
        let aggregate = self.load(aggregate_id).await?;
        let expected_version = aggregate.version();

        let domain_events = aggregate
            .handle_command(command, ctx.now)
            .map_err(HandlerError::Domain)?;

        // Commands that decide "nothing to do" leave the stream untouched
        if domain_events.is_empty() {
            return Ok(aggregate);
        }

        let aggregate = aggregate
            .apply_all(&domain_events)
            .map_err(HandlerError::Domain)?;
        self.append(aggregate_id, expected_version, domain_events, ctx).await?;

        Ok(aggregate)
    }

    async fn append(
        &self,
        aggregate_id: Uuid,
        expected_version: i64,
        domain_events: Vec<A::Event>,
        ctx: CommandContext,
    ) -> Result<i64, HandlerError<A::Error>> {
        let envelopes: Vec<EventEnvelope<A::Event>> = domain_events
            .into_iter()
            .zip(expected_version + 1..)
            .map(|(event, seq)| {
                EventEnvelope::new(aggregate_id, seq, event, ctx.correlation_id, ctx.now)
                    .with_user(ctx.user_id)
            })
            .collect();

        let event_types: Vec<&str> = envelopes.iter().map(|e| e.event_type.as_str()).collect();
        tracing::debug!(
            aggregate_id = %aggregate_id,
            aggregate_type = A::AGGREGATE_TYPE,
            expected_version = expected_version,
            events = ?event_types,
            "Appending events"
        );

        Ok(self
            .event_store
            .append_events(aggregate_id, expected_version, envelopes)
            .await?)
    }
}
