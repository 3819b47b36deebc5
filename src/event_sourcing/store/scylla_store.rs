use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use scylla::client::session::Session;
use scylla::response::query_result::QueryResult;
use scylla::statement::batch::Batch;
use scylla::value::{CqlValue, Row};
use std::marker::PhantomData;
use std::sync::Arc;
use uuid::Uuid;

use crate::event_sourcing::core::{serialize_event, DomainEvent, EventEnvelope};
use super::event_store::{EventStore, StoreError};

// ============================================================================
// ScyllaDB Event Store
// ============================================================================
//
// Tables:
// - event_store          ((aggregate_id), sequence_number)  append-only
// - aggregate_sequence   ((aggregate_id))                   current version
//
// The version check is a lightweight transaction on aggregate_sequence, so
// two writers racing on the same aggregate cannot both win. Event rows are
// written afterwards in one batch scoped to the aggregate's partition.
//
// ============================================================================

pub const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS event_store (
        aggregate_id uuid,
        sequence_number bigint,
        aggregate_type text,
        event_id uuid,
        event_type text,
        event_version int,
        event_data text,
        causation_id uuid,
        correlation_id uuid,
        user_id uuid,
        timestamp timestamp,
        PRIMARY KEY ((aggregate_id), sequence_number)
    ) WITH CLUSTERING ORDER BY (sequence_number ASC)",
    "CREATE TABLE IF NOT EXISTS aggregate_sequence (
        aggregate_id uuid PRIMARY KEY,
        aggregate_type text,
        current_sequence bigint,
        updated_at timestamp
    )",
];

type EventRow = (
    Uuid,
    i64,
    String,
    Uuid,
    String,
    i32,
    String,
    Option<Uuid>,
    Uuid,
    Option<Uuid>,
    DateTime<Utc>,
);

pub struct ScyllaEventStore<E: DomainEvent> {
    session: Arc<Session>,
    aggregate_type_name: String,
    _phantom: PhantomData<E>,
}

impl<E: DomainEvent> ScyllaEventStore<E> {
    pub fn new(session: Arc<Session>, aggregate_type_name: &str) -> Self {
        Self {
            session,
            aggregate_type_name: aggregate_type_name.to_string(),
            _phantom: PhantomData,
        }
    }

    /// Create the event tables if they do not exist yet
    pub async fn ensure_schema(session: &Session) -> anyhow::Result<()> {
        for statement in SCHEMA {
            session.query_unpaged(*statement, &[]).await?;
        }
        Ok(())
    }

    /// Claim the next version range with a compare-and-set on the sequence row
    async fn claim_version(
        &self,
        aggregate_id: Uuid,
        expected_version: i64,
        new_version: i64,
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        let result = if expected_version == 0 {
            self.session
                .query_unpaged(
                    "INSERT INTO aggregate_sequence (aggregate_id, aggregate_type, current_sequence, updated_at)
                     VALUES (?, ?, ?, ?) IF NOT EXISTS",
                    (aggregate_id, self.aggregate_type_name.clone(), new_version, now),
                )
                .await
        } else {
            self.session
                .query_unpaged(
                    "UPDATE aggregate_sequence SET current_sequence = ?, updated_at = ?
                     WHERE aggregate_id = ? IF current_sequence = ?",
                    (new_version, now, aggregate_id, expected_version),
                )
                .await
        }
        .map_err(backend)?;

        let (applied, current) = lwt_outcome(result)?;
        if applied {
            return Ok(());
        }

        Err(StoreError::Conflict {
            aggregate_id,
            expected: expected_version,
            actual: current.unwrap_or(0),
        })
    }
}

#[async_trait]
impl<E: DomainEvent> EventStore<E> for ScyllaEventStore<E> {
    async fn append_events(
        &self,
        aggregate_id: Uuid,
        expected_version: i64,
        events: Vec<EventEnvelope<E>>,
    ) -> Result<i64, StoreError> {
        if events.is_empty() {
            return Err(StoreError::EmptyAppend);
        }

        let new_version = expected_version + events.len() as i64;
        self.claim_version(aggregate_id, expected_version, new_version).await?;

        let mut batch = Batch::default();
        let mut values: Vec<EventRow> = Vec::with_capacity(events.len());

        for (envelope, sequence_number) in events.iter().zip(expected_version + 1..) {
            let event_json = serialize_event(&envelope.event_data)?;

            batch.append_statement(
                "INSERT INTO event_store (
                    aggregate_id, sequence_number, aggregate_type, event_id, event_type,
                    event_version, event_data, causation_id, correlation_id, user_id, timestamp
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            );

            values.push((
                aggregate_id,
                sequence_number,
                self.aggregate_type_name.clone(),
                envelope.event_id,
                envelope.event_type.clone(),
                envelope.event_version,
                event_json,
                envelope.causation_id,
                envelope.correlation_id,
                envelope.user_id,
                envelope.timestamp,
            ));
        }

        self.session.batch(&batch, values).await.map_err(backend)?;

        tracing::info!(
            aggregate_id = %aggregate_id,
            aggregate_type = %self.aggregate_type_name,
            new_version = new_version,
            event_count = events.len(),
            "Appended events to event store"
        );

        Ok(new_version)
    }

    async fn load_events(&self, aggregate_id: Uuid) -> Result<Vec<EventEnvelope<E>>, StoreError> {
        let result = self.session
            .query_unpaged(
                "SELECT aggregate_id, sequence_number, aggregate_type, event_id, event_type,
                        event_version, event_data, causation_id, correlation_id, user_id, timestamp
                 FROM event_store
                 WHERE aggregate_id = ?",
                (aggregate_id,),
            )
            .await
            .map_err(backend)?;

        let mut events = Vec::new();

        let rows_result = match result.into_rows_result() {
            Ok(rows) => rows,
            Err(_) => return Ok(events),
        };

        for row in rows_result.rows::<EventRow>().map_err(backend)? {
            let (
                agg_id,
                sequence_number,
                _aggregate_type,
                event_id,
                event_type,
                event_version,
                event_data_json,
                causation_id,
                correlation_id,
                user_id,
                timestamp,
            ) = row.map_err(backend)?;

            let event_data: E = serde_json::from_str(&event_data_json)?;

            events.push(EventEnvelope {
                event_id,
                aggregate_id: agg_id,
                sequence_number,
                event_type,
                event_version,
                event_data,
                causation_id,
                correlation_id,
                user_id,
                timestamp,
                metadata: std::collections::HashMap::new(),
            });
        }

        tracing::debug!("Loaded {} events for aggregate {}", events.len(), aggregate_id);
        Ok(events)
    }

    async fn get_current_version(&self, aggregate_id: Uuid) -> Result<i64, StoreError> {
        let result = self.session
            .query_unpaged(
                "SELECT current_sequence FROM aggregate_sequence WHERE aggregate_id = ?",
                (aggregate_id,),
            )
            .await
            .map_err(backend)?;

        let rows_result = match result.into_rows_result() {
            Ok(rows) => rows,
            Err(_) => return Ok(0),
        };

        match rows_result.maybe_first_row::<(i64,)>() {
            Ok(Some((version,))) => Ok(version),
            _ => Ok(0),
        }
    }

    async fn aggregate_ids(&self) -> Result<Vec<Uuid>, StoreError> {
        let ids: Vec<(Uuid, Option<String>)> = self.session
            .query_iter("SELECT aggregate_id, aggregate_type FROM aggregate_sequence", &[])
            .await
            .map_err(backend)?
            .rows_stream::<(Uuid, Option<String>)>()
            .map_err(backend)?
            .try_collect()
            .await
            .map_err(backend)?;

        Ok(ids
            .into_iter()
            .filter(|(_, kind)| kind.as_deref() == Some(self.aggregate_type_name.as_str()))
            .map(|(id, _)| id)
            .collect())
    }
}

fn backend<E: Into<anyhow::Error>>(error: E) -> StoreError {
    StoreError::Backend(error.into())
}

/// Read `[applied]` (and the current value when rejected) from an LWT result
fn lwt_outcome(result: QueryResult) -> Result<(bool, Option<i64>), StoreError> {
    let rows = result.into_rows_result().map_err(backend)?;
    let row = rows
        .maybe_first_row::<Row>()
        .map_err(backend)?
        .ok_or_else(|| StoreError::Backend(anyhow::anyhow!("LWT returned no rows")))?;

    let applied = matches!(row.columns.first(), Some(Some(CqlValue::Boolean(true))));
    let current = row.columns.iter().skip(1).find_map(|c| match c {
        Some(CqlValue::BigInt(v)) => Some(*v),
        _ => None,
    });

    Ok((applied, current))
}
