use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::order::{OrderNumber, RmaNumber};
use crate::metrics::Metrics;
use crate::utils::{retry_on_transient, IsTransient, RetryConfig, RetryResult};
use super::error::ServiceError;

// ============================================================================
// Document Numbers - ORD-YYYYMMDD-NNNNNN / RMA-YYYYMMDD-NNNNNN
// ============================================================================
//
// Values come from a monotonic per-day sequence. The claim table plays the
// part of a unique index: a number that is already taken is a collision,
// and allocation is retried with the next sequence value.
//
// ============================================================================

#[async_trait]
pub trait SequenceGenerator: Send + Sync {
    /// Next value of the named per-day sequence, starting at 1
    async fn next_value(&self, name: &str, day: NaiveDate) -> anyhow::Result<u64>;
}

#[derive(Default)]
pub struct InMemorySequence {
    counters: Mutex<HashMap<(String, NaiveDate), u64>>,
}

impl InMemorySequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move a sequence to `value`; the next call returns `value + 1`
    pub async fn reset(&self, name: &str, day: NaiveDate, value: u64) {
        self.counters.lock().await.insert((name.to_string(), day), value);
    }
}

#[async_trait]
impl SequenceGenerator for InMemorySequence {
    async fn next_value(&self, name: &str, day: NaiveDate) -> anyhow::Result<u64> {
        let mut counters = self.counters.lock().await;
        let counter = counters.entry((name.to_string(), day)).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }
}

#[derive(Debug, thiserror::Error)]
enum AllocationError {
    #[error("Document number {0} is already taken")]
    Collision(String),

    #[error("Sequence failure: {0}")]
    Sequence(#[from] anyhow::Error),
}

impl IsTransient for AllocationError {
    fn is_transient(&self) -> bool {
        matches!(self, AllocationError::Collision(_))
    }
}

#[derive(Default)]
struct Claims {
    by_number: HashMap<String, Uuid>,
    by_owner: HashMap<(&'static str, Uuid), String>,
}

pub struct DocumentNumbers {
    sequence: Arc<dyn SequenceGenerator>,
    claims: Mutex<Claims>,
    retry: RetryConfig,
    metrics: Arc<Metrics>,
}

impl DocumentNumbers {
    pub fn new(sequence: Arc<dyn SequenceGenerator>, metrics: Arc<Metrics>) -> Self {
        Self {
            sequence,
            claims: Mutex::new(Claims::default()),
            retry: RetryConfig::sequence_allocation(),
            metrics,
        }
    }

    /// Number for `order_id`. Asking again for the same order returns the same number.
    pub async fn order_number(&self, day: NaiveDate, order_id: Uuid) -> Result<OrderNumber, ServiceError> {
        let number = self.allocate(OrderNumber::PREFIX, day, order_id, |seq| {
            OrderNumber::new(day, seq).as_str().to_string()
        }).await?;
        Ok(OrderNumber::from_allocated(number))
    }

    /// RMA number for a return on `order_id`
    pub async fn rma_number(&self, day: NaiveDate, order_id: Uuid) -> Result<RmaNumber, ServiceError> {
        let number = self.allocate(RmaNumber::PREFIX, day, order_id, |seq| {
            RmaNumber::new(day, seq).as_str().to_string()
        }).await?;
        Ok(RmaNumber::from_allocated(number))
    }

    /// Owner of a previously allocated number
    pub async fn owner_of(&self, number: &str) -> Option<Uuid> {
        self.claims.lock().await.by_number.get(number).copied()
    }

    /// Register a number allocated elsewhere (index rebuild)
    pub async fn register(&self, prefix: &'static str, number: &str, owner: Uuid) {
        let mut claims = self.claims.lock().await;
        claims.by_number.insert(number.to_string(), owner);
        claims.by_owner.insert((prefix, owner), number.to_string());
    }

    async fn allocate(
        &self,
        prefix: &'static str,
        day: NaiveDate,
        owner: Uuid,
        render: impl Fn(u64) -> String,
    ) -> Result<String, ServiceError> {
        // An owner keeps its number even when asked again on a later day
        if let Some(existing) = self.claims.lock().await.by_owner.get(&(prefix, owner)) {
            return Ok(existing.clone());
        }

        let result = retry_on_transient(self.retry.clone(), |attempt| {
            let render = &render;
            async move {
                if attempt > 1 {
                    self.metrics.record_retry_attempt(prefix, attempt);
                }
                let value = self.sequence.next_value(prefix, day).await?;
                let number = render(value);

                let mut claims = self.claims.lock().await;
                if claims.by_number.contains_key(&number) {
                    return Err(AllocationError::Collision(number));
                }
                claims.by_number.insert(number.clone(), owner);
                claims.by_owner.insert((prefix, owner), number.clone());
                Ok(number)
            }
        })
        .await;

        match result {
            RetryResult::Success(number) => Ok(number),
            RetryResult::Failed(e) => {
                self.metrics.record_retry_outcome(prefix, false);
                Err(ServiceError::Conflict(e.to_string()))
            }
            RetryResult::PermanentFailure(e) => Err(ServiceError::Internal(anyhow::anyhow!(e))),
        }
    }
}
