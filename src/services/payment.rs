use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::pricing::CurrencyCode;

// ============================================================================
// Payment Collaborator - refund requests only
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefundReason {
    Return,
    Other,
}

impl RefundReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefundReason::Return => "RETURN",
            RefundReason::Other => "OTHER",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequesterType {
    Admin,
    Customer,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefundRequest {
    /// Stable per order and purpose, so a retried cancellation refunds once
    pub idempotency_key: String,
    pub order_id: Uuid,
    pub amount: Decimal,
    pub currency: CurrencyCode,
    pub reason: RefundReason,
    pub note: Option<String>,
    pub requester_id: Option<Uuid>,
    pub requester_type: RequesterType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundReceipt {
    pub refund_id: Uuid,
    /// The gateway had already seen this idempotency key
    pub duplicate: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("Refund rejected: {0}")]
    Rejected(String),

    #[error("Payment gateway unavailable: {0}")]
    Unavailable(#[from] anyhow::Error),
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_refund_request(&self, request: RefundRequest) -> Result<RefundReceipt, PaymentError>;
}

// ============================================================================
// Recording Gateway
// ============================================================================

#[derive(Default)]
struct GatewayState {
    by_key: HashMap<String, Uuid>,
    requests: Vec<RefundRequest>,
    failures_remaining: u32,
}

/// Gateway stand-in that keeps every accepted request in memory
#[derive(Default)]
pub struct RecordingPaymentGateway {
    state: Mutex<GatewayState>,
}

impl RecordingPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` calls fail as if the gateway were down
    pub async fn fail_next(&self, count: u32) {
        self.state.lock().await.failures_remaining = count;
    }

    pub async fn requests(&self) -> Vec<RefundRequest> {
        self.state.lock().await.requests.clone()
    }
}

#[async_trait]
impl PaymentGateway for RecordingPaymentGateway {
    async fn create_refund_request(&self, request: RefundRequest) -> Result<RefundReceipt, PaymentError> {
        let mut state = self.state.lock().await;

        if state.failures_remaining > 0 {
            state.failures_remaining -= 1;
            return Err(PaymentError::Unavailable(anyhow::anyhow!("gateway timeout")));
        }
        if request.amount <= Decimal::ZERO {
            return Err(PaymentError::Rejected(format!("non-positive amount {}", request.amount)));
        }

        if let Some(refund_id) = state.by_key.get(&request.idempotency_key) {
            return Ok(RefundReceipt {
                refund_id: *refund_id,
                duplicate: true,
            });
        }

        let refund_id = Uuid::new_v4();
        tracing::info!(
            refund_id = %refund_id,
            order_id = %request.order_id,
            amount = %request.amount,
            currency = %request.currency,
            reason = request.reason.as_str(),
            "Refund request recorded"
        );
        state.by_key.insert(request.idempotency_key.clone(), refund_id);
        state.requests.push(request);

        Ok(RefundReceipt {
            refund_id,
            duplicate: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(key: &str, amount: Decimal) -> RefundRequest {
        RefundRequest {
            idempotency_key: key.to_string(),
            order_id: Uuid::new_v4(),
            amount,
            currency: CurrencyCode::default(),
            reason: RefundReason::Other,
            note: None,
            requester_id: None,
            requester_type: RequesterType::Admin,
        }
    }

    #[tokio::test]
    async fn test_duplicate_keys_are_recorded_once() {
        let gateway = RecordingPaymentGateway::new();
        let first = gateway.create_refund_request(request("cancel:1", Decimal::from(80))).await.unwrap();
        let second = gateway.create_refund_request(request("cancel:1", Decimal::from(80))).await.unwrap();

        assert!(!first.duplicate);
        assert!(second.duplicate);
        assert_eq!(first.refund_id, second.refund_id);
        assert_eq!(gateway.requests().await.len(), 1);
    }

    #[tokio::test]
    async fn test_simulated_outage() {
        let gateway = RecordingPaymentGateway::new();
        gateway.fail_next(1).await;

        let err = gateway.create_refund_request(request("k", Decimal::ONE)).await.unwrap_err();
        assert!(matches!(err, PaymentError::Unavailable(_)));
        assert!(gateway.create_refund_request(request("k", Decimal::ONE)).await.is_ok());
    }

    #[tokio::test]
    async fn test_zero_amount_is_rejected() {
        let gateway = RecordingPaymentGateway::new();
        let err = gateway.create_refund_request(request("z", Decimal::ZERO)).await.unwrap_err();
        assert!(matches!(err, PaymentError::Rejected(_)));
    }
}
