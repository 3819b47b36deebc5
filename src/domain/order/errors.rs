use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::value_objects::OrderStatus;

// ============================================================================
// Order Business Rule Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error("Cannot move order from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("Order cannot be cancelled in status {0}")]
    NotCancellable(OrderStatus),

    #[error("Order cannot be modified in status {0}")]
    NotModifiable(OrderStatus),

    #[error("Return window closed at {deadline}")]
    ReturnWindowElapsed { deadline: DateTime<Utc> },

    #[error("Order items cannot be empty")]
    EmptyItems,

    #[error("Order needs a shipping address")]
    MissingShippingAddress,

    #[error("Invalid item quantity: {0}")]
    InvalidQuantity(u32),

    #[error("Order item not found: {0}")]
    ItemNotFound(Uuid),

    #[error("Return quantity {requested} exceeds {allowed} for item {item_id}")]
    ReturnQuantityExceeded {
        item_id: Uuid,
        requested: u32,
        allowed: u32,
    },

    #[error("A return needs at least one line")]
    EmptyReturn,

    #[error("Aggregate not initialized")]
    NotInitialized,
}
