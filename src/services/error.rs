use uuid::Uuid;

use crate::domain::cart::CartError;
use crate::domain::checkout::CheckoutError;
use crate::domain::order::OrderError;
use crate::event_sourcing::{HandlerError, StoreError};
use super::inventory::InventoryError;
use super::payment::PaymentError;

// ============================================================================
// Service Errors - what callers of the order lifecycle see
// ============================================================================

/// Coarse classification the transport layer maps to status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidState,
    InsufficientInventory,
    Conflict,
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Insufficient inventory for {product_name}: requested {requested}, available {available}")]
    InsufficientInventory {
        product_id: Uuid,
        variant_id: Uuid,
        product_name: String,
        requested: u32,
        available: u32,
    },

    #[error("{0}")]
    InvalidRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Cart(#[from] CartError),

    #[error(transparent)]
    Checkout(#[from] CheckoutError),

    #[error(transparent)]
    Order(#[from] OrderError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Inventory(#[from] InventoryError),

    #[error(transparent)]
    Payment(#[from] PaymentError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        ServiceError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::NotFound { .. } => ErrorKind::NotFound,
            ServiceError::InsufficientInventory { .. } => ErrorKind::InsufficientInventory,
            ServiceError::InvalidRequest(_) => ErrorKind::InvalidState,
            ServiceError::Conflict(_) => ErrorKind::Conflict,

            ServiceError::Cart(CartError::ItemNotFound(_)) => ErrorKind::NotFound,
            ServiceError::Cart(_) => ErrorKind::InvalidState,
            ServiceError::Checkout(_) => ErrorKind::InvalidState,
            ServiceError::Order(OrderError::ItemNotFound(_)) => ErrorKind::NotFound,
            ServiceError::Order(_) => ErrorKind::InvalidState,

            ServiceError::Store(StoreError::Conflict { .. }) => ErrorKind::Conflict,
            ServiceError::Inventory(InventoryError::Insufficient { .. }) => ErrorKind::InsufficientInventory,
            ServiceError::Store(_)
            | ServiceError::Inventory(_)
            | ServiceError::Payment(_)
            | ServiceError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

impl<E> From<HandlerError<E>> for ServiceError
where
    ServiceError: From<E>,
{
    fn from(err: HandlerError<E>) -> Self {
        match err {
            HandlerError::NotFound { aggregate_type, aggregate_id } => {
                ServiceError::not_found(aggregate_type, aggregate_id)
            }
            HandlerError::AlreadyExists { aggregate_type, aggregate_id } => {
                ServiceError::Conflict(format!("{aggregate_type} {aggregate_id} already exists"))
            }
            HandlerError::Domain(e) => ServiceError::from(e),
            HandlerError::Store(e) => ServiceError::Store(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::checkout::CheckoutStatus;
    use crate::domain::order::OrderStatus;

    #[test]
    fn test_error_kinds() {
        assert_eq!(ServiceError::not_found("Cart", Uuid::nil()).kind(), ErrorKind::NotFound);
        assert_eq!(ServiceError::from(CheckoutError::Expired).kind(), ErrorKind::InvalidState);
        assert_eq!(
            ServiceError::from(CheckoutError::Closed(CheckoutStatus::Completed)).kind(),
            ErrorKind::InvalidState
        );
        assert_eq!(
            ServiceError::from(OrderError::InvalidTransition {
                from: OrderStatus::Pending,
                to: OrderStatus::Shipped
            })
            .kind(),
            ErrorKind::InvalidState
        );
        assert_eq!(ServiceError::from(CartError::ItemNotFound(Uuid::nil())).kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_handler_error_conversion() {
        let not_found: HandlerError<CartError> = HandlerError::NotFound {
            aggregate_type: "Cart",
            aggregate_id: Uuid::nil(),
        };
        let err = ServiceError::from(not_found);
        assert!(err.is_not_found());
        assert!(err.to_string().starts_with("Cart not found"));

        let conflict: HandlerError<OrderError> = HandlerError::Store(StoreError::Conflict {
            aggregate_id: Uuid::nil(),
            expected: 1,
            actual: 2,
        });
        assert_eq!(ServiceError::from(conflict).kind(), ErrorKind::Conflict);

        let domain: HandlerError<OrderError> = HandlerError::Domain(OrderError::EmptyItems);
        assert!(matches!(ServiceError::from(domain), ServiceError::Order(OrderError::EmptyItems)));
    }
}
