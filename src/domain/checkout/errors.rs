use rust_decimal::Decimal;
use uuid::Uuid;

use super::value_objects::CheckoutStatus;

// ============================================================================
// Checkout Business Rule Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum CheckoutError {
    #[error("Checkout session has expired")]
    Expired,

    #[error("Checkout session is closed (status: {0:?})")]
    Closed(CheckoutStatus),

    #[error("Checkout is not ready for order (shipping: {shipping_completed}, payment: {payment_completed})")]
    NotReady {
        shipping_completed: bool,
        payment_completed: bool,
    },

    #[error("Cannot {action} while checkout is {status:?}")]
    InvalidTransition {
        status: CheckoutStatus,
        action: &'static str,
    },

    #[error("Order {0} is already being placed for this checkout")]
    PlacementInProgress(Uuid),

    #[error("Checkout placement is for order {expected:?}, not {actual}")]
    PlacementMismatch {
        expected: Option<Uuid>,
        actual: Uuid,
    },

    #[error("Nothing to place: the cart has no active lines")]
    NothingToPlace,

    #[error("Cart lines add up to {lines}, but the session was priced at {subtotal}")]
    StaleSnapshot { lines: Decimal, subtotal: Decimal },

    #[error("No coupon applied to this checkout")]
    NoCoupon,

    #[error("Amounts cannot be negative")]
    NegativeAmount,

    #[error("Checkout TTL must be positive")]
    InvalidTtl,

    #[error("Checkout has already been started")]
    AlreadyStarted,

    #[error("Aggregate not initialized")]
    NotInitialized,
}
