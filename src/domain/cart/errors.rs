use uuid::Uuid;

use super::value_objects::CartStatus;

// ============================================================================
// Cart Business Rule Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum CartError {
    #[error("Cart is not active (status: {0:?})")]
    NotActive(CartStatus),

    #[error("Cart item not found: {0}")]
    ItemNotFound(Uuid),

    #[error("Invalid item quantity: {0}")]
    InvalidQuantity(i64),

    #[error("Price cannot be negative")]
    NegativePrice,

    #[error("Coupon {0} is already applied")]
    CouponAlreadyApplied(String),

    #[error("Coupon {0} is not applied to this cart")]
    CouponNotApplied(Uuid),

    #[error("Shipping and tax estimates cannot be negative")]
    NegativeEstimate,

    #[error("Cart was already converted to order {0}")]
    AlreadyConverted(Uuid),

    #[error("A cart cannot be merged into itself")]
    MergeIntoSelf,

    #[error("Cart TTL must be positive")]
    InvalidTtl,

    #[error("Cart has already been opened")]
    AlreadyOpened,

    #[error("Aggregate not initialized")]
    NotInitialized,
}
