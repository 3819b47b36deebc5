use chrono::Duration;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::pricing::{Coupon, CurrencyCode};
use super::value_objects::{AbandonReason, CartOwner};

// ============================================================================
// Cart Commands - Represent user intent
// ============================================================================

#[derive(Debug, Clone)]
pub enum CartCommand {
    Open {
        owner: CartOwner,
        currency: CurrencyCode,
        ttl: Duration,
    },
    /// Prices come from the catalog at the time of the call
    AddItem {
        product_id: Uuid,
        variant_id: Uuid,
        shop_id: Uuid,
        product_name: String,
        quantity: u32,
        unit_price: Decimal,
        unit_discount: Decimal,
    },
    /// A quantity of zero or less removes the line
    ChangeQuantity {
        item_id: Uuid,
        quantity: i64,
    },
    RemoveItem {
        item_id: Uuid,
    },
    SaveForLater {
        item_id: Uuid,
    },
    MoveToCart {
        item_id: Uuid,
    },
    Clear,
    /// Validity (window, shop, minimum) is checked before this is issued
    ApplyCoupon {
        coupon: Coupon,
    },
    RemoveCoupon {
        coupon_id: Uuid,
    },
    UpdateEstimates {
        shipping_estimate: Decimal,
        tax_estimate: Decimal,
    },
    MarkMerged {
        into_cart_id: Uuid,
    },
    MarkConverted {
        order_id: Uuid,
    },
    MarkAbandoned {
        reason: AbandonReason,
    },
}
