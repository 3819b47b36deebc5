use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::pricing::{Coupon, CurrencyCode};
use crate::event_sourcing::DomainEvent;
use super::value_objects::{AbandonReason, CartOwner};

// ============================================================================
// Cart Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum CartEvent {
    Opened(CartOpened),
    ItemAdded(CartItemAdded),
    ItemQuantityIncreased(CartItemQuantityIncreased),
    ItemQuantityChanged(CartItemQuantityChanged),
    ItemRemoved(CartItemRef),
    ItemSavedForLater(CartItemRef),
    ItemMovedToCart(CartItemRef),
    Cleared(CartTouched),
    CouponApplied(CartCouponApplied),
    CouponRemoved(CartCouponRemoved),
    EstimatesUpdated(CartEstimatesUpdated),
    Merged(CartMerged),
    Converted(CartConverted),
    Abandoned(CartAbandoned),
}

impl DomainEvent for CartEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CartEvent::Opened(_) => "CartOpened",
            CartEvent::ItemAdded(_) => "CartItemAdded",
            CartEvent::ItemQuantityIncreased(_) => "CartItemQuantityIncreased",
            CartEvent::ItemQuantityChanged(_) => "CartItemQuantityChanged",
            CartEvent::ItemRemoved(_) => "CartItemRemoved",
            CartEvent::ItemSavedForLater(_) => "CartItemSavedForLater",
            CartEvent::ItemMovedToCart(_) => "CartItemMovedToCart",
            CartEvent::Cleared(_) => "CartCleared",
            CartEvent::CouponApplied(_) => "CartCouponApplied",
            CartEvent::CouponRemoved(_) => "CartCouponRemoved",
            CartEvent::EstimatesUpdated(_) => "CartEstimatesUpdated",
            CartEvent::Merged(_) => "CartMerged",
            CartEvent::Converted(_) => "CartConverted",
            CartEvent::Abandoned(_) => "CartAbandoned",
        }
    }
}

impl CartEvent {
    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            CartEvent::Opened(e) => e.opened_at,
            CartEvent::ItemAdded(e) => e.at,
            CartEvent::ItemQuantityIncreased(e) => e.at,
            CartEvent::ItemQuantityChanged(e) => e.at,
            CartEvent::ItemRemoved(e)
            | CartEvent::ItemSavedForLater(e)
            | CartEvent::ItemMovedToCart(e) => e.at,
            CartEvent::Cleared(e) => e.at,
            CartEvent::CouponApplied(e) => e.at,
            CartEvent::CouponRemoved(e) => e.at,
            CartEvent::EstimatesUpdated(e) => e.at,
            CartEvent::Merged(e) => e.at,
            CartEvent::Converted(e) => e.at,
            CartEvent::Abandoned(e) => e.at,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CartOpened {
    pub owner: CartOwner,
    pub currency: CurrencyCode,
    pub ttl_seconds: i64,
    pub opened_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CartItemAdded {
    pub item_id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Uuid,
    pub shop_id: Uuid,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub unit_discount: Decimal,
    pub at: DateTime<Utc>,
}

/// Same variant added again: quantities accumulate, price refreshes
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CartItemQuantityIncreased {
    pub item_id: Uuid,
    pub added_quantity: u32,
    pub unit_price: Decimal,
    pub unit_discount: Decimal,
    pub at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CartItemQuantityChanged {
    pub item_id: Uuid,
    pub quantity: u32,
    pub at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CartItemRef {
    pub item_id: Uuid,
    pub at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CartTouched {
    pub at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CartCouponApplied {
    pub coupon: Coupon,
    pub at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CartCouponRemoved {
    pub coupon_id: Uuid,
    pub at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CartEstimatesUpdated {
    pub shipping_estimate: Decimal,
    pub tax_estimate: Decimal,
    pub at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CartMerged {
    pub into_cart_id: Uuid,
    pub at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CartConverted {
    pub order_id: Uuid,
    pub at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CartAbandoned {
    pub reason: AbandonReason,
    pub at: DateTime<Utc>,
}
