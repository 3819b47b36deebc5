use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::pricing::{self, Coupon};

// ============================================================================
// Cart Value Objects
// ============================================================================

/// Who a cart belongs to. Exactly one of customer or guest session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CartOwner {
    Customer(Uuid),
    Guest(String),
}

impl CartOwner {
    pub fn customer_id(&self) -> Option<Uuid> {
        match self {
            CartOwner::Customer(id) => Some(*id),
            CartOwner::Guest(_) => None,
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        match self {
            CartOwner::Customer(_) => None,
            CartOwner::Guest(session) => Some(session),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            CartOwner::Customer(_) => "customer",
            CartOwner::Guest(_) => "guest",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CartStatus {
    Active,
    Merged,
    Converted,
    Abandoned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbandonReason {
    /// No activity for the abandonment window
    Inactive,
    /// Past `expires_at`
    Expired,
    /// Explicitly discarded by the owner or an operator
    Discarded,
}

/// One line of a cart, unique per variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartItem {
    pub id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Uuid,
    pub shop_id: Uuid,
    pub product_name: String,
    pub quantity: u32,
    /// Current list price of one unit
    pub unit_price: Decimal,
    /// List price when the line was first added
    pub price_at_add: Decimal,
    /// Product discount on one unit
    pub unit_discount: Decimal,
    /// `unit_discount × quantity`
    pub discount_amount: Decimal,
    /// `max(0, unit_price × quantity − discount_amount)`
    pub total_price: Decimal,
    pub saved_for_later: bool,
    pub added_at: DateTime<Utc>,
}

impl CartItem {
    pub fn recalculate(&mut self) {
        self.discount_amount = pricing::round_money(self.unit_discount * Decimal::from(self.quantity));
        self.total_price = pricing::line_total(self.unit_price, self.quantity, self.discount_amount);
    }

    /// Price actually charged for one unit
    pub fn charged_unit_price(&self) -> Decimal {
        pricing::non_negative(self.unit_price - self.unit_discount)
    }

    pub fn has_price_changed(&self) -> bool {
        self.unit_price != self.price_at_add
    }

    pub fn is_active(&self) -> bool {
        !self.saved_for_later
    }
}

/// Coupon attached to a cart with the discount it currently yields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartCoupon {
    pub coupon: Coupon,
    pub discount_amount: Decimal,
}

/// Denormalized totals over active items only
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CartTotals {
    pub subtotal: Decimal,
    pub discount_total: Decimal,
    pub shipping_estimate: Decimal,
    pub tax_estimate: Decimal,
    pub total_estimate: Decimal,
    pub item_count: u32,
}
