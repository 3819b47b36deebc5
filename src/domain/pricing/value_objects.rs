use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Pricing Value Objects
// ============================================================================

/// ISO 4217 code carried as an opaque label; no conversion happens here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CurrencyCode(String);

impl CurrencyCode {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into().trim().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CurrencyCode {
    fn default() -> Self {
        Self::new("USD")
    }
}

impl std::fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscountKind {
    /// `value` is a percentage in [0, 100]
    Percentage,
    /// `value` is a flat amount in the order currency
    FixedAmount,
}

/// Catalog-level discount attached to a product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductDiscount {
    pub kind: DiscountKind,
    pub value: Decimal,
}

impl ProductDiscount {
    pub fn percentage(pct: Decimal) -> Self {
        Self { kind: DiscountKind::Percentage, value: pct }
    }

    pub fn fixed(amount: Decimal) -> Self {
        Self { kind: DiscountKind::FixedAmount, value: amount }
    }
}

/// A code-activated discount scoped to one or more shops
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coupon {
    pub id: Uuid,
    pub code: String,
    pub kind: DiscountKind,
    pub value: Decimal,
    /// Net total the order must reach for the coupon to apply
    pub minimum_amount: Decimal,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub is_active: bool,
    pub shop_ids: Vec<Uuid>,
}

impl Coupon {
    pub fn is_linked_to(&self, shop_id: Uuid) -> bool {
        self.shop_ids.contains(&shop_id)
    }
}

/// What an order remembers about the coupon it was placed with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CouponSnapshot {
    pub coupon_id: Uuid,
    pub code: String,
    pub discount_amount: Decimal,
}

/// Totals of a cart, checkout or order. `total` is never negative.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PriceBreakdown {
    pub subtotal: Decimal,
    pub discount_total: Decimal,
    pub shipping: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
}
