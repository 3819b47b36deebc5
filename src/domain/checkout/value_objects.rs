use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::pricing;

// ============================================================================
// Checkout Value Objects
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckoutStatus {
    Started,
    ShippingSelected,
    PaymentSelected,
    AwaitingPayment,
    Completed,
    Abandoned,
    Failed,
}

impl CheckoutStatus {
    /// Completed, abandoned and failed sessions are single-use and closed
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CheckoutStatus::Completed | CheckoutStatus::Abandoned | CheckoutStatus::Failed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckoutStep {
    Shipping,
    Payment,
    Review,
}

impl CheckoutStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckoutStep::Shipping => "SHIPPING",
            CheckoutStep::Payment => "PAYMENT",
            CheckoutStep::Review => "REVIEW",
        }
    }
}

/// Postal address. Orders keep a full copy rather than a reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub id: Uuid,
    pub recipient: String,
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub region: Option<String>,
    pub postal_code: String,
    pub country_code: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShippingMethod {
    pub code: String,
    pub name: String,
    pub cost: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryWindow {
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMethod {
    pub id: Uuid,
    /// "card", "wallet", "cod", ...
    pub kind: String,
}

/// A cart line frozen when placement begins. The order and its stock
/// reservations are built from these, never from the live cart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementLine {
    pub product_id: Uuid,
    pub variant_id: Uuid,
    pub shop_id: Uuid,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: Decimal,
    /// Whole-line discount, not per unit
    pub discount_amount: Decimal,
}

impl PlacementLine {
    pub fn total_price(&self) -> Decimal {
        pricing::line_total(self.unit_price, self.quantity, self.discount_amount)
    }
}
