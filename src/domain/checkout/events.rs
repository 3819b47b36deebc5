use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::pricing::{Coupon, CurrencyCode};
use crate::event_sourcing::DomainEvent;
use super::value_objects::{Address, DeliveryWindow, PaymentMethod, PlacementLine, ShippingMethod};

// ============================================================================
// Checkout Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum CheckoutEvent {
    Started(CheckoutStarted),
    ExpirationRefreshed(CheckoutExpirationRefreshed),
    ShippingAddressSet(AddressSet),
    BillingAddressSet(AddressSet),
    ShippingMethodSet(ShippingMethodSet),
    DeliveryScheduled(DeliveryScheduled),
    PaymentMethodSet(PaymentMethodSet),
    CouponApplied(CheckoutCouponApplied),
    CouponRemoved(CheckoutCouponRemoved),
    NotesSet(CustomerNotesSet),
    PricingRefreshed(PricingRefreshed),
    AwaitingPayment(CheckoutMarker),
    PlacementBegan(PlacementBegan),
    Completed(CheckoutCompleted),
    Abandoned(CheckoutClosed),
    Failed(CheckoutClosed),
}

impl DomainEvent for CheckoutEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CheckoutEvent::Started(_) => "CheckoutStarted",
            CheckoutEvent::ExpirationRefreshed(_) => "CheckoutExpirationRefreshed",
            CheckoutEvent::ShippingAddressSet(_) => "CheckoutShippingAddressSet",
            CheckoutEvent::BillingAddressSet(_) => "CheckoutBillingAddressSet",
            CheckoutEvent::ShippingMethodSet(_) => "CheckoutShippingMethodSet",
            CheckoutEvent::DeliveryScheduled(_) => "CheckoutDeliveryScheduled",
            CheckoutEvent::PaymentMethodSet(_) => "CheckoutPaymentMethodSet",
            CheckoutEvent::CouponApplied(_) => "CheckoutCouponApplied",
            CheckoutEvent::CouponRemoved(_) => "CheckoutCouponRemoved",
            CheckoutEvent::NotesSet(_) => "CheckoutNotesSet",
            CheckoutEvent::PricingRefreshed(_) => "CheckoutPricingRefreshed",
            CheckoutEvent::AwaitingPayment(_) => "CheckoutAwaitingPayment",
            CheckoutEvent::PlacementBegan(_) => "CheckoutPlacementBegan",
            CheckoutEvent::Completed(_) => "CheckoutCompleted",
            CheckoutEvent::Abandoned(_) => "CheckoutAbandoned",
            CheckoutEvent::Failed(_) => "CheckoutFailed",
        }
    }
}

impl CheckoutEvent {
    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            CheckoutEvent::Started(e) => e.at,
            CheckoutEvent::ExpirationRefreshed(e) => e.at,
            CheckoutEvent::ShippingAddressSet(e) | CheckoutEvent::BillingAddressSet(e) => e.at,
            CheckoutEvent::ShippingMethodSet(e) => e.at,
            CheckoutEvent::DeliveryScheduled(e) => e.at,
            CheckoutEvent::PaymentMethodSet(e) => e.at,
            CheckoutEvent::CouponApplied(e) => e.at,
            CheckoutEvent::CouponRemoved(e) => e.at,
            CheckoutEvent::NotesSet(e) => e.at,
            CheckoutEvent::PricingRefreshed(e) => e.at,
            CheckoutEvent::AwaitingPayment(e) => e.at,
            CheckoutEvent::PlacementBegan(e) => e.at,
            CheckoutEvent::Completed(e) => e.at,
            CheckoutEvent::Abandoned(e) | CheckoutEvent::Failed(e) => e.at,
        }
    }
}

/// Pricing is snapshotted from the cart when the session starts
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CheckoutStarted {
    pub cart_id: Uuid,
    pub customer_id: Uuid,
    pub currency: CurrencyCode,
    pub subtotal: Decimal,
    pub cart_discount: Decimal,
    pub tax: Decimal,
    pub expires_at: DateTime<Utc>,
    pub at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CheckoutExpirationRefreshed {
    pub expires_at: DateTime<Utc>,
    pub at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AddressSet {
    pub address: Address,
    pub at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ShippingMethodSet {
    pub method: ShippingMethod,
    pub at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct DeliveryScheduled {
    pub window: DeliveryWindow,
    pub at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PaymentMethodSet {
    pub method: PaymentMethod,
    pub at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CheckoutCouponApplied {
    pub coupon: Coupon,
    pub at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CheckoutCouponRemoved {
    pub coupon_id: Uuid,
    pub at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CustomerNotesSet {
    pub notes: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PricingRefreshed {
    pub subtotal: Decimal,
    pub cart_discount: Decimal,
    pub tax: Decimal,
    pub at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CheckoutMarker {
    pub at: DateTime<Utc>,
}

/// The order id is reserved before any placement side effect happens
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PlacementBegan {
    pub order_id: Uuid,
    #[serde(default)]
    pub lines: Vec<PlacementLine>,
    pub at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CheckoutCompleted {
    pub order_id: Uuid,
    pub at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CheckoutClosed {
    pub reason: String,
    pub at: DateTime<Utc>,
}
