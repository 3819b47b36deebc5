use chrono::Duration;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::pricing::{Coupon, CurrencyCode};
use super::value_objects::{Address, DeliveryWindow, PaymentMethod, PlacementLine, ShippingMethod};

// ============================================================================
// Checkout Commands
// ============================================================================

#[derive(Debug, Clone)]
pub enum CheckoutCommand {
    Start {
        cart_id: Uuid,
        customer_id: Uuid,
        currency: CurrencyCode,
        subtotal: Decimal,
        cart_discount: Decimal,
        tax: Decimal,
        ttl: Duration,
    },
    RefreshExpiration {
        ttl: Duration,
    },
    SetShippingAddress {
        address: Address,
    },
    SetBillingAddress {
        address: Address,
    },
    SetShippingMethod {
        method: ShippingMethod,
    },
    SetDeliverySchedule {
        window: DeliveryWindow,
    },
    SetPaymentMethod {
        method: PaymentMethod,
    },
    ApplyCoupon {
        coupon: Coupon,
    },
    RemoveCoupon,
    SetCustomerNotes {
        notes: Option<String>,
    },
    /// Re-snapshot cart totals; a no-op when nothing changed
    RefreshPricing {
        subtotal: Decimal,
        cart_discount: Decimal,
        tax: Decimal,
    },
    AwaitPayment,
    /// Freeze `lines` and pin `order_id`; the lines must add up to the
    /// snapshotted subtotal
    BeginPlacement {
        order_id: Uuid,
        lines: Vec<PlacementLine>,
    },
    Complete {
        order_id: Uuid,
    },
    Abandon {
        reason: String,
    },
    Fail {
        reason: String,
    },
}
