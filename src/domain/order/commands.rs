use uuid::Uuid;

use crate::domain::checkout::{Address, DeliveryWindow, PaymentMethod, ShippingMethod};
use crate::domain::pricing::{CouponSnapshot, CurrencyCode, PriceBreakdown};
use super::value_objects::{OrderItem, OrderNumber, ReturnInspection, ReturnLine, RmaNumber, ShippingInfo};

// ============================================================================
// Order Commands - Represent user intent
// ============================================================================

/// Everything an order is created from, already snapshotted
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub order_number: OrderNumber,
    pub customer_id: Uuid,
    pub shop_id: Uuid,
    pub checkout_id: Uuid,
    pub cart_id: Uuid,
    pub currency: CurrencyCode,
    pub items: Vec<OrderItem>,
    pub pricing: PriceBreakdown,
    pub coupon: Option<CouponSnapshot>,
    pub shipping_address: Option<Address>,
    pub billing_address: Option<Address>,
    pub shipping_method: Option<ShippingMethod>,
    pub delivery_window: Option<DeliveryWindow>,
    pub payment_method: Option<PaymentMethod>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone)]
pub enum OrderCommand {
    Place(Box<NewOrder>),
    ConfirmPayment {
        transaction_id: String,
        changed_by: String,
    },
    StartProcessing {
        changed_by: String,
    },
    Ship {
        shipping: ShippingInfo,
        changed_by: String,
    },
    MarkOutForDelivery {
        changed_by: String,
    },
    Deliver {
        changed_by: String,
    },
    Cancel {
        reason: String,
        changed_by: String,
    },
    RequestReturn {
        rma_number: RmaNumber,
        reason: String,
        lines: Vec<ReturnLine>,
        requested_by: String,
    },
    StartReturn {
        changed_by: String,
    },
    CompleteReturn {
        inspections: Vec<ReturnInspection>,
        changed_by: String,
    },
    UpdateShippingAddress {
        address: Address,
    },
    UpdateNotes {
        notes: Option<String>,
    },
}
