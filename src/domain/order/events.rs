use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::checkout::{Address, DeliveryWindow, PaymentMethod, ShippingMethod};
use crate::domain::pricing::{CouponSnapshot, CurrencyCode, PriceBreakdown};
use crate::event_sourcing::DomainEvent;
use super::value_objects::{OrderItem, OrderNumber, ReturnInspection, ReturnRequest, ShippingInfo};

// ============================================================================
// Order Events - Domain Events for Order Aggregate
// ============================================================================

/// Order Event - Union type for all order events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OrderEvent {
    Placed(OrderPlaced),
    PaymentConfirmed(OrderPaymentConfirmed),
    ProcessingStarted(StatusChange),
    Shipped(OrderShipped),
    OutForDelivery(OrderOutForDelivery),
    Delivered(StatusChange),
    Cancelled(OrderCancelled),
    ReturnRequested(OrderReturnRequested),
    ReturnStarted(StatusChange),
    ReturnCompleted(OrderReturnCompleted),
    ShippingAddressUpdated(OrderShippingAddressUpdated),
    NotesUpdated(OrderNotesUpdated),
}

impl DomainEvent for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::Placed(_) => "OrderPlaced",
            OrderEvent::PaymentConfirmed(_) => "OrderPaymentConfirmed",
            OrderEvent::ProcessingStarted(_) => "OrderProcessingStarted",
            OrderEvent::Shipped(_) => "OrderShipped",
            OrderEvent::OutForDelivery(_) => "OrderOutForDelivery",
            OrderEvent::Delivered(_) => "OrderDelivered",
            OrderEvent::Cancelled(_) => "OrderCancelled",
            OrderEvent::ReturnRequested(_) => "OrderReturnRequested",
            OrderEvent::ReturnStarted(_) => "OrderReturnStarted",
            OrderEvent::ReturnCompleted(_) => "OrderReturnCompleted",
            OrderEvent::ShippingAddressUpdated(_) => "OrderShippingAddressUpdated",
            OrderEvent::NotesUpdated(_) => "OrderNotesUpdated",
        }
    }
}

// ============================================================================
// Individual Event Types
// ============================================================================

/// Who moved the order, why, and when. Every transition event carries one.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct StatusChange {
    pub reason: String,
    pub changed_by: String,
    pub at: DateTime<Utc>,
}

/// Order Placed - Initial event, holds the full purchase snapshot
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct OrderPlaced {
    pub order_number: OrderNumber,
    pub customer_id: Uuid,
    pub shop_id: Uuid,
    pub checkout_id: Uuid,
    pub cart_id: Uuid,
    pub currency: CurrencyCode,
    pub items: Vec<OrderItem>,
    pub pricing: PriceBreakdown,
    pub coupon: Option<CouponSnapshot>,
    pub shipping_address: Address,
    pub billing_address: Option<Address>,
    pub shipping_method: Option<ShippingMethod>,
    pub delivery_window: Option<DeliveryWindow>,
    pub payment_method: Option<PaymentMethod>,
    pub notes: Option<String>,
    pub change: StatusChange,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct OrderPaymentConfirmed {
    pub transaction_id: String,
    pub change: StatusChange,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct OrderShipped {
    pub shipping: ShippingInfo,
    pub estimated_delivery_date: NaiveDate,
    pub change: StatusChange,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct OrderOutForDelivery {
    pub estimated_delivery_date: NaiveDate,
    pub change: StatusChange,
}

/// Order Cancelled - `refund_requested` is set when the order had been paid
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct OrderCancelled {
    pub refund_requested: bool,
    pub change: StatusChange,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct OrderReturnRequested {
    pub request: ReturnRequest,
    pub change: StatusChange,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct OrderReturnCompleted {
    pub inspections: Vec<ReturnInspection>,
    /// Whether every unit of every line came back accepted
    pub fully_returned: bool,
    pub refund_amount: Decimal,
    pub change: StatusChange,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct OrderShippingAddressUpdated {
    pub address: Address,
    pub at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct OrderNotesUpdated {
    pub notes: Option<String>,
    pub at: DateTime<Utc>,
}
