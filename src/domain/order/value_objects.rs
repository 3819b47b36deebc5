use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::pricing;

// ============================================================================
// Order Value Objects
// ============================================================================

/// Days after delivery during which a return may be requested
pub const RETURN_WINDOW_DAYS: i64 = 30;

/// Days from shipment to the estimated delivery date
pub const DELIVERY_ESTIMATE_DAYS: i64 = 5;

pub const SYSTEM_ACTOR: &str = "system";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Processing,
    Shipped,
    OutForDelivery,
    Delivered,
    Cancelled,
    ReturnRequested,
    Returning,
    Returned,
    PartiallyReturned,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 11] = [
        OrderStatus::Pending,
        OrderStatus::Confirmed,
        OrderStatus::Processing,
        OrderStatus::Shipped,
        OrderStatus::OutForDelivery,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
        OrderStatus::ReturnRequested,
        OrderStatus::Returning,
        OrderStatus::Returned,
        OrderStatus::PartiallyReturned,
    ];

    /// The full transition graph. Anything not listed is rejected.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;

        match self {
            Pending => matches!(next, Confirmed | Cancelled),
            Confirmed => matches!(next, Processing | Cancelled),
            Processing => matches!(next, Shipped),
            Shipped => matches!(next, OutForDelivery | Delivered),
            OutForDelivery => matches!(next, Delivered),
            Delivered => matches!(next, ReturnRequested),
            ReturnRequested => matches!(next, Returning),
            Returning => matches!(next, Returned | PartiallyReturned),
            Cancelled | Returned | PartiallyReturned => false,
        }
    }

    pub fn can_be_cancelled(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Confirmed)
    }

    pub fn can_be_modified(&self) -> bool {
        matches!(self, OrderStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Confirmed => "CONFIRMED",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Shipped => "SHIPPED",
            OrderStatus::OutForDelivery => "OUT_FOR_DELIVERY",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::ReturnRequested => "RETURN_REQUESTED",
            OrderStatus::Returning => "RETURNING",
            OrderStatus::Returned => "RETURNED",
            OrderStatus::PartiallyReturned => "PARTIALLY_RETURNED",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    Pending,
    Paid,
    /// A refund request for the whole order was issued
    RefundRequested,
    /// Some lines were refunded after a return
    PartiallyRefunded,
    Refunded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderItemStatus {
    Pending,
    Shipped,
    Delivered,
    Cancelled,
    Returned,
    PartiallyReturned,
}

/// Product data frozen at purchase time. Never re-read from the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Uuid,
    pub product_name: String,
    pub sku: String,
    pub image_url: Option<String>,
    pub category: Option<String>,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub cost_price: Decimal,
    pub discount_amount: Decimal,
    pub tax_amount: Decimal,
    /// `max(0, unit_price × quantity − discount_amount + tax_amount)`
    pub total_price: Decimal,
    pub status: OrderItemStatus,
    pub quantity_shipped: u32,
    pub quantity_returned: u32,
    pub quantity_refunded: u32,
}

impl OrderItem {
    pub fn line_total(unit_price: Decimal, quantity: u32, discount_amount: Decimal, tax_amount: Decimal) -> Decimal {
        pricing::non_negative(unit_price * Decimal::from(quantity) - discount_amount + tax_amount)
    }

    /// Amount actually charged for one unit of this line
    pub fn charged_per_unit(&self) -> Decimal {
        if self.quantity == 0 {
            return Decimal::ZERO;
        }
        pricing::round_money(self.total_price / Decimal::from(self.quantity))
    }

    pub fn returnable_quantity(&self) -> u32 {
        self.quantity.saturating_sub(self.quantity_returned)
    }
}

/// One append-only entry per status transition, including creation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusHistoryEntry {
    pub previous_status: Option<OrderStatus>,
    pub new_status: OrderStatus,
    pub reason: String,
    pub changed_by: String,
    pub changed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingInfo {
    pub carrier: String,
    pub tracking_number: String,
    pub tracking_url: Option<String>,
}

fn document_number(prefix: &str, day: NaiveDate, sequence: u64) -> String {
    format!("{}-{}-{:06}", prefix, day.format("%Y%m%d"), sequence)
}

/// `ORD-YYYYMMDD-NNNNNN`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderNumber(String);

impl OrderNumber {
    pub const PREFIX: &'static str = "ORD";

    pub fn new(day: NaiveDate, sequence: u64) -> Self {
        Self(document_number(Self::PREFIX, day, sequence))
    }

    /// Wrap a number handed out earlier
    pub fn from_allocated(number: impl Into<String>) -> Self {
        Self(number.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// `RMA-YYYYMMDD-NNNNNN`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RmaNumber(String);

impl RmaNumber {
    pub const PREFIX: &'static str = "RMA";

    pub fn new(day: NaiveDate, sequence: u64) -> Self {
        Self(document_number(Self::PREFIX, day, sequence))
    }

    /// Wrap a number handed out earlier
    pub fn from_allocated(number: impl Into<String>) -> Self {
        Self(number.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RmaNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnLine {
    pub item_id: Uuid,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnRequest {
    pub rma_number: RmaNumber,
    pub reason: String,
    pub lines: Vec<ReturnLine>,
    pub requested_by: String,
    pub requested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InspectionResolution {
    Refund,
    Exchange,
    StoreCredit,
    Repair,
    Replacement,
    Rejected,
}

/// Warehouse verdict on one returned line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnInspection {
    pub item_id: Uuid,
    pub quantity: u32,
    pub resolution: InspectionResolution,
    /// Goods can go back to sellable stock
    pub restockable: bool,
    pub note: Option<String>,
}

impl ReturnInspection {
    pub fn is_accepted(&self) -> bool {
        self.resolution != InspectionResolution::Rejected
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_path_is_allowed() {
        use OrderStatus::*;
        let path = [Pending, Confirmed, Processing, Shipped, OutForDelivery, Delivered, ReturnRequested, Returning, Returned];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
        assert!(Shipped.can_transition_to(Delivered));
        assert!(Returning.can_transition_to(PartiallyReturned));
    }

    #[test]
    fn test_shortcuts_are_rejected() {
        use OrderStatus::*;
        assert!(!Pending.can_transition_to(Shipped));
        assert!(!Pending.can_transition_to(Delivered));
        assert!(!Processing.can_transition_to(Cancelled));
        assert!(!Delivered.can_transition_to(Cancelled));
        assert!(!Confirmed.can_transition_to(Shipped));
    }

    #[test]
    fn test_terminal_statuses_have_no_exits() {
        use OrderStatus::*;
        for from in [Cancelled, Returned, PartiallyReturned] {
            for to in OrderStatus::ALL {
                assert!(!from.can_transition_to(to));
            }
        }
    }

    #[test]
    fn test_no_self_transitions() {
        for status in OrderStatus::ALL {
            assert!(!status.can_transition_to(status));
        }
    }

    #[test]
    fn test_cancel_and_modify_guards() {
        let cancellable: Vec<_> = OrderStatus::ALL.iter().filter(|s| s.can_be_cancelled()).collect();
        assert_eq!(cancellable, vec![&OrderStatus::Pending, &OrderStatus::Confirmed]);

        let modifiable: Vec<_> = OrderStatus::ALL.iter().filter(|s| s.can_be_modified()).collect();
        assert_eq!(modifiable, vec![&OrderStatus::Pending]);
    }

    #[test]
    fn test_document_numbers() {
        let day = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(OrderNumber::new(day, 42).as_str(), "ORD-20240309-000042");
        assert_eq!(RmaNumber::new(day, 1).to_string(), "RMA-20240309-000001");
    }

    #[test]
    fn test_order_item_line_total_is_clamped() {
        assert_eq!(
            OrderItem::line_total(Decimal::new(5000, 2), 2, Decimal::new(1000, 2), Decimal::ZERO),
            Decimal::new(9000, 2)
        );
        assert_eq!(
            OrderItem::line_total(Decimal::new(100, 2), 1, Decimal::new(500, 2), Decimal::ZERO),
            Decimal::ZERO
        );
    }

    #[test]
    fn test_order_status_serialization() {
        for status in OrderStatus::ALL {
            let json = serde_json::to_string(&status).unwrap();
            let deserialized: OrderStatus = serde_json::from_str(&json).unwrap();
            assert_eq!(status, deserialized);
        }
    }
}
