use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::checkout::{Address, DeliveryWindow, PaymentMethod, ShippingMethod};
use crate::domain::pricing::{self, CouponSnapshot, CurrencyCode, PriceBreakdown};
use crate::event_sourcing::Aggregate;
use super::commands::OrderCommand;
use super::errors::OrderError;
use super::events::*;
use super::value_objects::*;

// ============================================================================
// Order Aggregate - Domain Logic
// ============================================================================

#[derive(Debug, Clone)]
pub struct OrderAggregate {
    // Identity
    pub id: Uuid,
    pub version: i64,
    pub order_number: OrderNumber,

    // Ownership
    pub customer_id: Uuid,
    pub shop_id: Uuid,
    pub checkout_id: Uuid,
    pub cart_id: Uuid,

    // Current State (derived from events)
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub items: Vec<OrderItem>,
    pub status_history: Vec<StatusHistoryEntry>,

    // Pricing snapshot, immutable after placement
    pub currency: CurrencyCode,
    pub pricing: PriceBreakdown,
    pub coupon: Option<CouponSnapshot>,
    pub refunded_amount: Decimal,

    // Fulfillment
    pub shipping_address: Address,
    pub billing_address: Option<Address>,
    pub shipping_method: Option<ShippingMethod>,
    pub delivery_window: Option<DeliveryWindow>,
    pub shipping: Option<ShippingInfo>,
    pub estimated_delivery_date: Option<NaiveDate>,
    pub actual_delivery_date: Option<DateTime<Utc>>,

    // Payment
    pub payment_method: Option<PaymentMethod>,
    pub payment_transaction_id: Option<String>,

    pub notes: Option<String>,
    pub cancellation_reason: Option<String>,
    pub return_request: Option<ReturnRequest>,
    pub inspections: Vec<ReturnInspection>,

    // Milestones
    pub placed_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl OrderAggregate {
    pub fn can_be_cancelled(&self) -> bool {
        self.status.can_be_cancelled()
    }

    pub fn can_be_modified(&self) -> bool {
        self.status.can_be_modified()
    }

    pub fn is_paid(&self) -> bool {
        self.payment_status == PaymentStatus::Paid
    }

    pub fn item(&self, item_id: Uuid) -> Option<&OrderItem> {
        self.items.iter().find(|i| i.id == item_id)
    }

    /// Last moment a return can be requested, once delivered
    pub fn return_deadline(&self) -> Option<DateTime<Utc>> {
        self.delivered_at.map(|at| at + Duration::days(RETURN_WINDOW_DAYS))
    }

    pub fn is_within_return_window(&self, now: DateTime<Utc>) -> bool {
        self.return_deadline().is_some_and(|deadline| now <= deadline)
    }

    fn ensure_transition(&self, to: OrderStatus) -> Result<(), OrderError> {
        if self.status.can_transition_to(to) {
            Ok(())
        } else {
            Err(OrderError::InvalidTransition { from: self.status, to })
        }
    }

    fn ensure_modifiable(&self) -> Result<(), OrderError> {
        if self.can_be_modified() {
            Ok(())
        } else {
            Err(OrderError::NotModifiable(self.status))
        }
    }

    fn item_mut(&mut self, item_id: Uuid) -> Result<&mut OrderItem, OrderError> {
        self.items
            .iter_mut()
            .find(|i| i.id == item_id)
            .ok_or(OrderError::ItemNotFound(item_id))
    }

    /// Append the history entry and move to `to`
    fn transition(&mut self, to: OrderStatus, change: &StatusChange) {
        self.status_history.push(StatusHistoryEntry {
            previous_status: Some(self.status),
            new_status: to,
            reason: change.reason.clone(),
            changed_by: change.changed_by.clone(),
            changed_at: change.at,
        });
        self.status = to;
        self.record_milestone(to, change.at);
    }

    fn record_milestone(&mut self, status: OrderStatus, at: DateTime<Utc>) {
        match status {
            OrderStatus::Pending => self.placed_at = at,
            OrderStatus::Confirmed => self.confirmed_at = Some(at),
            OrderStatus::Shipped => self.shipped_at = Some(at),
            OrderStatus::Delivered => self.delivered_at = Some(at),
            OrderStatus::Cancelled => self.cancelled_at = Some(at),
            OrderStatus::Processing
            | OrderStatus::OutForDelivery
            | OrderStatus::ReturnRequested
            | OrderStatus::Returning
            | OrderStatus::Returned
            | OrderStatus::PartiallyReturned => {}
        }
    }

    fn change(reason: &str, changed_by: &str, at: DateTime<Utc>) -> StatusChange {
        StatusChange {
            reason: reason.to_string(),
            changed_by: changed_by.to_string(),
            at,
        }
    }

    fn validate_return_lines(&self, lines: &[ReturnLine]) -> Result<(), OrderError> {
        if lines.is_empty() {
            return Err(OrderError::EmptyReturn);
        }
        for line in lines {
            let item = self.item(line.item_id).ok_or(OrderError::ItemNotFound(line.item_id))?;
            let allowed = item.returnable_quantity();
            if line.quantity == 0 || line.quantity > allowed {
                return Err(OrderError::ReturnQuantityExceeded {
                    item_id: line.item_id,
                    requested: line.quantity,
                    allowed,
                });
            }
        }
        Ok(())
    }

    /// Inspections must stay within what was requested for each line
    fn validate_inspections(&self, inspections: &[ReturnInspection]) -> Result<(), OrderError> {
        let requested: HashMap<Uuid, u32> = self
            .return_request
            .iter()
            .flat_map(|r| r.lines.iter())
            .fold(HashMap::new(), |mut acc, line| {
                *acc.entry(line.item_id).or_default() += line.quantity;
                acc
            });

        let mut inspected: HashMap<Uuid, u32> = HashMap::new();
        for inspection in inspections {
            let allowed = *requested
                .get(&inspection.item_id)
                .ok_or(OrderError::ItemNotFound(inspection.item_id))?;
            let total = inspected.entry(inspection.item_id).or_default();
            *total += inspection.quantity;
            if *total > allowed {
                return Err(OrderError::ReturnQuantityExceeded {
                    item_id: inspection.item_id,
                    requested: *total,
                    allowed,
                });
            }
        }
        Ok(())
    }
}

// ============================================================================
// Aggregate Trait Implementation
// ============================================================================

impl Aggregate for OrderAggregate {
    type Event = OrderEvent;
    type Command = OrderCommand;
    type Error = OrderError;

    const AGGREGATE_TYPE: &'static str = "Order";

    fn apply_first_event(aggregate_id: Uuid, event: &Self::Event) -> Result<Self, Self::Error> {
        let OrderEvent::Placed(e) = event else {
            return Err(OrderError::NotInitialized);
        };

        Ok(Self {
            id: aggregate_id,
            version: 1,
            order_number: e.order_number.clone(),
            customer_id: e.customer_id,
            shop_id: e.shop_id,
            checkout_id: e.checkout_id,
            cart_id: e.cart_id,
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            items: e.items.clone(),
            status_history: vec![StatusHistoryEntry {
                previous_status: None,
                new_status: OrderStatus::Pending,
                reason: e.change.reason.clone(),
                changed_by: e.change.changed_by.clone(),
                changed_at: e.change.at,
            }],
            currency: e.currency.clone(),
            pricing: e.pricing.clone(),
            coupon: e.coupon.clone(),
            refunded_amount: Decimal::ZERO,
            shipping_address: e.shipping_address.clone(),
            billing_address: e.billing_address.clone(),
            shipping_method: e.shipping_method.clone(),
            delivery_window: e.delivery_window.clone(),
            shipping: None,
            estimated_delivery_date: None,
            actual_delivery_date: None,
            payment_method: e.payment_method.clone(),
            payment_transaction_id: None,
            notes: e.notes.clone(),
            cancellation_reason: None,
            return_request: None,
            inspections: Vec::new(),
            placed_at: e.change.at,
            confirmed_at: None,
            shipped_at: None,
            delivered_at: None,
            cancelled_at: None,
            updated_at: e.change.at,
        })
    }

    fn apply_event(&mut self, event: &Self::Event) -> Result<(), Self::Error> {
        let at = match event {
            OrderEvent::Placed(_) => return Err(OrderError::NotInitialized),

            OrderEvent::PaymentConfirmed(e) => {
                self.payment_transaction_id = Some(e.transaction_id.clone());
                self.payment_status = PaymentStatus::Paid;
                self.transition(OrderStatus::Confirmed, &e.change);
                e.change.at
            }
            OrderEvent::ProcessingStarted(change) => {
                self.transition(OrderStatus::Processing, change);
                change.at
            }
            OrderEvent::Shipped(e) => {
                self.shipping = Some(e.shipping.clone());
                self.estimated_delivery_date = Some(e.estimated_delivery_date);
                for item in &mut self.items {
                    item.status = OrderItemStatus::Shipped;
                    item.quantity_shipped = item.quantity;
                }
                self.transition(OrderStatus::Shipped, &e.change);
                e.change.at
            }
            OrderEvent::OutForDelivery(e) => {
                self.estimated_delivery_date = Some(e.estimated_delivery_date);
                self.transition(OrderStatus::OutForDelivery, &e.change);
                e.change.at
            }
            OrderEvent::Delivered(change) => {
                self.actual_delivery_date = Some(change.at);
                for item in &mut self.items {
                    item.status = OrderItemStatus::Delivered;
                }
                self.transition(OrderStatus::Delivered, change);
                change.at
            }
            OrderEvent::Cancelled(e) => {
                for item in &mut self.items {
                    item.status = OrderItemStatus::Cancelled;
                }
                if e.refund_requested {
                    self.payment_status = PaymentStatus::RefundRequested;
                }
                self.cancellation_reason = Some(e.change.reason.clone());
                self.transition(OrderStatus::Cancelled, &e.change);
                e.change.at
            }
            OrderEvent::ReturnRequested(e) => {
                self.return_request = Some(e.request.clone());
                self.transition(OrderStatus::ReturnRequested, &e.change);
                e.change.at
            }
            OrderEvent::ReturnStarted(change) => {
                self.transition(OrderStatus::Returning, change);
                change.at
            }
            OrderEvent::ReturnCompleted(e) => {
                for inspection in e.inspections.iter().filter(|i| i.is_accepted()) {
                    let item = self.item_mut(inspection.item_id)?;
                    item.quantity_returned += inspection.quantity;
                    if inspection.resolution == InspectionResolution::Refund {
                        item.quantity_refunded += inspection.quantity;
                    }
                    item.status = if item.quantity_returned >= item.quantity {
                        OrderItemStatus::Returned
                    } else {
                        OrderItemStatus::PartiallyReturned
                    };
                }
                self.inspections.extend(e.inspections.iter().cloned());

                if e.refund_amount > Decimal::ZERO {
                    self.refunded_amount += e.refund_amount;
                    self.payment_status = if self.refunded_amount >= self.pricing.total {
                        PaymentStatus::Refunded
                    } else {
                        PaymentStatus::PartiallyRefunded
                    };
                }

                let outcome = if e.fully_returned {
                    OrderStatus::Returned
                } else {
                    OrderStatus::PartiallyReturned
                };
                self.transition(outcome, &e.change);
                e.change.at
            }
            OrderEvent::ShippingAddressUpdated(e) => {
                self.shipping_address = e.address.clone();
                e.at
            }
            OrderEvent::NotesUpdated(e) => {
                self.notes = e.notes.clone();
                e.at
            }
        };

        self.updated_at = at;
        self.version += 1;
        Ok(())
    }

    fn handle_create(command: &Self::Command, now: DateTime<Utc>) -> Result<Vec<Self::Event>, Self::Error> {
        let OrderCommand::Place(new) = command else {
            return Err(OrderError::NotInitialized);
        };

        if new.items.is_empty() {
            return Err(OrderError::EmptyItems);
        }
        if let Some(item) = new.items.iter().find(|i| i.quantity == 0) {
            return Err(OrderError::InvalidQuantity(item.quantity));
        }
        let shipping_address = new
            .shipping_address
            .clone()
            .ok_or(OrderError::MissingShippingAddress)?;

        Ok(vec![OrderEvent::Placed(OrderPlaced {
            order_number: new.order_number.clone(),
            customer_id: new.customer_id,
            shop_id: new.shop_id,
            checkout_id: new.checkout_id,
            cart_id: new.cart_id,
            currency: new.currency.clone(),
            items: new.items.clone(),
            pricing: new.pricing.clone(),
            coupon: new.coupon.clone(),
            shipping_address,
            billing_address: new.billing_address.clone(),
            shipping_method: new.shipping_method.clone(),
            delivery_window: new.delivery_window.clone(),
            payment_method: new.payment_method.clone(),
            notes: new.notes.clone(),
            change: Self::change("Order created", SYSTEM_ACTOR, now),
        })])
    }

    fn handle_command(&self, command: &Self::Command, now: DateTime<Utc>) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            OrderCommand::Place(_) => Err(OrderError::InvalidTransition {
                from: self.status,
                to: OrderStatus::Pending,
            }),

            OrderCommand::ConfirmPayment { transaction_id, changed_by } => {
                self.ensure_transition(OrderStatus::Confirmed)?;
                Ok(vec![OrderEvent::PaymentConfirmed(OrderPaymentConfirmed {
                    transaction_id: transaction_id.clone(),
                    change: Self::change("Payment confirmed", changed_by, now),
                })])
            }

            OrderCommand::StartProcessing { changed_by } => {
                self.ensure_transition(OrderStatus::Processing)?;
                Ok(vec![OrderEvent::ProcessingStarted(Self::change(
                    "Fulfillment started",
                    changed_by,
                    now,
                ))])
            }

            OrderCommand::Ship { shipping, changed_by } => {
                self.ensure_transition(OrderStatus::Shipped)?;
                Ok(vec![OrderEvent::Shipped(OrderShipped {
                    shipping: shipping.clone(),
                    estimated_delivery_date: (now + Duration::days(DELIVERY_ESTIMATE_DAYS)).date_naive(),
                    change: Self::change(&format!("Shipped via {}", shipping.carrier), changed_by, now),
                })])
            }

            OrderCommand::MarkOutForDelivery { changed_by } => {
                self.ensure_transition(OrderStatus::OutForDelivery)?;
                Ok(vec![OrderEvent::OutForDelivery(OrderOutForDelivery {
                    estimated_delivery_date: now.date_naive(),
                    change: Self::change("Out for delivery", changed_by, now),
                })])
            }

            OrderCommand::Deliver { changed_by } => {
                self.ensure_transition(OrderStatus::Delivered)?;
                Ok(vec![OrderEvent::Delivered(Self::change("Delivered", changed_by, now))])
            }

            OrderCommand::Cancel { reason, changed_by } => {
                if !self.can_be_cancelled() {
                    return Err(OrderError::NotCancellable(self.status));
                }
                Ok(vec![OrderEvent::Cancelled(OrderCancelled {
                    refund_requested: self.is_paid(),
                    change: Self::change(reason, changed_by, now),
                })])
            }

            OrderCommand::RequestReturn { rma_number, reason, lines, requested_by } => {
                self.ensure_transition(OrderStatus::ReturnRequested)?;
                if let Some(deadline) = self.return_deadline() {
                    if now > deadline {
                        return Err(OrderError::ReturnWindowElapsed { deadline });
                    }
                }
                self.validate_return_lines(lines)?;

                Ok(vec![OrderEvent::ReturnRequested(OrderReturnRequested {
                    request: ReturnRequest {
                        rma_number: rma_number.clone(),
                        reason: reason.clone(),
                        lines: lines.clone(),
                        requested_by: requested_by.clone(),
                        requested_at: now,
                    },
                    change: Self::change(reason, requested_by, now),
                })])
            }

            OrderCommand::StartReturn { changed_by } => {
                self.ensure_transition(OrderStatus::Returning)?;
                Ok(vec![OrderEvent::ReturnStarted(Self::change(
                    "Return shipment received",
                    changed_by,
                    now,
                ))])
            }

            OrderCommand::CompleteReturn { inspections, changed_by } => {
                self.ensure_transition(OrderStatus::Returned)?;
                self.validate_inspections(inspections)?;

                let mut accepted: HashMap<Uuid, u32> = HashMap::new();
                let mut refund_amount = Decimal::ZERO;
                for inspection in inspections.iter().filter(|i| i.is_accepted()) {
                    *accepted.entry(inspection.item_id).or_default() += inspection.quantity;
                    if inspection.resolution == InspectionResolution::Refund {
                        if let Some(item) = self.item(inspection.item_id) {
                            refund_amount += item.charged_per_unit() * Decimal::from(inspection.quantity);
                        }
                    }
                }

                let fully_returned = self.items.iter().all(|item| {
                    item.quantity_returned + accepted.get(&item.id).copied().unwrap_or(0) >= item.quantity
                });
                let refund_amount = pricing::non_negative(
                    refund_amount.min(self.pricing.total - self.refunded_amount),
                );

                Ok(vec![OrderEvent::ReturnCompleted(OrderReturnCompleted {
                    inspections: inspections.clone(),
                    fully_returned,
                    refund_amount,
                    change: Self::change("Return inspected", changed_by, now),
                })])
            }

            OrderCommand::UpdateShippingAddress { address } => {
                self.ensure_modifiable()?;
                Ok(vec![OrderEvent::ShippingAddressUpdated(OrderShippingAddressUpdated {
                    address: address.clone(),
                    at: now,
                })])
            }

            OrderCommand::UpdateNotes { notes } => {
                self.ensure_modifiable()?;
                Ok(vec![OrderEvent::NotesUpdated(OrderNotesUpdated {
                    notes: notes.clone(),
                    at: now,
                })])
            }
        }
    }

    fn aggregate_id(&self) -> Uuid {
        self.id
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn empty_history_error() -> Self::Error {
        OrderError::NotInitialized
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
