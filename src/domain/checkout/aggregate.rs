use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::pricing::{self, Coupon, CurrencyCode, PriceBreakdown};
use crate::event_sourcing::Aggregate;
use super::commands::CheckoutCommand;
use super::errors::CheckoutError;
use super::events::*;
use super::value_objects::*;

// ============================================================================
// Checkout Session Aggregate
// ============================================================================
//
// Step-gated: SHIPPING -> PAYMENT -> REVIEW. Side-channel setters (billing,
// shipping method, schedule, coupon, notes) never move the status but do
// reprice. Once placement has begun the session is frozen until it
// completes or fails.
//
// ============================================================================

#[derive(Debug, Clone)]
pub struct CheckoutAggregate {
    pub id: Uuid,
    pub version: i64,

    pub cart_id: Uuid,
    pub customer_id: Uuid,
    pub currency: CurrencyCode,
    pub status: CheckoutStatus,

    pub shipping_completed: bool,
    pub payment_completed: bool,
    pub review_completed: bool,

    pub shipping_address: Option<Address>,
    pub billing_address: Option<Address>,
    pub shipping_method: Option<ShippingMethod>,
    pub delivery_window: Option<DeliveryWindow>,
    pub payment_method: Option<PaymentMethod>,
    pub coupon: Option<Coupon>,
    pub customer_notes: Option<String>,

    // Snapshot of the cart side
    pub subtotal: Decimal,
    pub cart_discount: Decimal,
    pub tax: Decimal,
    /// Derived from the snapshot, the coupon and the shipping method
    pub pricing: PriceBreakdown,
    pub coupon_discount: Decimal,

    pub placement_order_id: Option<Uuid>,
    pub placement_lines: Vec<PlacementLine>,
    pub order_id: Option<Uuid>,
    pub closed_reason: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CheckoutAggregate {
    pub fn current_step(&self) -> CheckoutStep {
        if !self.shipping_completed {
            CheckoutStep::Shipping
        } else if !self.payment_completed {
            CheckoutStep::Payment
        } else {
            CheckoutStep::Review
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Expired sessions that have not reached a terminal state yet
    pub fn needs_expiry(&self, now: DateTime<Utc>) -> bool {
        !self.status.is_terminal() && self.is_expired(now)
    }

    pub fn is_ready_for_order(&self) -> bool {
        self.shipping_address.is_some()
            && self.payment_method.is_some()
            && self.shipping_completed
            && self.payment_completed
            && !self.status.is_terminal()
    }

    pub fn grand_total(&self) -> Decimal {
        self.pricing.total
    }

    fn ensure_open(&self, now: DateTime<Utc>) -> Result<(), CheckoutError> {
        if self.status.is_terminal() {
            return Err(CheckoutError::Closed(self.status));
        }
        if self.is_expired(now) {
            return Err(CheckoutError::Expired);
        }
        Ok(())
    }

    fn ensure_mutable(&self, now: DateTime<Utc>) -> Result<(), CheckoutError> {
        self.ensure_open(now)?;
        match self.placement_order_id {
            Some(order_id) => Err(CheckoutError::PlacementInProgress(order_id)),
            None => Ok(()),
        }
    }

    fn ensure_ready(&self) -> Result<(), CheckoutError> {
        if self.is_ready_for_order() {
            Ok(())
        } else {
            Err(CheckoutError::NotReady {
                shipping_completed: self.shipping_completed,
                payment_completed: self.payment_completed,
            })
        }
    }

    fn reprice(&mut self) {
        let net = pricing::non_negative(self.subtotal - self.cart_discount);
        self.coupon_discount = match &self.coupon {
            Some(coupon) if net >= coupon.minimum_amount => pricing::coupon_discount(coupon, net),
            _ => Decimal::ZERO,
        };
        let shipping = self
            .shipping_method
            .as_ref()
            .map(|m| m.cost)
            .unwrap_or(Decimal::ZERO);

        self.pricing = PriceBreakdown::compute(
            self.subtotal,
            self.cart_discount + self.coupon_discount,
            shipping,
            self.tax,
        );
    }
}

impl Aggregate for CheckoutAggregate {
    type Event = CheckoutEvent;
    type Command = CheckoutCommand;
    type Error = CheckoutError;

    const AGGREGATE_TYPE: &'static str = "CheckoutSession";

    fn apply_first_event(aggregate_id: Uuid, event: &Self::Event) -> Result<Self, Self::Error> {
        let CheckoutEvent::Started(e) = event else {
            return Err(CheckoutError::NotInitialized);
        };

        let mut checkout = Self {
            id: aggregate_id,
            version: 1,
            cart_id: e.cart_id,
            customer_id: e.customer_id,
            currency: e.currency.clone(),
            status: CheckoutStatus::Started,
            shipping_completed: false,
            payment_completed: false,
            review_completed: false,
            shipping_address: None,
            billing_address: None,
            shipping_method: None,
            delivery_window: None,
            payment_method: None,
            coupon: None,
            customer_notes: None,
            subtotal: e.subtotal,
            cart_discount: e.cart_discount,
            tax: e.tax,
            pricing: PriceBreakdown::default(),
            coupon_discount: Decimal::ZERO,
            placement_order_id: None,
            placement_lines: Vec::new(),
            order_id: None,
            closed_reason: None,
            created_at: e.at,
            updated_at: e.at,
            expires_at: e.expires_at,
        };
        checkout.reprice();
        Ok(checkout)
    }

    fn apply_event(&mut self, event: &Self::Event) -> Result<(), Self::Error> {
        match event {
            CheckoutEvent::Started(_) => return Err(CheckoutError::AlreadyStarted),
            CheckoutEvent::ExpirationRefreshed(e) => {
                self.expires_at = e.expires_at;
            }
            CheckoutEvent::ShippingAddressSet(e) => {
                self.shipping_address = Some(e.address.clone());
                self.shipping_completed = true;
                if self.status == CheckoutStatus::Started {
                    self.status = CheckoutStatus::ShippingSelected;
                }
            }
            CheckoutEvent::BillingAddressSet(e) => {
                self.billing_address = Some(e.address.clone());
            }
            CheckoutEvent::ShippingMethodSet(e) => {
                self.shipping_method = Some(e.method.clone());
            }
            CheckoutEvent::DeliveryScheduled(e) => {
                self.delivery_window = Some(e.window.clone());
            }
            CheckoutEvent::PaymentMethodSet(e) => {
                self.payment_method = Some(e.method.clone());
                self.payment_completed = true;
                if matches!(self.status, CheckoutStatus::Started | CheckoutStatus::ShippingSelected) {
                    self.status = CheckoutStatus::PaymentSelected;
                }
            }
            CheckoutEvent::CouponApplied(e) => {
                self.coupon = Some(e.coupon.clone());
            }
            CheckoutEvent::CouponRemoved(_) => {
                self.coupon = None;
            }
            CheckoutEvent::NotesSet(e) => {
                self.customer_notes = e.notes.clone();
            }
            CheckoutEvent::PricingRefreshed(e) => {
                self.subtotal = e.subtotal;
                self.cart_discount = e.cart_discount;
                self.tax = e.tax;
            }
            CheckoutEvent::AwaitingPayment(_) => {
                self.status = CheckoutStatus::AwaitingPayment;
                self.review_completed = true;
            }
            CheckoutEvent::PlacementBegan(e) => {
                self.placement_order_id = Some(e.order_id);
                self.placement_lines = e.lines.clone();
                self.review_completed = true;
            }
            CheckoutEvent::Completed(e) => {
                self.status = CheckoutStatus::Completed;
                self.order_id = Some(e.order_id);
            }
            CheckoutEvent::Abandoned(e) => {
                self.status = CheckoutStatus::Abandoned;
                self.closed_reason = Some(e.reason.clone());
            }
            CheckoutEvent::Failed(e) => {
                self.status = CheckoutStatus::Failed;
                self.closed_reason = Some(e.reason.clone());
            }
        }

        self.reprice();
        self.updated_at = event.occurred_at();
        self.version += 1;
        Ok(())
    }

    fn handle_create(command: &Self::Command, now: DateTime<Utc>) -> Result<Vec<Self::Event>, Self::Error> {
        let CheckoutCommand::Start { cart_id, customer_id, currency, subtotal, cart_discount, tax, ttl } = command else {
            return Err(CheckoutError::NotInitialized);
        };

        if *ttl <= Duration::zero() {
            return Err(CheckoutError::InvalidTtl);
        }
        if subtotal.is_sign_negative() || cart_discount.is_sign_negative() || tax.is_sign_negative() {
            return Err(CheckoutError::NegativeAmount);
        }

        Ok(vec![CheckoutEvent::Started(CheckoutStarted {
            cart_id: *cart_id,
            customer_id: *customer_id,
            currency: currency.clone(),
            subtotal: *subtotal,
            cart_discount: *cart_discount,
            tax: *tax,
            expires_at: now + *ttl,
            at: now,
        })])
    }

    fn handle_command(&self, command: &Self::Command, now: DateTime<Utc>) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            CheckoutCommand::Start { .. } => Err(CheckoutError::AlreadyStarted),

            CheckoutCommand::RefreshExpiration { ttl } => {
                if *ttl <= Duration::zero() {
                    return Err(CheckoutError::InvalidTtl);
                }
                self.ensure_open(now)?;
                Ok(vec![CheckoutEvent::ExpirationRefreshed(CheckoutExpirationRefreshed {
                    expires_at: now + *ttl,
                    at: now,
                })])
            }

            CheckoutCommand::SetShippingAddress { address } => {
                self.ensure_mutable(now)?;
                Ok(vec![CheckoutEvent::ShippingAddressSet(AddressSet {
                    address: address.clone(),
                    at: now,
                })])
            }

            CheckoutCommand::SetBillingAddress { address } => {
                self.ensure_mutable(now)?;
                Ok(vec![CheckoutEvent::BillingAddressSet(AddressSet {
                    address: address.clone(),
                    at: now,
                })])
            }

            CheckoutCommand::SetShippingMethod { method } => {
                self.ensure_mutable(now)?;
                if method.cost.is_sign_negative() {
                    return Err(CheckoutError::NegativeAmount);
                }
                Ok(vec![CheckoutEvent::ShippingMethodSet(ShippingMethodSet {
                    method: method.clone(),
                    at: now,
                })])
            }

            CheckoutCommand::SetDeliverySchedule { window } => {
                self.ensure_mutable(now)?;
                Ok(vec![CheckoutEvent::DeliveryScheduled(DeliveryScheduled {
                    window: window.clone(),
                    at: now,
                })])
            }

            CheckoutCommand::SetPaymentMethod { method } => {
                self.ensure_mutable(now)?;
                Ok(vec![CheckoutEvent::PaymentMethodSet(PaymentMethodSet {
                    method: method.clone(),
                    at: now,
                })])
            }

            CheckoutCommand::ApplyCoupon { coupon } => {
                self.ensure_mutable(now)?;
                Ok(vec![CheckoutEvent::CouponApplied(CheckoutCouponApplied {
                    coupon: coupon.clone(),
                    at: now,
                })])
            }

            CheckoutCommand::RemoveCoupon => {
                self.ensure_mutable(now)?;
                let coupon = self.coupon.as_ref().ok_or(CheckoutError::NoCoupon)?;
                Ok(vec![CheckoutEvent::CouponRemoved(CheckoutCouponRemoved {
                    coupon_id: coupon.id,
                    at: now,
                })])
            }

            CheckoutCommand::SetCustomerNotes { notes } => {
                self.ensure_mutable(now)?;
                Ok(vec![CheckoutEvent::NotesSet(CustomerNotesSet {
                    notes: notes.clone(),
                    at: now,
                })])
            }

            CheckoutCommand::RefreshPricing { subtotal, cart_discount, tax } => {
                self.ensure_mutable(now)?;
                if subtotal.is_sign_negative() || cart_discount.is_sign_negative() || tax.is_sign_negative() {
                    return Err(CheckoutError::NegativeAmount);
                }
                if (*subtotal, *cart_discount, *tax) == (self.subtotal, self.cart_discount, self.tax) {
                    return Ok(vec![]);
                }
                Ok(vec![CheckoutEvent::PricingRefreshed(PricingRefreshed {
                    subtotal: *subtotal,
                    cart_discount: *cart_discount,
                    tax: *tax,
                    at: now,
                })])
            }

            CheckoutCommand::AwaitPayment => {
                if self.status == CheckoutStatus::AwaitingPayment {
                    return Ok(vec![]);
                }
                self.ensure_mutable(now)?;
                self.ensure_ready()?;
                if self.status != CheckoutStatus::PaymentSelected {
                    return Err(CheckoutError::InvalidTransition {
                        status: self.status,
                        action: "await payment",
                    });
                }
                Ok(vec![CheckoutEvent::AwaitingPayment(CheckoutMarker { at: now })])
            }

            CheckoutCommand::BeginPlacement { order_id, lines } => {
                // A retried placement reuses the order id and lines pinned the first time
                match self.placement_order_id {
                    Some(existing) if existing == *order_id => return Ok(vec![]),
                    Some(existing) => return Err(CheckoutError::PlacementInProgress(existing)),
                    None => {}
                }
                self.ensure_open(now)?;
                self.ensure_ready()?;
                if lines.is_empty() {
                    return Err(CheckoutError::NothingToPlace);
                }
                let lines_total: Decimal = lines.iter().map(PlacementLine::total_price).sum();
                if lines_total != self.subtotal {
                    return Err(CheckoutError::StaleSnapshot {
                        lines: lines_total,
                        subtotal: self.subtotal,
                    });
                }
                Ok(vec![CheckoutEvent::PlacementBegan(PlacementBegan {
                    order_id: *order_id,
                    lines: lines.clone(),
                    at: now,
                })])
            }

            CheckoutCommand::Complete { order_id } => {
                if self.status == CheckoutStatus::Completed && self.order_id == Some(*order_id) {
                    return Ok(vec![]);
                }
                if self.status.is_terminal() {
                    return Err(CheckoutError::Closed(self.status));
                }
                self.ensure_ready()?;
                if self.placement_order_id != Some(*order_id) {
                    return Err(CheckoutError::PlacementMismatch {
                        expected: self.placement_order_id,
                        actual: *order_id,
                    });
                }
                // Expiry is not checked here: the order already exists
                Ok(vec![CheckoutEvent::Completed(CheckoutCompleted {
                    order_id: *order_id,
                    at: now,
                })])
            }

            CheckoutCommand::Abandon { reason } => match self.status {
                CheckoutStatus::Abandoned => Ok(vec![]),
                status if status.is_terminal() => Err(CheckoutError::Closed(status)),
                _ => Ok(vec![CheckoutEvent::Abandoned(CheckoutClosed {
                    reason: reason.clone(),
                    at: now,
                })]),
            },

            CheckoutCommand::Fail { reason } => {
                if self.status.is_terminal() {
                    return Err(CheckoutError::Closed(self.status));
                }
                Ok(vec![CheckoutEvent::Failed(CheckoutClosed {
                    reason: reason.clone(),
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
        CheckoutError::NotInitialized
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
