use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::pricing::{self, CurrencyCode};
use crate::event_sourcing::Aggregate;
use super::commands::CartCommand;
use super::errors::CartError;
use super::events::*;
use super::value_objects::{CartCoupon, CartItem, CartOwner, CartStatus, CartTotals};

// ============================================================================
// Cart Aggregate - Domain Logic
// ============================================================================

/// Largest quantity a single line may hold
pub const MAX_LINE_QUANTITY: u32 = 9_999;

#[derive(Debug, Clone)]
pub struct CartAggregate {
    // Identity
    pub id: Uuid,
    pub version: i64,

    pub owner: CartOwner,
    pub status: CartStatus,
    pub currency: CurrencyCode,
    pub items: Vec<CartItem>,
    pub coupons: Vec<CartCoupon>,
    pub totals: CartTotals,
    pub converted_order_id: Option<Uuid>,
    pub merged_into: Option<Uuid>,

    ttl: Duration,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CartAggregate {
    pub fn item(&self, item_id: Uuid) -> Option<&CartItem> {
        self.items.iter().find(|i| i.id == item_id)
    }

    pub fn item_for_variant(&self, product_id: Uuid, variant_id: Uuid) -> Option<&CartItem> {
        self.items
            .iter()
            .find(|i| i.product_id == product_id && i.variant_id == variant_id)
    }

    pub fn active_items(&self) -> impl Iterator<Item = &CartItem> {
        self.items.iter().filter(|i| i.is_active())
    }

    pub fn saved_items(&self) -> impl Iterator<Item = &CartItem> {
        self.items.iter().filter(|i| i.saved_for_later)
    }

    pub fn is_empty(&self) -> bool {
        self.active_items().next().is_none()
    }

    pub fn is_active(&self) -> bool {
        self.status == CartStatus::Active
    }

    pub fn has_coupon(&self, coupon_id: Uuid) -> bool {
        self.coupons.iter().any(|c| c.coupon.id == coupon_id)
    }

    /// Shops that have at least one active line in this cart
    pub fn shop_ids(&self) -> Vec<Uuid> {
        let mut shops: Vec<Uuid> = self.active_items().map(|i| i.shop_id).collect();
        shops.sort();
        shops.dedup();
        shops
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Active cart that nobody touched for `idle_for`
    pub fn is_abandonment_candidate(&self, now: DateTime<Utc>, idle_for: Duration) -> bool {
        self.is_active() && now - self.updated_at >= idle_for
    }

    fn ensure_active(&self) -> Result<(), CartError> {
        match self.status {
            CartStatus::Active => Ok(()),
            other => Err(CartError::NotActive(other)),
        }
    }

    fn require_item(&self, item_id: Uuid) -> Result<&CartItem, CartError> {
        self.item(item_id).ok_or(CartError::ItemNotFound(item_id))
    }

    fn item_mut(&mut self, item_id: Uuid) -> Result<&mut CartItem, CartError> {
        self.items
            .iter_mut()
            .find(|i| i.id == item_id)
            .ok_or(CartError::ItemNotFound(item_id))
    }

    fn touch(&mut self, at: DateTime<Utc>) {
        self.updated_at = at;
        self.expires_at = at + self.ttl;
    }

    /// Recompute every denormalized total from the active lines
    fn recalculate(&mut self) {
        for item in &mut self.items {
            item.recalculate();
        }

        let subtotal: Decimal = self.active_items().map(|i| i.total_price).sum();
        let item_count = self.active_items().fold(0u32, |count, i| count.saturating_add(i.quantity));

        // Coupons stack on what the previous ones left
        let mut remaining = subtotal;
        for applied in &mut self.coupons {
            applied.discount_amount = if remaining >= applied.coupon.minimum_amount {
                pricing::coupon_discount(&applied.coupon, remaining)
            } else {
                Decimal::ZERO
            };
            remaining -= applied.discount_amount;
        }
        let discount_total: Decimal = self.coupons.iter().map(|c| c.discount_amount).sum();

        self.totals = CartTotals {
            subtotal: pricing::round_money(subtotal),
            discount_total: pricing::round_money(discount_total),
            shipping_estimate: self.totals.shipping_estimate,
            tax_estimate: self.totals.tax_estimate,
            total_estimate: pricing::order_total(
                subtotal,
                discount_total,
                self.totals.shipping_estimate,
                self.totals.tax_estimate,
            ),
            item_count,
        };
    }
}

// ============================================================================
// Aggregate Trait Implementation
// ============================================================================

impl Aggregate for CartAggregate {
    type Event = CartEvent;
    type Command = CartCommand;
    type Error = CartError;

    const AGGREGATE_TYPE: &'static str = "Cart";

    fn apply_first_event(aggregate_id: Uuid, event: &Self::Event) -> Result<Self, Self::Error> {
        match event {
            CartEvent::Opened(e) => {
                let ttl = Duration::seconds(e.ttl_seconds);
                Ok(Self {
                    id: aggregate_id,
                    version: 1,
                    owner: e.owner.clone(),
                    status: CartStatus::Active,
                    currency: e.currency.clone(),
                    items: Vec::new(),
                    coupons: Vec::new(),
                    totals: CartTotals::default(),
                    converted_order_id: None,
                    merged_into: None,
                    ttl,
                    created_at: e.opened_at,
                    updated_at: e.opened_at,
                    expires_at: e.opened_at + ttl,
                })
            }
            _ => Err(CartError::NotInitialized),
        }
    }

    fn apply_event(&mut self, event: &Self::Event) -> Result<(), Self::Error> {
        match event {
            CartEvent::Opened(_) => return Err(CartError::AlreadyOpened),
            CartEvent::ItemAdded(e) => {
                let mut item = CartItem {
                    id: e.item_id,
                    product_id: e.product_id,
                    variant_id: e.variant_id,
                    shop_id: e.shop_id,
                    product_name: e.product_name.clone(),
                    quantity: e.quantity,
                    unit_price: e.unit_price,
                    price_at_add: e.unit_price,
                    unit_discount: e.unit_discount,
                    discount_amount: Decimal::ZERO,
                    total_price: Decimal::ZERO,
                    saved_for_later: false,
                    added_at: e.at,
                };
                item.recalculate();
                self.items.push(item);
            }
            CartEvent::ItemQuantityIncreased(e) => {
                let item = self.item_mut(e.item_id)?;
                item.quantity = item.quantity.saturating_add(e.added_quantity);
                item.unit_price = e.unit_price;
                item.unit_discount = e.unit_discount;
                item.saved_for_later = false;
            }
            CartEvent::ItemQuantityChanged(e) => {
                self.item_mut(e.item_id)?.quantity = e.quantity;
            }
            CartEvent::ItemRemoved(e) => {
                self.items.retain(|i| i.id != e.item_id);
            }
            CartEvent::ItemSavedForLater(e) => {
                self.item_mut(e.item_id)?.saved_for_later = true;
            }
            CartEvent::ItemMovedToCart(e) => {
                self.item_mut(e.item_id)?.saved_for_later = false;
            }
            CartEvent::Cleared(_) => {
                self.items.clear();
                self.coupons.clear();
            }
            CartEvent::CouponApplied(e) => {
                self.coupons.push(CartCoupon {
                    coupon: e.coupon.clone(),
                    discount_amount: Decimal::ZERO,
                });
            }
            CartEvent::CouponRemoved(e) => {
                self.coupons.retain(|c| c.coupon.id != e.coupon_id);
            }
            CartEvent::EstimatesUpdated(e) => {
                self.totals.shipping_estimate = e.shipping_estimate;
                self.totals.tax_estimate = e.tax_estimate;
            }
            CartEvent::Merged(e) => {
                self.status = CartStatus::Merged;
                self.merged_into = Some(e.into_cart_id);
            }
            CartEvent::Converted(e) => {
                self.status = CartStatus::Converted;
                self.converted_order_id = Some(e.order_id);
            }
            CartEvent::Abandoned(_) => {
                self.status = CartStatus::Abandoned;
            }
        }

        // Terminal markers do not count as shopper activity
        if !matches!(event, CartEvent::Merged(_) | CartEvent::Converted(_) | CartEvent::Abandoned(_)) {
            self.touch(event.occurred_at());
        }
        self.recalculate();
        self.version += 1;
        Ok(())
    }

    fn handle_create(command: &Self::Command, now: DateTime<Utc>) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            CartCommand::Open { owner, currency, ttl } => {
                if *ttl <= Duration::zero() {
                    return Err(CartError::InvalidTtl);
                }
                Ok(vec![CartEvent::Opened(CartOpened {
                    owner: owner.clone(),
                    currency: currency.clone(),
                    ttl_seconds: ttl.num_seconds(),
                    opened_at: now,
                })])
            }
            _ => Err(CartError::NotInitialized),
        }
    }

    fn handle_command(&self, command: &Self::Command, now: DateTime<Utc>) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            CartCommand::Open { .. } => Err(CartError::AlreadyOpened),

            CartCommand::AddItem {
                product_id,
                variant_id,
                shop_id,
                product_name,
                quantity,
                unit_price,
                unit_discount,
            } => {
                self.ensure_active()?;
                if *quantity == 0 || *quantity > MAX_LINE_QUANTITY {
                    return Err(CartError::InvalidQuantity(i64::from(*quantity)));
                }
                if unit_price.is_sign_negative() || unit_discount.is_sign_negative() {
                    return Err(CartError::NegativePrice);
                }

                // (cart, variant) is unique: merge into the existing line
                if let Some(existing) = self.item_for_variant(*product_id, *variant_id) {
                    let merged = i64::from(existing.quantity) + i64::from(*quantity);
                    if merged > i64::from(MAX_LINE_QUANTITY) {
                        return Err(CartError::InvalidQuantity(merged));
                    }
                    return Ok(vec![CartEvent::ItemQuantityIncreased(CartItemQuantityIncreased {
                        item_id: existing.id,
                        added_quantity: *quantity,
                        unit_price: *unit_price,
                        unit_discount: *unit_discount,
                        at: now,
                    })]);
                }

                Ok(vec![CartEvent::ItemAdded(CartItemAdded {
                    item_id: Uuid::new_v4(),
                    product_id: *product_id,
                    variant_id: *variant_id,
                    shop_id: *shop_id,
                    product_name: product_name.clone(),
                    quantity: *quantity,
                    unit_price: *unit_price,
                    unit_discount: *unit_discount,
                    at: now,
                })])
            }

            CartCommand::ChangeQuantity { item_id, quantity } => {
                self.ensure_active()?;
                let item = self.require_item(*item_id)?;

                if *quantity <= 0 {
                    return Ok(vec![CartEvent::ItemRemoved(CartItemRef { item_id: item.id, at: now })]);
                }
                let quantity = u32::try_from(*quantity)
                    .ok()
                    .filter(|q| *q <= MAX_LINE_QUANTITY)
                    .ok_or(CartError::InvalidQuantity(*quantity))?;
                if quantity == item.quantity {
                    return Ok(vec![]);
                }

                Ok(vec![CartEvent::ItemQuantityChanged(CartItemQuantityChanged {
                    item_id: item.id,
                    quantity,
                    at: now,
                })])
            }

            CartCommand::RemoveItem { item_id } => {
                self.ensure_active()?;
                let item = self.require_item(*item_id)?;
                Ok(vec![CartEvent::ItemRemoved(CartItemRef { item_id: item.id, at: now })])
            }

            CartCommand::SaveForLater { item_id } => {
                self.ensure_active()?;
                let item = self.require_item(*item_id)?;
                if item.saved_for_later {
                    return Ok(vec![]);
                }
                Ok(vec![CartEvent::ItemSavedForLater(CartItemRef { item_id: item.id, at: now })])
            }

            CartCommand::MoveToCart { item_id } => {
                self.ensure_active()?;
                let item = self.require_item(*item_id)?;
                if !item.saved_for_later {
                    return Ok(vec![]);
                }
                Ok(vec![CartEvent::ItemMovedToCart(CartItemRef { item_id: item.id, at: now })])
            }

            CartCommand::Clear => {
                self.ensure_active()?;
                Ok(vec![CartEvent::Cleared(CartTouched { at: now })])
            }

            CartCommand::ApplyCoupon { coupon } => {
                self.ensure_active()?;
                if self.has_coupon(coupon.id) {
                    return Err(CartError::CouponAlreadyApplied(coupon.code.clone()));
                }
                Ok(vec![CartEvent::CouponApplied(CartCouponApplied {
                    coupon: coupon.clone(),
                    at: now,
                })])
            }

            CartCommand::RemoveCoupon { coupon_id } => {
                self.ensure_active()?;
                if !self.has_coupon(*coupon_id) {
                    return Err(CartError::CouponNotApplied(*coupon_id));
                }
                Ok(vec![CartEvent::CouponRemoved(CartCouponRemoved {
                    coupon_id: *coupon_id,
                    at: now,
                })])
            }

            CartCommand::UpdateEstimates { shipping_estimate, tax_estimate } => {
                self.ensure_active()?;
                if shipping_estimate.is_sign_negative() || tax_estimate.is_sign_negative() {
                    return Err(CartError::NegativeEstimate);
                }
                Ok(vec![CartEvent::EstimatesUpdated(CartEstimatesUpdated {
                    shipping_estimate: *shipping_estimate,
                    tax_estimate: *tax_estimate,
                    at: now,
                })])
            }

            CartCommand::MarkMerged { into_cart_id } => {
                if *into_cart_id == self.id {
                    return Err(CartError::MergeIntoSelf);
                }
                self.ensure_active()?;
                Ok(vec![CartEvent::Merged(CartMerged {
                    into_cart_id: *into_cart_id,
                    at: now,
                })])
            }

            CartCommand::MarkConverted { order_id } => {
                // Re-marking with the same order is a no-op so placement can be retried
                match self.converted_order_id {
                    Some(existing) if existing == *order_id => return Ok(vec![]),
                    Some(existing) => return Err(CartError::AlreadyConverted(existing)),
                    None => {}
                }
                self.ensure_active()?;
                Ok(vec![CartEvent::Converted(CartConverted {
                    order_id: *order_id,
                    at: now,
                })])
            }

            CartCommand::MarkAbandoned { reason } => {
                self.ensure_active()?;
                Ok(vec![CartEvent::Abandoned(CartAbandoned { reason: *reason, at: now })])
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
        CartError::NotInitialized
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::cart::value_objects::AbandonReason;
    use crate::domain::pricing::{Coupon, DiscountKind};

    fn usd(cents: i64) -> Decimal {
        Decimal::new(cents, 2)
    }

    fn open_cart(now: DateTime<Utc>) -> CartAggregate {
        let events = CartAggregate::handle_create(
            &CartCommand::Open {
                owner: CartOwner::Customer(Uuid::new_v4()),
                currency: CurrencyCode::default(),
                ttl: Duration::hours(72),
            },
            now,
        )
        .unwrap();
        CartAggregate::apply_first_event(Uuid::new_v4(), &events[0]).unwrap()
    }

    fn run(cart: CartAggregate, command: CartCommand, now: DateTime<Utc>) -> CartAggregate {
        let events = cart.handle_command(&command, now).unwrap();
        cart.apply_all(&events).unwrap()
    }

    fn add(product_id: Uuid, variant_id: Uuid, quantity: u32, unit: i64, discount: i64) -> CartCommand {
        CartCommand::AddItem {
            product_id,
            variant_id,
            shop_id: Uuid::nil(),
            product_name: "Widget".to_string(),
            quantity,
            unit_price: usd(unit),
            unit_discount: usd(discount),
        }
    }

    fn assert_totals_consistent(cart: &CartAggregate) {
        let sum: Decimal = cart.active_items().map(|i| i.total_price).sum();
        assert_eq!(cart.totals.subtotal, sum);
        assert!(cart.totals.total_estimate >= Decimal::ZERO);
    }

    #[test]
    fn test_adding_same_variant_twice_merges_lines() {
        let now = Utc::now();
        let (product, variant) = (Uuid::new_v4(), Uuid::new_v4());

        let cart = open_cart(now);
        let cart = run(cart, add(product, variant, 2, 1000, 0), now);
        let cart = run(cart, add(product, variant, 3, 1000, 0), now);

        assert_eq!(cart.items.len(), 1);
        assert_eq!(cart.items[0].quantity, 5);
        assert_eq!(cart.totals.subtotal, usd(5000));
        assert_eq!(cart.totals.item_count, 5);
        assert_totals_consistent(&cart);
    }

    #[test]
    fn test_line_quantity_is_capped_instead_of_overflowing() {
        let now = Utc::now();
        let (product, variant) = (Uuid::new_v4(), Uuid::new_v4());
        let cart = run(open_cart(now), add(product, variant, MAX_LINE_QUANTITY, 100, 0), now);

        let err = cart.handle_command(&add(product, variant, 1, 100, 0), now).unwrap_err();
        assert!(matches!(err, CartError::InvalidQuantity(q) if q == i64::from(MAX_LINE_QUANTITY) + 1));

        let err = cart.handle_command(&add(product, variant, u32::MAX, 100, 0), now).unwrap_err();
        assert!(matches!(err, CartError::InvalidQuantity(_)));

        let err = cart
            .handle_command(&add(Uuid::new_v4(), Uuid::new_v4(), u32::MAX, 100, 0), now)
            .unwrap_err();
        assert!(matches!(err, CartError::InvalidQuantity(_)));

        let item_id = cart.items[0].id;
        let err = cart
            .handle_command(&CartCommand::ChangeQuantity { item_id, quantity: i64::from(u32::MAX) }, now)
            .unwrap_err();
        assert!(matches!(err, CartError::InvalidQuantity(_)));

        assert_eq!(cart.items[0].quantity, MAX_LINE_QUANTITY);
        assert_eq!(cart.totals.item_count, MAX_LINE_QUANTITY);
    }

    #[test]
    fn test_price_refresh_keeps_price_at_add() {
        let now = Utc::now();
        let (product, variant) = (Uuid::new_v4(), Uuid::new_v4());

        let cart = open_cart(now);
        let cart = run(cart, add(product, variant, 1, 1000, 0), now);
        let cart = run(cart, add(product, variant, 1, 1200, 0), now);

        let line = &cart.items[0];
        assert_eq!(line.unit_price, usd(1200));
        assert_eq!(line.price_at_add, usd(1000));
        assert!(line.has_price_changed());
    }

    #[test]
    fn test_zero_quantity_removes_line() {
        let now = Utc::now();
        let cart = open_cart(now);
        let cart = run(cart, add(Uuid::new_v4(), Uuid::new_v4(), 2, 1000, 0), now);
        let item_id = cart.items[0].id;

        let cart = run(cart, CartCommand::ChangeQuantity { item_id, quantity: 0 }, now);
        assert!(cart.items.is_empty());
        assert_eq!(cart.totals.subtotal, Decimal::ZERO);
        assert_eq!(cart.totals.item_count, 0);
    }

    #[test]
    fn test_saved_for_later_excluded_from_totals() {
        let now = Utc::now();
        let cart = open_cart(now);
        let cart = run(cart, add(Uuid::new_v4(), Uuid::new_v4(), 1, 1000, 0), now);
        let cart = run(cart, add(Uuid::new_v4(), Uuid::new_v4(), 2, 2500, 0), now);
        let saved = cart.items[1].id;

        let cart = run(cart, CartCommand::SaveForLater { item_id: saved }, now);
        assert_eq!(cart.items.len(), 2);
        assert_eq!(cart.totals.subtotal, usd(1000));
        assert_eq!(cart.totals.item_count, 1);
        assert_totals_consistent(&cart);

        let cart = run(cart, CartCommand::MoveToCart { item_id: saved }, now);
        assert_eq!(cart.totals.subtotal, usd(6000));
    }

    #[test]
    fn test_product_discount_reduces_line_total() {
        let now = Utc::now();
        let cart = open_cart(now);
        let cart = run(cart, add(Uuid::new_v4(), Uuid::new_v4(), 2, 5000, 500), now);

        assert_eq!(cart.items[0].charged_unit_price(), usd(4500));
        assert_eq!(cart.items[0].total_price, usd(9000));
        assert_eq!(cart.totals.subtotal, usd(9000));
    }

    #[test]
    fn test_coupon_discount_follows_subtotal() {
        let now = Utc::now();
        let coupon = Coupon {
            id: Uuid::new_v4(),
            code: "TWENTY".to_string(),
            kind: DiscountKind::FixedAmount,
            value: usd(2000),
            minimum_amount: usd(5000),
            starts_at: now - Duration::days(1),
            ends_at: now + Duration::days(1),
            is_active: true,
            shop_ids: vec![Uuid::nil()],
        };

        let cart = open_cart(now);
        let cart = run(cart, add(Uuid::new_v4(), Uuid::new_v4(), 2, 5000, 500), now);
        let cart = run(cart, CartCommand::ApplyCoupon { coupon: coupon.clone() }, now);
        assert_eq!(cart.totals.discount_total, usd(2000));
        assert_eq!(cart.totals.total_estimate, usd(7000));

        // Dropping below the minimum keeps the coupon but zeroes its effect
        let item_id = cart.items[0].id;
        let cart = run(cart, CartCommand::ChangeQuantity { item_id, quantity: 1 }, now);
        assert_eq!(cart.coupons.len(), 1);
        assert_eq!(cart.totals.discount_total, Decimal::ZERO);

        let err = cart.handle_command(&CartCommand::ApplyCoupon { coupon }, now).unwrap_err();
        assert!(matches!(err, CartError::CouponAlreadyApplied(_)));
    }

    #[test]
    fn test_total_estimate_never_negative() {
        let now = Utc::now();
        let coupon = Coupon {
            id: Uuid::new_v4(),
            code: "ALL".to_string(),
            kind: DiscountKind::Percentage,
            value: Decimal::from(250),
            minimum_amount: Decimal::ZERO,
            starts_at: now - Duration::days(1),
            ends_at: now + Duration::days(1),
            is_active: true,
            shop_ids: vec![Uuid::nil()],
        };
        let cart = open_cart(now);
        let cart = run(cart, add(Uuid::new_v4(), Uuid::new_v4(), 1, 1999, 0), now);
        let cart = run(cart, CartCommand::ApplyCoupon { coupon }, now);

        assert_eq!(cart.totals.discount_total, usd(1999));
        assert_eq!(cart.totals.total_estimate, Decimal::ZERO);
    }

    #[test]
    fn test_expiry_refreshes_on_activity() {
        let start = Utc::now();
        let cart = open_cart(start);
        assert!(!cart.is_expired(start + Duration::hours(71)));
        assert!(cart.is_expired(start + Duration::hours(73)));

        let later = start + Duration::hours(48);
        let cart = run(cart, add(Uuid::new_v4(), Uuid::new_v4(), 1, 1000, 0), later);
        assert!(!cart.is_expired(start + Duration::hours(73)));
        assert!(cart.is_abandonment_candidate(later + Duration::hours(24), Duration::hours(24)));
        assert!(!cart.is_abandonment_candidate(later + Duration::hours(23), Duration::hours(24)));
    }

    #[test]
    fn test_terminal_cart_rejects_mutation() {
        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let cart = open_cart(now);
        let cart = run(cart, CartCommand::MarkConverted { order_id }, now);
        assert_eq!(cart.status, CartStatus::Converted);

        let err = cart
            .handle_command(&add(Uuid::new_v4(), Uuid::new_v4(), 1, 100, 0), now)
            .unwrap_err();
        assert!(matches!(err, CartError::NotActive(CartStatus::Converted)));

        // idempotent for the same order, rejected for a different one
        assert!(cart.handle_command(&CartCommand::MarkConverted { order_id }, now).unwrap().is_empty());
        assert!(matches!(
            cart.handle_command(&CartCommand::MarkConverted { order_id: Uuid::new_v4() }, now),
            Err(CartError::AlreadyConverted(_))
        ));
        assert!(matches!(
            cart.handle_command(&CartCommand::MarkAbandoned { reason: AbandonReason::Expired }, now),
            Err(CartError::NotActive(_))
        ));
    }

    #[test]
    fn test_rebuild_from_history_matches_live_state() {
        use crate::event_sourcing::EventEnvelope;

        let now = Utc::now();
        let id = Uuid::new_v4();
        let mut history = Vec::new();
        let open = CartAggregate::handle_create(
            &CartCommand::Open {
                owner: CartOwner::Guest("sess".to_string()),
                currency: CurrencyCode::default(),
                ttl: Duration::hours(72),
            },
            now,
        )
        .unwrap();
        let mut cart = CartAggregate::apply_first_event(id, &open[0]).unwrap();
        history.extend(open);

        for command in [
            add(Uuid::new_v4(), Uuid::new_v4(), 2, 1500, 0),
            add(Uuid::new_v4(), Uuid::new_v4(), 1, 999, 100),
        ] {
            let events = cart.handle_command(&command, now).unwrap();
            cart = cart.apply_all(&events).unwrap();
            history.extend(events);
        }

        let envelopes: Vec<_> = history
            .into_iter()
            .enumerate()
            .map(|(i, e)| EventEnvelope::new(id, i as i64 + 1, e, Uuid::new_v4(), now))
            .collect();
        let rebuilt = CartAggregate::load_from_events(id, &envelopes).unwrap();

        assert_eq!(rebuilt.version, 3);
        assert_eq!(rebuilt.version, cart.version);
        assert_eq!(rebuilt.totals, cart.totals);
        assert_eq!(rebuilt.items, cart.items);
    }
}
