use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use uuid::Uuid;

use super::value_objects::{Coupon, DiscountKind, PriceBreakdown, ProductDiscount};

// ============================================================================
// Pricing & Discount Calculator
// ============================================================================
//
// Pure functions. Every amount that leaves this module is rounded to cents
// and clamped at zero.
//
// ============================================================================

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

pub fn non_negative(amount: Decimal) -> Decimal {
    round_money(amount.max(Decimal::ZERO))
}

/// Discount taken off one unit of a product. Never exceeds the price.
pub fn item_discount(original_price: Decimal, discount: Option<&ProductDiscount>) -> Decimal {
    let Some(discount) = discount else {
        return Decimal::ZERO;
    };

    let amount = match discount.kind {
        DiscountKind::Percentage => original_price * discount.value / HUNDRED,
        DiscountKind::FixedAmount => discount.value,
    };

    non_negative(amount.min(original_price))
}

/// Unit price actually charged after the product discount
pub fn discounted_unit_price(original_price: Decimal, discount: Option<&ProductDiscount>) -> Decimal {
    non_negative(original_price - item_discount(original_price, discount))
}

/// `max(0, unit_price × quantity − discount_amount)`
pub fn line_total(unit_price: Decimal, quantity: u32, discount_amount: Decimal) -> Decimal {
    non_negative(unit_price * Decimal::from(quantity) - discount_amount)
}

/// A coupon applies only when every condition holds. Failing conditions are
/// ordinary business outcomes, so this answers with a bool.
pub fn is_coupon_valid(coupon: &Coupon, net_total: Decimal, shop_id: Uuid, now: DateTime<Utc>) -> bool {
    let in_window = coupon.starts_at <= now && now <= coupon.ends_at;
    let meets_minimum = net_total >= coupon.minimum_amount;

    in_window && coupon.is_active && meets_minimum && coupon.is_linked_to(shop_id)
}

/// Amount a coupon takes off `net_total`, capped so the order stays ≥ 0
pub fn coupon_discount(coupon: &Coupon, net_total: Decimal) -> Decimal {
    let net_total = net_total.max(Decimal::ZERO);
    let raw = match coupon.kind {
        DiscountKind::Percentage => net_total * coupon.value / HUNDRED,
        DiscountKind::FixedAmount => coupon.value,
    };

    non_negative(raw.min(net_total))
}

/// `max(0, subtotal − discount + shipping + tax)`
pub fn order_total(subtotal: Decimal, discount_total: Decimal, shipping: Decimal, tax: Decimal) -> Decimal {
    non_negative(subtotal - discount_total + shipping + tax)
}

impl PriceBreakdown {
    pub fn compute(subtotal: Decimal, discount_total: Decimal, shipping: Decimal, tax: Decimal) -> Self {
        Self {
            subtotal: round_money(subtotal),
            discount_total: round_money(discount_total),
            shipping: round_money(shipping),
            tax: round_money(tax),
            total: order_total(subtotal, discount_total, shipping, tax),
        }
    }
}
