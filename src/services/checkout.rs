use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::LifecyclePolicy;
use crate::domain::cart::{CartAggregate, CartError};
use crate::domain::checkout::{
    Address, CheckoutAggregate, CheckoutCommand, CheckoutError, CheckoutEvent, CheckoutStatus, DeliveryWindow,
    PaymentMethod, PlacementLine, ShippingMethod,
};
use crate::domain::pricing;
use crate::event_sourcing::{CommandContext, CommandHandler, EventStore, HandlerError};
use crate::metrics::Metrics;
use super::cart::CartService;
use super::catalog::Catalog;
use super::error::ServiceError;

// ============================================================================
// Checkout Service
// ============================================================================
//
// At most one open session per cart. Starting again for the same cart
// refreshes the open session instead of creating a second one.
//
// Every access goes through `get`, which abandons a session that has
// outlived its TTL and reports it as expired. A session whose placement
// has begun is left alone: placement owns it until it completes.
//
// ============================================================================

pub struct CheckoutService {
    handler: CommandHandler<CheckoutAggregate>,
    carts: Arc<CartService>,
    catalog: Arc<dyn Catalog>,
    clock: Arc<dyn Clock>,
    policy: LifecyclePolicy,
    metrics: Arc<Metrics>,
    by_cart: RwLock<HashMap<Uuid, Uuid>>,
}

impl CheckoutService {
    pub fn new(
        event_store: Arc<dyn EventStore<CheckoutEvent>>,
        carts: Arc<CartService>,
        catalog: Arc<dyn Catalog>,
        clock: Arc<dyn Clock>,
        policy: LifecyclePolicy,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            handler: CommandHandler::new(event_store),
            carts,
            catalog,
            clock,
            policy,
            metrics,
            by_cart: RwLock::new(HashMap::new()),
        }
    }

    fn ctx(&self) -> CommandContext {
        CommandContext::new(self.clock.now())
    }

    /// Open a session over `cart_id`, or refresh the one already open
    pub async fn start(&self, cart_id: Uuid, customer_id: Uuid) -> Result<CheckoutAggregate, ServiceError> {
        let cart = self.carts.get(cart_id).await?;
        if !cart.is_active() {
            return Err(CartError::NotActive(cart.status).into());
        }
        if cart.owner.customer_id() != Some(customer_id) {
            return Err(ServiceError::InvalidRequest(format!(
                "cart {cart_id} does not belong to customer {customer_id}"
            )));
        }
        if cart.is_empty() {
            return Err(ServiceError::InvalidRequest(format!("cart {cart_id} is empty")));
        }

        let mut index = self.by_cart.write().await;

        if let Some(checkout_id) = index.get(&cart_id).copied() {
            match self.handler.load(checkout_id).await {
                Ok(existing) if existing.needs_expiry(self.clock.now()) && existing.placement_order_id.is_none() => {
                    self.close_expired(checkout_id).await?;
                }
                Ok(existing) if !existing.status.is_terminal() => {
                    let checkout = self
                        .handler
                        .handle(
                            checkout_id,
                            &CheckoutCommand::RefreshExpiration { ttl: self.policy.checkout_ttl },
                            self.ctx(),
                        )
                        .await?;
                    tracing::info!(
                        checkout_id = %checkout_id,
                        cart_id = %cart_id,
                        expires_at = %checkout.expires_at,
                        "Checkout session refreshed"
                    );
                    if checkout.placement_order_id.is_some() {
                        return Ok(checkout);
                    }
                    return self.sync_pricing(checkout_id, &cart).await;
                }
                Ok(_) | Err(HandlerError::NotFound { .. }) => {}
                Err(e) => return Err(e.into()),
            }
            index.remove(&cart_id);
        }

        let checkout_id = Uuid::new_v4();
        let checkout = self
            .handler
            .create(
                checkout_id,
                &CheckoutCommand::Start {
                    cart_id,
                    customer_id,
                    currency: cart.currency.clone(),
                    subtotal: cart.totals.subtotal,
                    cart_discount: cart.totals.discount_total,
                    tax: cart.totals.tax_estimate,
                    ttl: self.policy.checkout_ttl,
                },
                self.ctx(),
            )
            .await?;

        index.insert(cart_id, checkout_id);
        self.metrics.record_checkout("started");
        tracing::info!(
            checkout_id = %checkout_id,
            cart_id = %cart_id,
            customer_id = %customer_id,
            subtotal = %checkout.subtotal,
            "🧾 Checkout started"
        );
        Ok(checkout)
    }

    /// Load a session, abandoning it first if it has expired
    pub async fn get(&self, checkout_id: Uuid) -> Result<CheckoutAggregate, ServiceError> {
        let checkout = self.handler.load(checkout_id).await?;
        if checkout.needs_expiry(self.clock.now()) && checkout.placement_order_id.is_none() {
            self.expire(checkout_id).await?;
            return Err(CheckoutError::Expired.into());
        }
        Ok(checkout)
    }

    async fn execute(&self, checkout_id: Uuid, command: CheckoutCommand) -> Result<CheckoutAggregate, ServiceError> {
        self.get(checkout_id).await?;
        Ok(self.handler.handle(checkout_id, &command, self.ctx()).await?)
    }

    pub async fn set_shipping_address(&self, checkout_id: Uuid, address: Address) -> Result<CheckoutAggregate, ServiceError> {
        let checkout = self
            .execute(checkout_id, CheckoutCommand::SetShippingAddress { address })
            .await?;
        tracing::debug!(checkout_id = %checkout_id, step = checkout.current_step().as_str(), "Shipping address set");
        Ok(checkout)
    }

    pub async fn set_billing_address(&self, checkout_id: Uuid, address: Address) -> Result<CheckoutAggregate, ServiceError> {
        self.execute(checkout_id, CheckoutCommand::SetBillingAddress { address }).await
    }

    pub async fn set_shipping_method(&self, checkout_id: Uuid, method: ShippingMethod) -> Result<CheckoutAggregate, ServiceError> {
        self.execute(checkout_id, CheckoutCommand::SetShippingMethod { method }).await
    }

    pub async fn set_delivery_schedule(&self, checkout_id: Uuid, window: DeliveryWindow) -> Result<CheckoutAggregate, ServiceError> {
        self.execute(checkout_id, CheckoutCommand::SetDeliverySchedule { window }).await
    }

    pub async fn set_payment_method(&self, checkout_id: Uuid, method: PaymentMethod) -> Result<CheckoutAggregate, ServiceError> {
        let checkout = self
            .execute(checkout_id, CheckoutCommand::SetPaymentMethod { method })
            .await?;
        tracing::debug!(checkout_id = %checkout_id, step = checkout.current_step().as_str(), "Payment method set");
        Ok(checkout)
    }

    pub async fn set_customer_notes(&self, checkout_id: Uuid, notes: Option<String>) -> Result<CheckoutAggregate, ServiceError> {
        self.execute(checkout_id, CheckoutCommand::SetCustomerNotes { notes }).await
    }

    /// Attach a coupon by code. `Ok(false)` when it is unknown, already
    /// counted on the cart, or not valid for this session's cart right now.
    pub async fn apply_coupon(&self, checkout_id: Uuid, code: &str) -> Result<bool, ServiceError> {
        let checkout = self.get(checkout_id).await?;
        let Some(coupon) = self.catalog.coupon_by_code(code).await? else {
            return Ok(false);
        };

        let cart = self.carts.get(checkout.cart_id).await?;
        // The cart's coupons are already inside `cart_discount`
        if cart.has_coupon(coupon.id) {
            tracing::debug!(checkout_id = %checkout_id, code = code, "Coupon already applied to the cart");
            return Ok(false);
        }
        let now = self.clock.now();
        let net_total = pricing::non_negative(checkout.subtotal - checkout.cart_discount);
        let shops = cart.shop_ids();
        let valid = !shops.is_empty()
            && shops
                .iter()
                .all(|shop_id| pricing::is_coupon_valid(&coupon, net_total, *shop_id, now));
        if !valid {
            tracing::debug!(checkout_id = %checkout_id, code = code, net_total = %net_total, "Coupon rejected");
            return Ok(false);
        }

        let checkout = self
            .handler
            .handle(checkout_id, &CheckoutCommand::ApplyCoupon { coupon }, self.ctx())
            .await?;
        tracing::info!(
            checkout_id = %checkout_id,
            code = code,
            grand_total = %checkout.grand_total(),
            "Coupon applied to checkout"
        );
        Ok(true)
    }

    pub async fn remove_coupon(&self, checkout_id: Uuid) -> Result<CheckoutAggregate, ServiceError> {
        self.execute(checkout_id, CheckoutCommand::RemoveCoupon).await
    }

    /// Re-snapshot the cart's totals into the session
    pub async fn refresh_pricing(&self, checkout_id: Uuid) -> Result<CheckoutAggregate, ServiceError> {
        let checkout = self.get(checkout_id).await?;
        let cart = self.carts.get(checkout.cart_id).await?;
        self.sync_pricing(checkout_id, &cart).await
    }

    async fn sync_pricing(&self, checkout_id: Uuid, cart: &CartAggregate) -> Result<CheckoutAggregate, ServiceError> {
        let checkout = self.handler.load(checkout_id).await?;
        if let Some(coupon) = checkout.coupon.as_ref().filter(|c| cart.has_coupon(c.id)) {
            tracing::debug!(checkout_id = %checkout_id, code = %coupon.code, "Coupon moved to the cart, dropping it here");
            self.handler
                .handle(checkout_id, &CheckoutCommand::RemoveCoupon, self.ctx())
                .await?;
        }

        let command = CheckoutCommand::RefreshPricing {
            subtotal: cart.totals.subtotal,
            cart_discount: cart.totals.discount_total,
            tax: cart.totals.tax_estimate,
        };
        Ok(self.handler.handle(checkout_id, &command, self.ctx()).await?)
    }

    pub async fn await_payment(&self, checkout_id: Uuid) -> Result<CheckoutAggregate, ServiceError> {
        let checkout = self.execute(checkout_id, CheckoutCommand::AwaitPayment).await?;
        tracing::info!(checkout_id = %checkout_id, grand_total = %checkout.grand_total(), "Awaiting payment");
        Ok(checkout)
    }

    /// Pin `order_id` and freeze the cart's active lines on this session.
    /// The same id again is a no-op and keeps the lines frozen the first time.
    pub async fn begin_placement(&self, checkout_id: Uuid, order_id: Uuid) -> Result<CheckoutAggregate, ServiceError> {
        let checkout = self.get(checkout_id).await?;
        if checkout.placement_order_id.is_some() {
            let command = CheckoutCommand::BeginPlacement {
                order_id,
                lines: checkout.placement_lines.clone(),
            };
            return Ok(self.handler.handle(checkout_id, &command, self.ctx()).await?);
        }

        // Price and lines come from the same read of the cart
        let cart = self.carts.get(checkout.cart_id).await?;
        self.sync_pricing(checkout_id, &cart).await?;
        let lines: Vec<PlacementLine> = cart
            .active_items()
            .map(|item| PlacementLine {
                product_id: item.product_id,
                variant_id: item.variant_id,
                shop_id: item.shop_id,
                product_name: item.product_name.clone(),
                quantity: item.quantity,
                unit_price: item.unit_price,
                discount_amount: item.discount_amount,
            })
            .collect();

        let checkout = self
            .handler
            .handle(checkout_id, &CheckoutCommand::BeginPlacement { order_id, lines }, self.ctx())
            .await?;
        tracing::info!(
            checkout_id = %checkout_id,
            order_id = %order_id,
            lines = checkout.placement_lines.len(),
            subtotal = %checkout.subtotal,
            "Placement began"
        );
        Ok(checkout)
    }

    pub async fn complete(&self, checkout_id: Uuid, order_id: Uuid) -> Result<CheckoutAggregate, ServiceError> {
        let was_completed = self.handler.load(checkout_id).await?.status == CheckoutStatus::Completed;
        let checkout = self
            .handler
            .handle(checkout_id, &CheckoutCommand::Complete { order_id }, self.ctx())
            .await?;
        if !was_completed {
            self.metrics.record_checkout("completed");
            tracing::info!(checkout_id = %checkout_id, order_id = %order_id, "✅ Checkout completed");
        }
        self.forget(&checkout).await;
        Ok(checkout)
    }

    pub async fn fail(&self, checkout_id: Uuid, reason: &str) -> Result<CheckoutAggregate, ServiceError> {
        let checkout = self
            .handler
            .handle(checkout_id, &CheckoutCommand::Fail { reason: reason.to_string() }, self.ctx())
            .await?;
        self.metrics.record_checkout("failed");
        tracing::warn!(checkout_id = %checkout_id, reason = reason, "Checkout failed");
        self.forget(&checkout).await;
        Ok(checkout)
    }

    pub async fn abandon(&self, checkout_id: Uuid, reason: &str) -> Result<CheckoutAggregate, ServiceError> {
        let checkout = self
            .handler
            .handle(checkout_id, &CheckoutCommand::Abandon { reason: reason.to_string() }, self.ctx())
            .await?;
        self.metrics.record_checkout("abandoned");
        tracing::info!(checkout_id = %checkout_id, reason = reason, "Checkout abandoned");
        self.forget(&checkout).await;
        Ok(checkout)
    }

    /// Abandon a session that outlived its TTL
    pub async fn expire(&self, checkout_id: Uuid) -> Result<CheckoutAggregate, ServiceError> {
        let checkout = self.close_expired(checkout_id).await?;
        self.forget(&checkout).await;
        Ok(checkout)
    }

    // Does not touch the index; `start` calls this while holding it
    async fn close_expired(&self, checkout_id: Uuid) -> Result<CheckoutAggregate, ServiceError> {
        let checkout = self
            .handler
            .handle(checkout_id, &CheckoutCommand::Abandon { reason: "expired".to_string() }, self.ctx())
            .await?;
        self.metrics.record_checkout("expired");
        tracing::info!(checkout_id = %checkout_id, expires_at = %checkout.expires_at, "⌛ Checkout session expired");
        Ok(checkout)
    }

    async fn forget(&self, checkout: &CheckoutAggregate) {
        if !checkout.status.is_terminal() {
            return;
        }
        let mut index = self.by_cart.write().await;
        if index.get(&checkout.cart_id) == Some(&checkout.id) {
            index.remove(&checkout.cart_id);
        }
    }

    /// Non-terminal sessions, for the expiration sweep
    pub async fn open_sessions(&self) -> Result<Vec<CheckoutAggregate>, ServiceError> {
        let ids: Vec<Uuid> = self.by_cart.read().await.values().copied().collect();
        let mut sessions = Vec::with_capacity(ids.len());
        for checkout_id in ids {
            let checkout = self.handler.load(checkout_id).await?;
            if !checkout.status.is_terminal() {
                sessions.push(checkout);
            }
        }
        Ok(sessions)
    }

    /// Rebuild the cart → session index from the event streams
    pub async fn rebuild_index(&self) -> Result<usize, ServiceError> {
        let ids = self.handler.event_store().aggregate_ids().await?;
        let mut index = HashMap::new();
        for checkout_id in ids {
            let checkout = self.handler.load(checkout_id).await?;
            if !checkout.status.is_terminal() {
                index.insert(checkout.cart_id, checkout.id);
            }
        }

        let mut current = self.by_cart.write().await;
        *current = index;
        tracing::info!(open_sessions = current.len(), "Checkout index rebuilt");
        Ok(current.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::domain::cart::CartEvent;
    use crate::domain::checkout::CheckoutStep;
    use crate::domain::pricing::{Coupon, CurrencyCode, DiscountKind};
    use crate::event_sourcing::InMemoryEventStore;
    use crate::services::catalog::{InMemoryCatalog, ProductSnapshot};
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal::Decimal;

    struct Fixture {
        checkouts: CheckoutService,
        carts: Arc<CartService>,
        catalog: Arc<InMemoryCatalog>,
        clock: Arc<ManualClock>,
        customer_id: Uuid,
        cart_id: Uuid,
        shop_id: Uuid,
    }

    fn usd(cents: i64) -> Decimal {
        Decimal::new(cents, 2)
    }

    fn address() -> Address {
        Address {
            id: Uuid::new_v4(),
            recipient: "Ada Lovelace".to_string(),
            line1: "1 Analytical Way".to_string(),
            line2: None,
            city: "London".to_string(),
            region: None,
            postal_code: "N1".to_string(),
            country_code: "GB".to_string(),
            phone: None,
        }
    }

    async fn fixture() -> Fixture {
        let catalog = Arc::new(InMemoryCatalog::new());
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 10, 1, 9, 0, 0).unwrap()));
        let metrics = Arc::new(Metrics::new().unwrap());
        let carts = Arc::new(CartService::new(
            Arc::new(InMemoryEventStore::<CartEvent>::new("carts")),
            catalog.clone(),
            clock.clone(),
            LifecyclePolicy::default(),
            CurrencyCode::default(),
            metrics.clone(),
        ));
        let checkouts = CheckoutService::new(
            Arc::new(InMemoryEventStore::new("checkouts")),
            carts.clone(),
            catalog.clone(),
            clock.clone(),
            LifecyclePolicy::default(),
            metrics,
        );

        let shop_id = Uuid::new_v4();
        let product = ProductSnapshot {
            product_id: Uuid::new_v4(),
            variant_id: Uuid::new_v4(),
            shop_id,
            name: "Kettle".to_string(),
            sku: "KTL-1".to_string(),
            image_url: None,
            category: None,
            unit_price: usd(4500),
            cost_price: usd(2000),
            discount: None,
        };
        catalog.upsert_product(product.clone()).await;

        let customer_id = Uuid::new_v4();
        let cart = carts.get_or_create(customer_id).await.unwrap();
        carts
            .add_item(cart.id, product.product_id, product.variant_id, 2)
            .await
            .unwrap();

        Fixture {
            checkouts,
            carts,
            catalog,
            clock,
            customer_id,
            cart_id: cart.id,
            shop_id,
        }
    }

    #[tokio::test]
    async fn test_start_snapshots_cart_and_is_unique_per_cart() {
        let f = fixture().await;
        let first = f.checkouts.start(f.cart_id, f.customer_id).await.unwrap();
        assert_eq!(first.subtotal, usd(9000));
        assert_eq!(first.current_step(), CheckoutStep::Shipping);

        f.clock.advance(Duration::minutes(20));
        let again = f.checkouts.start(f.cart_id, f.customer_id).await.unwrap();
        assert_eq!(again.id, first.id);
        assert!(again.expires_at > first.expires_at);
    }

    #[tokio::test]
    async fn test_start_rejects_foreign_or_empty_cart() {
        let f = fixture().await;
        let err = f.checkouts.start(f.cart_id, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidRequest(_)));

        f.carts.clear(f.cart_id).await.unwrap();
        let err = f.checkouts.start(f.cart_id, f.customer_id).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_expired_session_is_abandoned_on_access() {
        let f = fixture().await;
        let checkout = f.checkouts.start(f.cart_id, f.customer_id).await.unwrap();

        f.clock.advance(Duration::minutes(31));
        let err = f.checkouts.set_shipping_address(checkout.id, address()).await.unwrap_err();
        assert!(matches!(err, ServiceError::Checkout(CheckoutError::Expired)));

        let abandoned = f.checkouts.get(checkout.id).await.unwrap();
        assert_eq!(abandoned.status, CheckoutStatus::Abandoned);
        assert_eq!(abandoned.closed_reason.as_deref(), Some("expired"));

        // a new start opens a fresh session
        let fresh = f.checkouts.start(f.cart_id, f.customer_id).await.unwrap();
        assert_ne!(fresh.id, checkout.id);
    }

    #[tokio::test]
    async fn test_steps_and_coupon() {
        let f = fixture().await;
        let checkout = f.checkouts.start(f.cart_id, f.customer_id).await.unwrap();

        let checkout = f.checkouts.set_shipping_address(checkout.id, address()).await.unwrap();
        assert_eq!(checkout.status, CheckoutStatus::ShippingSelected);
        assert_eq!(checkout.current_step(), CheckoutStep::Payment);

        let now = f.clock.now();
        f.catalog
            .upsert_coupon(Coupon {
                id: Uuid::new_v4(),
                code: "SAVE20".to_string(),
                kind: DiscountKind::FixedAmount,
                value: usd(2000),
                minimum_amount: usd(5000),
                starts_at: now - Duration::days(1),
                ends_at: now + Duration::days(1),
                is_active: true,
                shop_ids: vec![f.shop_id],
            })
            .await;
        assert!(f.checkouts.apply_coupon(checkout.id, "SAVE20").await.unwrap());
        assert!(!f.checkouts.apply_coupon(checkout.id, "MISSING").await.unwrap());

        let checkout = f.checkouts.get(checkout.id).await.unwrap();
        assert_eq!(checkout.grand_total(), usd(7000));
        assert!(!checkout.is_ready_for_order());

        let checkout = f
            .checkouts
            .set_payment_method(
                checkout.id,
                PaymentMethod {
                    id: Uuid::new_v4(),
                    kind: "CARD".to_string(),
                },
            )
            .await
            .unwrap();
        assert!(checkout.is_ready_for_order());
        assert_eq!(checkout.current_step(), CheckoutStep::Review);

        let checkout = f.checkouts.await_payment(checkout.id).await.unwrap();
        assert_eq!(checkout.status, CheckoutStatus::AwaitingPayment);
    }

    #[tokio::test]
    async fn test_cart_coupon_is_not_counted_twice() {
        let f = fixture().await;
        let now = f.clock.now();
        f.catalog
            .upsert_coupon(Coupon {
                id: Uuid::new_v4(),
                code: "SAVE20".to_string(),
                kind: DiscountKind::FixedAmount,
                value: usd(2000),
                minimum_amount: usd(5000),
                starts_at: now - Duration::days(1),
                ends_at: now + Duration::days(1),
                is_active: true,
                shop_ids: vec![f.shop_id],
            })
            .await;

        assert!(f.carts.apply_coupon(f.cart_id, "SAVE20").await.unwrap());
        let checkout = f.checkouts.start(f.cart_id, f.customer_id).await.unwrap();
        assert_eq!(checkout.cart_discount, usd(2000));

        assert!(!f.checkouts.apply_coupon(checkout.id, "SAVE20").await.unwrap());
        let checkout = f.checkouts.get(checkout.id).await.unwrap();
        assert!(checkout.coupon.is_none());
        assert_eq!(checkout.pricing.discount_total, usd(2000));
        assert_eq!(checkout.grand_total(), usd(7000));
    }

    #[tokio::test]
    async fn test_coupon_moved_to_cart_is_dropped_from_session() {
        let f = fixture().await;
        let now = f.clock.now();
        f.catalog
            .upsert_coupon(Coupon {
                id: Uuid::new_v4(),
                code: "SAVE20".to_string(),
                kind: DiscountKind::FixedAmount,
                value: usd(2000),
                minimum_amount: usd(5000),
                starts_at: now - Duration::days(1),
                ends_at: now + Duration::days(1),
                is_active: true,
                shop_ids: vec![f.shop_id],
            })
            .await;

        let checkout = f.checkouts.start(f.cart_id, f.customer_id).await.unwrap();
        assert!(f.checkouts.apply_coupon(checkout.id, "SAVE20").await.unwrap());
        assert!(f.carts.apply_coupon(f.cart_id, "SAVE20").await.unwrap());

        let checkout = f.checkouts.refresh_pricing(checkout.id).await.unwrap();
        assert!(checkout.coupon.is_none());
        assert_eq!(checkout.pricing.discount_total, usd(2000));
        assert_eq!(checkout.grand_total(), usd(7000));
    }

    #[tokio::test]
    async fn test_abandoned_session_is_single_use() {
        let f = fixture().await;
        let checkout = f.checkouts.start(f.cart_id, f.customer_id).await.unwrap();
        f.checkouts.abandon(checkout.id, "changed my mind").await.unwrap();

        let err = f.checkouts.set_customer_notes(checkout.id, None).await.unwrap_err();
        assert!(matches!(err, ServiceError::Checkout(CheckoutError::Closed(CheckoutStatus::Abandoned))));
        assert!(f.checkouts.open_sessions().await.unwrap().is_empty());
    }
}
