use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::LifecyclePolicy;
use crate::domain::cart::{AbandonReason, CartAggregate, CartCommand, CartEvent, CartOwner, CartStatus};
use crate::domain::pricing::{self, CurrencyCode};
use crate::event_sourcing::{CommandContext, CommandHandler, EventStore, HandlerError};
use crate::metrics::Metrics;
use super::catalog::Catalog;
use super::error::ServiceError;

// ============================================================================
// Cart Service
// ============================================================================
//
// Owner → active cart is a projection kept next to the event store. It is
// rebuilt from the streams on startup (`rebuild_index`) and updated here
// whenever a cart is opened or leaves the ACTIVE state.
//
// ============================================================================

pub struct CartService {
    handler: CommandHandler<CartAggregate>,
    catalog: Arc<dyn Catalog>,
    clock: Arc<dyn Clock>,
    policy: LifecyclePolicy,
    currency: CurrencyCode,
    metrics: Arc<Metrics>,
    by_owner: RwLock<HashMap<CartOwner, Uuid>>,
}

impl CartService {
    pub fn new(
        event_store: Arc<dyn EventStore<CartEvent>>,
        catalog: Arc<dyn Catalog>,
        clock: Arc<dyn Clock>,
        policy: LifecyclePolicy,
        currency: CurrencyCode,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            handler: CommandHandler::new(event_store),
            catalog,
            clock,
            policy,
            currency,
            metrics,
            by_owner: RwLock::new(HashMap::new()),
        }
    }

    fn ctx(&self) -> CommandContext {
        CommandContext::new(self.clock.now())
    }

    async fn execute(&self, cart_id: Uuid, command: CartCommand) -> Result<CartAggregate, ServiceError> {
        Ok(self.handler.handle(cart_id, &command, self.ctx()).await?)
    }

    pub async fn get(&self, cart_id: Uuid) -> Result<CartAggregate, ServiceError> {
        Ok(self.handler.load(cart_id).await?)
    }

    pub async fn get_or_create(&self, customer_id: Uuid) -> Result<CartAggregate, ServiceError> {
        self.open_for(CartOwner::Customer(customer_id)).await
    }

    pub async fn get_or_create_guest(&self, session_id: &str) -> Result<CartAggregate, ServiceError> {
        if session_id.trim().is_empty() {
            return Err(ServiceError::InvalidRequest("guest session id is empty".to_string()));
        }
        self.open_for(CartOwner::Guest(session_id.to_string())).await
    }

    /// Active cart of `owner`, opening one if there is none
    async fn open_for(&self, owner: CartOwner) -> Result<CartAggregate, ServiceError> {
        // Held across the open so one owner never ends up with two carts
        let mut index = self.by_owner.write().await;

        if let Some(cart_id) = index.get(&owner).copied() {
            match self.handler.load(cart_id).await {
                Ok(cart) if cart.is_active() && !cart.is_expired(self.clock.now()) => return Ok(cart),
                Ok(cart) if cart.is_active() => {
                    self.handler
                        .handle(
                            cart_id,
                            &CartCommand::MarkAbandoned { reason: AbandonReason::Expired },
                            self.ctx(),
                        )
                        .await?;
                    self.metrics.record_cart_closed("expired");
                    tracing::info!(cart_id = %cart_id, "Expired cart abandoned on access");
                }
                Ok(_) | Err(HandlerError::NotFound { .. }) => {}
                Err(e) => return Err(e.into()),
            }
            index.remove(&owner);
        }

        let cart_id = Uuid::new_v4();
        let cart = self
            .handler
            .create(
                cart_id,
                &CartCommand::Open {
                    owner: owner.clone(),
                    currency: self.currency.clone(),
                    ttl: self.policy.cart_ttl,
                },
                self.ctx(),
            )
            .await?;

        self.metrics.record_cart_opened(owner.kind());
        tracing::info!(cart_id = %cart_id, owner = owner.kind(), "🛒 Cart opened");
        index.insert(owner, cart_id);
        Ok(cart)
    }

    /// Add `quantity` units at the current catalog price
    pub async fn add_item(
        &self,
        cart_id: Uuid,
        product_id: Uuid,
        variant_id: Uuid,
        quantity: u32,
    ) -> Result<CartAggregate, ServiceError> {
        let product = self.catalog.product(product_id, variant_id).await?;

        let cart = self
            .execute(
                cart_id,
                CartCommand::AddItem {
                    product_id,
                    variant_id,
                    shop_id: product.shop_id,
                    product_name: product.name.clone(),
                    quantity,
                    unit_price: product.unit_price,
                    unit_discount: product.unit_discount(),
                },
            )
            .await?;

        tracing::debug!(
            cart_id = %cart_id,
            product_id = %product_id,
            variant_id = %variant_id,
            quantity = quantity,
            subtotal = %cart.totals.subtotal,
            "Item added to cart"
        );
        Ok(cart)
    }

    /// Zero or a negative quantity removes the line
    pub async fn update_quantity(&self, cart_id: Uuid, item_id: Uuid, quantity: i64) -> Result<CartAggregate, ServiceError> {
        self.execute(cart_id, CartCommand::ChangeQuantity { item_id, quantity }).await
    }

    pub async fn remove_item(&self, cart_id: Uuid, item_id: Uuid) -> Result<CartAggregate, ServiceError> {
        self.execute(cart_id, CartCommand::RemoveItem { item_id }).await
    }

    pub async fn save_for_later(&self, cart_id: Uuid, item_id: Uuid) -> Result<CartAggregate, ServiceError> {
        self.execute(cart_id, CartCommand::SaveForLater { item_id }).await
    }

    pub async fn move_to_cart(&self, cart_id: Uuid, item_id: Uuid) -> Result<CartAggregate, ServiceError> {
        self.execute(cart_id, CartCommand::MoveToCart { item_id }).await
    }

    pub async fn clear(&self, cart_id: Uuid) -> Result<CartAggregate, ServiceError> {
        self.execute(cart_id, CartCommand::Clear).await
    }

    /// Attach a coupon by code. `Ok(false)` means the coupon is unknown or
    /// not valid for this cart right now; nothing is changed in that case.
    pub async fn apply_coupon(&self, cart_id: Uuid, code: &str) -> Result<bool, ServiceError> {
        let Some(coupon) = self.catalog.coupon_by_code(code).await? else {
            tracing::debug!(cart_id = %cart_id, code = code, "Unknown coupon code");
            return Ok(false);
        };

        let cart = self.get(cart_id).await?;
        let now = self.clock.now();
        let net_total = cart.totals.subtotal - cart.totals.discount_total;
        let shops = cart.shop_ids();

        let valid = !shops.is_empty()
            && shops
                .iter()
                .all(|shop_id| pricing::is_coupon_valid(&coupon, net_total, *shop_id, now));
        if !valid {
            tracing::debug!(cart_id = %cart_id, code = code, net_total = %net_total, "Coupon rejected");
            return Ok(false);
        }

        self.execute(cart_id, CartCommand::ApplyCoupon { coupon }).await?;
        tracing::info!(cart_id = %cart_id, code = code, "Coupon applied to cart");
        Ok(true)
    }

    pub async fn remove_coupon(&self, cart_id: Uuid, coupon_id: Uuid) -> Result<CartAggregate, ServiceError> {
        self.execute(cart_id, CartCommand::RemoveCoupon { coupon_id }).await
    }

    pub async fn update_estimates(
        &self,
        cart_id: Uuid,
        shipping_estimate: Decimal,
        tax_estimate: Decimal,
    ) -> Result<CartAggregate, ServiceError> {
        self.execute(cart_id, CartCommand::UpdateEstimates { shipping_estimate, tax_estimate })
            .await
    }

    /// Move the guest's active lines into the customer's cart and retire the guest cart.
    /// Without an active guest cart this is just `get_or_create(customer_id)`.
    pub async fn merge_guest_cart(&self, session_id: &str, customer_id: Uuid) -> Result<CartAggregate, ServiceError> {
        let guest_owner = CartOwner::Guest(session_id.to_string());
        let guest_id = self.by_owner.read().await.get(&guest_owner).copied();

        let guest = match guest_id {
            Some(id) => Some(self.get(id).await?).filter(|cart| cart.is_active()),
            None => None,
        };
        let mut target = self.get_or_create(customer_id).await?;
        let Some(guest) = guest else {
            return Ok(target);
        };

        // Each line goes through the normal add so duplicates merge by variant
        for item in guest.active_items() {
            target = self
                .execute(
                    target.id,
                    CartCommand::AddItem {
                        product_id: item.product_id,
                        variant_id: item.variant_id,
                        shop_id: item.shop_id,
                        product_name: item.product_name.clone(),
                        quantity: item.quantity,
                        unit_price: item.unit_price,
                        unit_discount: item.unit_discount,
                    },
                )
                .await?;
        }

        self.mark_merged(guest.id, target.id).await?;
        tracing::info!(
            guest_cart_id = %guest.id,
            cart_id = %target.id,
            customer_id = %customer_id,
            lines = guest.active_items().count(),
            "Guest cart merged"
        );
        Ok(target)
    }

    pub async fn mark_converted(&self, cart_id: Uuid, order_id: Uuid) -> Result<CartAggregate, ServiceError> {
        let was_active = self.get(cart_id).await?.is_active();
        let cart = self.execute(cart_id, CartCommand::MarkConverted { order_id }).await?;
        if was_active {
            self.metrics.record_cart_closed("converted");
        }
        self.forget(&cart).await;
        Ok(cart)
    }

    pub async fn mark_abandoned(&self, cart_id: Uuid, reason: AbandonReason) -> Result<CartAggregate, ServiceError> {
        let cart = self.execute(cart_id, CartCommand::MarkAbandoned { reason }).await?;
        self.metrics.record_cart_closed(match reason {
            AbandonReason::Inactive => "abandoned",
            AbandonReason::Expired => "expired",
            AbandonReason::Discarded => "discarded",
        });
        tracing::info!(cart_id = %cart_id, reason = ?reason, "Cart abandoned");
        self.forget(&cart).await;
        Ok(cart)
    }

    pub async fn mark_merged(&self, cart_id: Uuid, into_cart_id: Uuid) -> Result<CartAggregate, ServiceError> {
        let cart = self.execute(cart_id, CartCommand::MarkMerged { into_cart_id }).await?;
        self.metrics.record_cart_closed("merged");
        self.forget(&cart).await;
        Ok(cart)
    }

    /// Drop the owner entry once the cart it points to is no longer active
    async fn forget(&self, cart: &CartAggregate) {
        if cart.status == CartStatus::Active {
            return;
        }
        let mut index = self.by_owner.write().await;
        if index.get(&cart.owner) == Some(&cart.id) {
            index.remove(&cart.owner);
        }
    }

    /// Currently active carts, for the expiration sweep
    pub async fn active_carts(&self) -> Result<Vec<CartAggregate>, ServiceError> {
        let ids: Vec<Uuid> = self.by_owner.read().await.values().copied().collect();
        let mut carts = Vec::with_capacity(ids.len());
        for cart_id in ids {
            let cart = self.get(cart_id).await?;
            if cart.is_active() {
                carts.push(cart);
            }
        }
        Ok(carts)
    }

    /// Rebuild the owner index from the event streams. Returns the number of active carts.
    pub async fn rebuild_index(&self) -> Result<usize, ServiceError> {
        let ids = self.handler.event_store().aggregate_ids().await?;

        let mut latest: HashMap<CartOwner, CartAggregate> = HashMap::new();
        for cart_id in ids {
            let cart = self.get(cart_id).await?;
            if !cart.is_active() {
                continue;
            }
            let newer = latest
                .get(&cart.owner)
                .map_or(true, |current| cart.created_at > current.created_at);
            if newer {
                latest.insert(cart.owner.clone(), cart);
            }
        }

        let mut index = self.by_owner.write().await;
        *index = latest.into_iter().map(|(owner, cart)| (owner, cart.id)).collect();
        tracing::info!(active_carts = index.len(), "Cart index rebuilt");
        Ok(index.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::domain::pricing::{Coupon, DiscountKind, ProductDiscount};
    use crate::event_sourcing::InMemoryEventStore;
    use crate::services::catalog::{InMemoryCatalog, ProductSnapshot};
    use chrono::{Duration, TimeZone, Utc};

    struct Fixture {
        service: CartService,
        catalog: Arc<InMemoryCatalog>,
        clock: Arc<ManualClock>,
        store: Arc<InMemoryEventStore<CartEvent>>,
        shop_id: Uuid,
    }

    fn usd(cents: i64) -> Decimal {
        Decimal::new(cents, 2)
    }

    fn fixture() -> Fixture {
        let catalog = Arc::new(InMemoryCatalog::new());
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 10, 1, 12, 0, 0).unwrap()));
        let store = Arc::new(InMemoryEventStore::new("carts"));
        let service = CartService::new(
            store.clone(),
            catalog.clone(),
            clock.clone(),
            LifecyclePolicy::default(),
            CurrencyCode::default(),
            Arc::new(Metrics::new().unwrap()),
        );
        Fixture {
            service,
            catalog,
            clock,
            store,
            shop_id: Uuid::new_v4(),
        }
    }

    async fn product(f: &Fixture, cents: i64, discount: Option<ProductDiscount>) -> ProductSnapshot {
        let product = ProductSnapshot {
            product_id: Uuid::new_v4(),
            variant_id: Uuid::new_v4(),
            shop_id: f.shop_id,
            name: "Lamp".to_string(),
            sku: "LMP-1".to_string(),
            image_url: None,
            category: None,
            unit_price: usd(cents),
            cost_price: usd(cents / 2),
            discount,
        };
        f.catalog.upsert_product(product.clone()).await;
        product
    }

    fn coupon(f: &Fixture, code: &str, minimum: Decimal) -> Coupon {
        let now = f.clock.now();
        Coupon {
            id: Uuid::new_v4(),
            code: code.to_string(),
            kind: DiscountKind::FixedAmount,
            value: usd(1000),
            minimum_amount: minimum,
            starts_at: now - Duration::days(1),
            ends_at: now + Duration::days(1),
            is_active: true,
            shop_ids: vec![f.shop_id],
        }
    }

    #[tokio::test]
    async fn test_get_or_create_returns_the_same_active_cart() {
        let f = fixture();
        let customer = Uuid::new_v4();
        let first = f.service.get_or_create(customer).await.unwrap();
        let second = f.service.get_or_create(customer).await.unwrap();
        assert_eq!(first.id, second.id);

        let guest = f.service.get_or_create_guest("sess-1").await.unwrap();
        assert_ne!(guest.id, first.id);
        assert!(f.service.get_or_create_guest("  ").await.is_err());
    }

    #[tokio::test]
    async fn test_expired_cart_is_replaced_on_access() {
        let f = fixture();
        let customer = Uuid::new_v4();
        let old = f.service.get_or_create(customer).await.unwrap();

        f.clock.advance(Duration::hours(73));
        let fresh = f.service.get_or_create(customer).await.unwrap();

        assert_ne!(old.id, fresh.id);
        assert_eq!(f.service.get(old.id).await.unwrap().status, CartStatus::Abandoned);
    }

    #[tokio::test]
    async fn test_add_item_uses_catalog_prices_and_merges_variants() {
        let f = fixture();
        let lamp = product(&f, 5000, Some(ProductDiscount::percentage(Decimal::from(10)))).await;
        let cart = f.service.get_or_create(Uuid::new_v4()).await.unwrap();

        f.service.add_item(cart.id, lamp.product_id, lamp.variant_id, 1).await.unwrap();
        let cart = f.service.add_item(cart.id, lamp.product_id, lamp.variant_id, 2).await.unwrap();

        assert_eq!(cart.items.len(), 1);
        assert_eq!(cart.items[0].quantity, 3);
        assert_eq!(cart.totals.subtotal, usd(13500));
        assert_eq!(cart.totals.item_count, 3);

        let missing = f.service.add_item(cart.id, Uuid::new_v4(), Uuid::new_v4(), 1).await.unwrap_err();
        assert!(missing.is_not_found());
    }

    #[tokio::test]
    async fn test_coupon_validity_is_a_boolean() {
        let f = fixture();
        let lamp = product(&f, 5000, None).await;
        let cart = f.service.get_or_create(Uuid::new_v4()).await.unwrap();
        f.catalog.upsert_coupon(coupon(&f, "TEN", usd(6000))).await;

        // empty cart: no shop to validate against
        assert!(!f.service.apply_coupon(cart.id, "TEN").await.unwrap());

        f.service.add_item(cart.id, lamp.product_id, lamp.variant_id, 1).await.unwrap();
        assert!(!f.service.apply_coupon(cart.id, "TEN").await.unwrap());
        assert!(!f.service.apply_coupon(cart.id, "NOPE").await.unwrap());

        f.service.add_item(cart.id, lamp.product_id, lamp.variant_id, 1).await.unwrap();
        assert!(f.service.apply_coupon(cart.id, "ten").await.unwrap());

        let cart = f.service.get(cart.id).await.unwrap();
        assert_eq!(cart.totals.discount_total, usd(1000));
        assert_eq!(cart.totals.total_estimate, usd(9000));
    }

    #[tokio::test]
    async fn test_merge_guest_cart() {
        let f = fixture();
        let lamp = product(&f, 2000, None).await;
        let shade = product(&f, 1500, None).await;
        let customer = Uuid::new_v4();

        let guest = f.service.get_or_create_guest("sess-9").await.unwrap();
        f.service.add_item(guest.id, lamp.product_id, lamp.variant_id, 2).await.unwrap();
        f.service.add_item(guest.id, shade.product_id, shade.variant_id, 1).await.unwrap();

        let own = f.service.get_or_create(customer).await.unwrap();
        f.service.add_item(own.id, lamp.product_id, lamp.variant_id, 1).await.unwrap();

        let merged = f.service.merge_guest_cart("sess-9", customer).await.unwrap();
        assert_eq!(merged.id, own.id);
        assert_eq!(merged.items.len(), 2);
        assert_eq!(merged.item_for_variant(lamp.product_id, lamp.variant_id).unwrap().quantity, 3);

        let guest = f.service.get(guest.id).await.unwrap();
        assert_eq!(guest.status, CartStatus::Merged);
        assert_eq!(guest.merged_into, Some(own.id));

        // a new guest visit starts from scratch
        let next = f.service.get_or_create_guest("sess-9").await.unwrap();
        assert_ne!(next.id, guest.id);
    }

    #[tokio::test]
    async fn test_rebuild_index_after_restart() {
        let f = fixture();
        let customer = Uuid::new_v4();
        let cart = f.service.get_or_create(customer).await.unwrap();
        let converted = f.service.get_or_create_guest("sess-2").await.unwrap();
        f.service.mark_converted(converted.id, Uuid::new_v4()).await.unwrap();

        let restarted = CartService::new(
            f.store.clone(),
            f.catalog.clone(),
            f.clock.clone(),
            LifecyclePolicy::default(),
            CurrencyCode::default(),
            Arc::new(Metrics::new().unwrap()),
        );
        assert_eq!(restarted.rebuild_index().await.unwrap(), 1);
        assert_eq!(restarted.get_or_create(customer).await.unwrap().id, cart.id);
        assert_eq!(restarted.active_carts().await.unwrap().len(), 1);
    }
}
