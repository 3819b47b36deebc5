use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use futures_util::future::join_all;
use rust_decimal::Decimal;
use uuid::Uuid;

use marketplace_orders::app::{App, Collaborators, Stores};
use marketplace_orders::clock::{Clock, ManualClock};
use marketplace_orders::config::AppConfig;
use marketplace_orders::domain::cart::CartStatus;
use marketplace_orders::domain::checkout::{Address, CheckoutStatus, PaymentMethod, ShippingMethod};
use marketplace_orders::domain::order::{OrderStatus, PaymentStatus, SYSTEM_ACTOR};
use marketplace_orders::domain::pricing::{Coupon, DiscountKind, ProductDiscount};
use marketplace_orders::metrics::Metrics;
use marketplace_orders::services::{
    InMemoryCatalog, InMemoryInventory, InventoryService, LoggingNotifier, ProductSnapshot, RecordingPaymentGateway,
    ServiceError,
};

struct Harness {
    app: App,
    catalog: Arc<InMemoryCatalog>,
    inventory: Arc<InMemoryInventory>,
    payments: Arc<RecordingPaymentGateway>,
    clock: Arc<ManualClock>,
}

fn usd(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

fn harness() -> Harness {
    let catalog = Arc::new(InMemoryCatalog::new());
    let inventory = Arc::new(InMemoryInventory::new());
    let payments = Arc::new(RecordingPaymentGateway::new());
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 10, 5, 14, 30, 0).unwrap()));
    let collaborators = Collaborators::new(
        catalog.clone(),
        inventory.clone(),
        payments.clone(),
        Arc::new(LoggingNotifier),
    );
    let app = App::build(
        &AppConfig::default(),
        Stores::in_memory(),
        collaborators,
        clock.clone(),
        Arc::new(Metrics::new().unwrap()),
    );
    Harness {
        app,
        catalog,
        inventory,
        payments,
        clock,
    }
}

impl Harness {
    async fn product(&self, shop_id: Uuid, price: Decimal, stock: u32) -> ProductSnapshot {
        self.discounted_product(shop_id, price, None, stock).await
    }

    async fn discounted_product(
        &self,
        shop_id: Uuid,
        price: Decimal,
        discount: Option<ProductDiscount>,
        stock: u32,
    ) -> ProductSnapshot {
        let product = ProductSnapshot {
            product_id: Uuid::new_v4(),
            variant_id: Uuid::new_v4(),
            shop_id,
            name: "Linen Apron".to_string(),
            sku: format!("APR-{}", &Uuid::new_v4().simple().to_string()[..6]),
            image_url: None,
            category: Some("kitchen".to_string()),
            unit_price: price,
            cost_price: usd(1200),
            discount,
        };
        self.catalog.upsert_product(product.clone()).await;
        self.inventory
            .set_stock(product.product_id, product.variant_id, self.inventory.default_warehouse(), stock)
            .await;
        product
    }

    async fn coupon(&self, code: &str, shop_id: Uuid) {
        let now = self.clock.now();
        self.catalog
            .upsert_coupon(Coupon {
                id: Uuid::new_v4(),
                code: code.to_string(),
                kind: DiscountKind::FixedAmount,
                value: usd(2000),
                minimum_amount: usd(5000),
                starts_at: now - Duration::days(1),
                ends_at: now + Duration::days(7),
                is_active: true,
                shop_ids: vec![shop_id],
            })
            .await;
    }

    /// Cart with `quantity` of `product`, checked out up to review
    async fn ready_checkout(&self, customer_id: Uuid, product: &ProductSnapshot, quantity: u32) -> Uuid {
        let app = &self.app;
        let cart = app.carts.get_or_create(customer_id).await.unwrap();
        app.carts
            .add_item(cart.id, product.product_id, product.variant_id, quantity)
            .await
            .unwrap();
        self.checkout_cart(customer_id, cart.id).await
    }

    async fn checkout_cart(&self, customer_id: Uuid, cart_id: Uuid) -> Uuid {
        let app = &self.app;
        let checkout = app.checkouts.start(cart_id, customer_id).await.unwrap();
        app.checkouts.set_shipping_address(checkout.id, address()).await.unwrap();
        app.checkouts
            .set_shipping_method(
                checkout.id,
                ShippingMethod {
                    code: "STD".to_string(),
                    name: "Standard".to_string(),
                    cost: usd(1000),
                },
            )
            .await
            .unwrap();
        app.checkouts
            .set_payment_method(
                checkout.id,
                PaymentMethod {
                    id: Uuid::new_v4(),
                    kind: "CARD".to_string(),
                },
            )
            .await
            .unwrap();
        checkout.id
    }

    async fn stock(&self, product: &ProductSnapshot) -> u32 {
        self.inventory.available(product.product_id, product.variant_id).await.unwrap()
    }
}

fn address() -> Address {
    Address {
        id: Uuid::new_v4(),
        recipient: "Katherine Johnson".to_string(),
        line1: "12 Orbit Street".to_string(),
        line2: None,
        city: "Hampton".to_string(),
        region: Some("VA".to_string()),
        postal_code: "23666".to_string(),
        country_code: "US".to_string(),
        phone: None,
    }
}

#[tokio::test]
async fn test_happy_path_places_priced_order() {
    let h = harness();
    let shop_id = Uuid::new_v4();
    let product = h
        .discounted_product(shop_id, usd(5000), Some(ProductDiscount::percentage(Decimal::from(10))), 10)
        .await;
    h.coupon("SAVE20", shop_id).await;

    let customer_id = Uuid::new_v4();
    let checkout_id = h.ready_checkout(customer_id, &product, 2).await;
    assert!(h.app.checkouts.apply_coupon(checkout_id, "save20").await.unwrap());

    let order = h.app.placement.place_order(checkout_id).await.unwrap();

    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.payment_status, PaymentStatus::Pending);
    assert_eq!(order.items.len(), 1);
    assert_eq!(order.items[0].quantity, 2);
    assert_eq!(order.items[0].unit_price, usd(5000));
    assert_eq!(order.items[0].discount_amount, usd(1000));
    assert_eq!(order.items[0].total_price, usd(9000));
    assert_eq!(order.pricing.subtotal, usd(9000));
    assert_eq!(order.pricing.discount_total, usd(2000));
    assert_eq!(order.pricing.shipping, usd(1000));
    assert_eq!(order.pricing.total, usd(8000));
    assert_eq!(order.coupon.as_ref().map(|c| c.code.as_str()), Some("SAVE20"));
    assert!(order.order_number.as_str().starts_with("ORD-20261005-"));
    assert_eq!(order.billing_address, Some(order.shipping_address.clone()));

    assert_eq!(order.status_history.len(), 1);
    assert_eq!(order.status_history[0].new_status, OrderStatus::Pending);
    assert_eq!(order.status_history[0].changed_by, SYSTEM_ACTOR);

    assert_eq!(h.stock(&product).await, 8);

    let checkout = h.app.checkouts.get(checkout_id).await.unwrap();
    assert_eq!(checkout.status, CheckoutStatus::Completed);
    assert_eq!(checkout.order_id, Some(order.id));
    let cart = h.app.carts.get(order.cart_id).await.unwrap();
    assert_eq!(cart.status, CartStatus::Converted);

    let by_number = h.app.orders.get_by_number(order.order_number.as_str()).await.unwrap();
    assert_eq!(by_number.id, order.id);

    // the customer gets a fresh cart next time
    let next = h.app.carts.get_or_create(customer_id).await.unwrap();
    assert_ne!(next.id, cart.id);
    assert!(next.is_empty());
}

#[tokio::test]
async fn test_coupon_on_cart_is_not_applied_again_at_checkout() {
    let h = harness();
    let shop_id = Uuid::new_v4();
    let product = h
        .discounted_product(shop_id, usd(5000), Some(ProductDiscount::percentage(Decimal::from(10))), 10)
        .await;
    h.coupon("SAVE20", shop_id).await;

    let customer_id = Uuid::new_v4();
    let cart = h.app.carts.get_or_create(customer_id).await.unwrap();
    h.app
        .carts
        .add_item(cart.id, product.product_id, product.variant_id, 2)
        .await
        .unwrap();
    assert!(h.app.carts.apply_coupon(cart.id, "SAVE20").await.unwrap());

    let checkout_id = h.checkout_cart(customer_id, cart.id).await;
    assert!(!h.app.checkouts.apply_coupon(checkout_id, "SAVE20").await.unwrap());

    let order = h.app.placement.place_order(checkout_id).await.unwrap();
    assert_eq!(order.pricing.subtotal, usd(9000));
    assert_eq!(order.pricing.discount_total, usd(2000));
    assert_eq!(order.pricing.shipping, usd(1000));
    assert_eq!(order.pricing.total, usd(8000));
}

#[tokio::test]
async fn test_retried_placement_returns_same_order() {
    let h = harness();
    let product = h.product(Uuid::new_v4(), usd(2500), 5).await;
    let checkout_id = h.ready_checkout(Uuid::new_v4(), &product, 2).await;

    let first = h.app.placement.place_order(checkout_id).await.unwrap();
    let second = h.app.placement.place_order(checkout_id).await.unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(first.order_number, second.order_number);
    assert_eq!(h.stock(&product).await, 3);
}

#[tokio::test]
async fn test_cancel_after_payment_refunds_once_and_restocks() {
    let h = harness();
    let product = h.product(Uuid::new_v4(), usd(3000), 6).await;
    let checkout_id = h.ready_checkout(Uuid::new_v4(), &product, 3).await;

    let order = h.app.placement.place_order(checkout_id).await.unwrap();
    assert_eq!(h.stock(&product).await, 3);

    h.app.orders.confirm_payment(order.id, "txn-42", SYSTEM_ACTOR).await.unwrap();
    let cancelled = h.app.orders.cancel(order.id, "changed my mind", "customer").await.unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert_eq!(cancelled.payment_status, PaymentStatus::RefundRequested);

    // a second cancel is a no-op
    let again = h.app.orders.cancel(order.id, "changed my mind", "customer").await.unwrap();
    assert_eq!(again.version, cancelled.version);

    let refunds = h.payments.requests().await;
    assert_eq!(refunds.len(), 1);
    assert_eq!(refunds[0].amount, usd(10000));
    assert_eq!(refunds[0].idempotency_key, format!("cancel:{}", order.id));
    assert_eq!(h.stock(&product).await, 6);
}

#[tokio::test]
async fn test_shortfall_fails_checkout_without_touching_stock() {
    let h = harness();
    let shop_id = Uuid::new_v4();
    let plenty = h.product(shop_id, usd(1000), 10).await;
    let scarce = h.product(shop_id, usd(1500), 1).await;

    let customer_id = Uuid::new_v4();
    let cart = h.app.carts.get_or_create(customer_id).await.unwrap();
    h.app.carts.add_item(cart.id, plenty.product_id, plenty.variant_id, 4).await.unwrap();
    h.app.carts.add_item(cart.id, scarce.product_id, scarce.variant_id, 2).await.unwrap();
    let checkout_id = h.checkout_cart(customer_id, cart.id).await;

    let err = h.app.placement.place_order(checkout_id).await.unwrap_err();
    match err {
        ServiceError::InsufficientInventory { requested, available, .. } => {
            assert_eq!(requested, 2);
            assert_eq!(available, 1);
        }
        other => panic!("expected InsufficientInventory, got {other:?}"),
    }

    assert_eq!(h.stock(&plenty).await, 10);
    assert_eq!(h.stock(&scarce).await, 1);

    let checkout = h.app.checkouts.get(checkout_id).await.unwrap();
    assert_eq!(checkout.status, CheckoutStatus::Failed);
    // the cart stays open so the customer can adjust it
    assert_eq!(h.app.carts.get(cart.id).await.unwrap().status, CartStatus::Active);
}

#[tokio::test]
async fn test_multi_shop_cart_is_rejected() {
    let h = harness();
    let first = h.product(Uuid::new_v4(), usd(1000), 5).await;
    let second = h.product(Uuid::new_v4(), usd(1000), 5).await;

    let customer_id = Uuid::new_v4();
    let cart = h.app.carts.get_or_create(customer_id).await.unwrap();
    h.app.carts.add_item(cart.id, first.product_id, first.variant_id, 1).await.unwrap();
    h.app.carts.add_item(cart.id, second.product_id, second.variant_id, 1).await.unwrap();
    let checkout_id = h.checkout_cart(customer_id, cart.id).await;

    let err = h.app.placement.place_order(checkout_id).await.unwrap_err();
    assert!(matches!(err, ServiceError::InvalidRequest(_)));

    let checkout = h.app.checkouts.get(checkout_id).await.unwrap();
    assert!(checkout.placement_order_id.is_none());
    assert_eq!(h.stock(&first).await, 5);
    assert_eq!(h.stock(&second).await, 5);
}

#[tokio::test]
async fn test_concurrent_placements_do_not_oversell() {
    let h = harness();
    let product = h.product(Uuid::new_v4(), usd(2000), 5).await;

    let mut checkouts = Vec::new();
    for _ in 0..4 {
        checkouts.push(h.ready_checkout(Uuid::new_v4(), &product, 2).await);
    }

    let results = join_all(checkouts.iter().map(|id| h.app.placement.place_order(*id))).await;

    let placed = results.iter().filter(|r| r.is_ok()).count();
    let short = results
        .iter()
        .filter(|r| matches!(r, Err(ServiceError::InsufficientInventory { .. })))
        .count();
    assert_eq!(placed, 2);
    assert_eq!(short, 2);
    assert_eq!(h.stock(&product).await, 1);

    let mut numbers: Vec<String> = results
        .iter()
        .filter_map(|r| r.as_ref().ok())
        .map(|order| order.order_number.to_string())
        .collect();
    numbers.sort();
    numbers.dedup();
    assert_eq!(numbers.len(), 2);
}

#[tokio::test]
async fn test_restart_rebuilds_lookup_indexes() {
    let h = harness();
    let product = h.product(Uuid::new_v4(), usd(1800), 4).await;
    let customer_id = Uuid::new_v4();
    let checkout_id = h.ready_checkout(customer_id, &product, 1).await;
    let order = h.app.placement.place_order(checkout_id).await.unwrap();

    let open = h.app.carts.get_or_create(customer_id).await.unwrap();
    h.app.rebuild_indexes().await.unwrap();

    assert_eq!(h.app.carts.get_or_create(customer_id).await.unwrap().id, open.id);
    assert_eq!(
        h.app.orders.get_by_number(order.order_number.as_str()).await.unwrap().id,
        order.id
    );
}
