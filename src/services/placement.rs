use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::clock::Clock;
use crate::domain::cart::CartError;
use crate::domain::checkout::{CheckoutAggregate, CheckoutStatus, PlacementLine};
use crate::domain::order::{NewOrder, OrderAggregate, OrderItem, OrderItemStatus};
use crate::domain::pricing::CouponSnapshot;
use crate::metrics::Metrics;
use super::cart::CartService;
use super::catalog::Catalog;
use super::checkout::CheckoutService;
use super::error::ServiceError;
use super::inventory::{InventoryService, ReservationOutcome};
use super::notification::{NotificationDispatcher, NotificationType, OrderNotification};
use super::orders::OrderService;
use super::sequence::DocumentNumbers;

// ============================================================================
// Order Placement - Checkout → Order
// ============================================================================
//
// There is no transaction spanning cart, checkout, inventory and order, so
// placement is a sequence of steps that are each safe to run again:
//
//   1. BeginPlacement pins the order id and freezes the cart lines
//   2. stock is reserved per (order, product, variant)
//   3. the order number is claimed per order id
//   4. the order stream is created under the pinned id
//   5. cart CONVERTED, checkout COMPLETED (both idempotent)
//
// A failure anywhere leaves the checkout in placement; calling
// `place_order` again picks up where the last attempt stopped, from the
// frozen lines, whatever happened to the cart in between. A stock
// shortfall is final: reservations are released and the checkout FAILS.
//
// ============================================================================

pub struct OrderPlacementService {
    carts: Arc<CartService>,
    checkouts: Arc<CheckoutService>,
    orders: Arc<OrderService>,
    catalog: Arc<dyn Catalog>,
    inventory: Arc<dyn InventoryService>,
    numbers: Arc<DocumentNumbers>,
    notifications: Arc<NotificationDispatcher>,
    clock: Arc<dyn Clock>,
    metrics: Arc<Metrics>,
}

impl OrderPlacementService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        carts: Arc<CartService>,
        checkouts: Arc<CheckoutService>,
        orders: Arc<OrderService>,
        catalog: Arc<dyn Catalog>,
        inventory: Arc<dyn InventoryService>,
        numbers: Arc<DocumentNumbers>,
        notifications: Arc<NotificationDispatcher>,
        clock: Arc<dyn Clock>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            carts,
            checkouts,
            orders,
            catalog,
            inventory,
            numbers,
            notifications,
            clock,
            metrics,
        }
    }

    /// Turn a ready checkout into an order. Safe to call again with the same
    /// checkout id; a completed checkout returns its order.
    pub async fn place_order(&self, checkout_id: Uuid) -> Result<OrderAggregate, ServiceError> {
        let started = Instant::now();
        let checkout = self.checkouts.get(checkout_id).await?;

        if checkout.status == CheckoutStatus::Completed {
            if let Some(order_id) = checkout.order_id {
                return self.orders.get(order_id).await;
            }
        }

        let checkout = match checkout.placement_order_id {
            Some(_) => checkout,
            None => {
                self.ensure_placeable(&checkout).await?;
                self.checkouts.begin_placement(checkout_id, Uuid::new_v4()).await?
            }
        };
        let Some(order_id) = checkout.placement_order_id else {
            return Err(ServiceError::Internal(anyhow::anyhow!(
                "checkout {checkout_id} has no placement order id"
            )));
        };

        tracing::info!(
            checkout_id = %checkout_id,
            order_id = %order_id,
            cart_id = %checkout.cart_id,
            lines = checkout.placement_lines.len(),
            "Placing order"
        );

        let order = match self.orders.find(order_id).await? {
            Some(order) => order,
            None => match self.create_order(&checkout, order_id).await {
                Ok(order) => order,
                Err(e @ ServiceError::InsufficientInventory { .. }) => {
                    self.checkouts.fail(checkout_id, &e.to_string()).await?;
                    return Err(e);
                }
                Err(e) => return Err(e),
            },
        };

        self.carts.mark_converted(checkout.cart_id, order.id).await?;
        self.checkouts.complete(checkout_id, order.id).await?;

        self.metrics.record_order_placed(started.elapsed().as_secs_f64());
        self.notifications
            .notify(OrderNotification {
                customer_id: order.customer_id,
                kind: NotificationType::OrderPlaced,
                title: "Order placed".to_string(),
                body: format!("Thanks! Your order {} has been received.", order.order_number),
                reference_id: order.id,
            })
            .await;

        Ok(order)
    }

    /// The cart behind `checkout` must be active, non-empty and single-shop
    async fn ensure_placeable(&self, checkout: &CheckoutAggregate) -> Result<(), ServiceError> {
        let cart = self.carts.get(checkout.cart_id).await?;
        if !cart.is_active() {
            return Err(CartError::NotActive(cart.status).into());
        }
        if cart.is_empty() {
            return Err(ServiceError::InvalidRequest(format!("cart {} is empty", cart.id)));
        }
        let shops = cart.shop_ids();
        if shops.len() != 1 {
            return Err(ServiceError::InvalidRequest(format!(
                "cart {} spans {} shops; an order belongs to one shop",
                cart.id,
                shops.len()
            )));
        }
        Ok(())
    }

    async fn create_order(&self, checkout: &CheckoutAggregate, order_id: Uuid) -> Result<OrderAggregate, ServiceError> {
        let lines = &checkout.placement_lines;
        let Some(shop_id) = lines.first().map(|line| line.shop_id) else {
            return Err(ServiceError::InvalidRequest(format!(
                "checkout {} has no lines to place",
                checkout.id
            )));
        };

        // Catalog data is read before anything is reserved
        let mut items = Vec::with_capacity(lines.len());
        for line in lines {
            items.push(self.snapshot(line).await?);
        }

        for line in lines {
            self.reserve(order_id, line).await?;
        }

        let result = self.write_order(checkout, order_id, shop_id, items).await;
        if result.is_err() {
            // Stock stays with the order only once the order exists
            if let Err(e) = self.inventory.release_reservation(order_id).await {
                tracing::error!(order_id = %order_id, error = %e, "Failed to release reservation");
            }
        }
        result
    }

    async fn write_order(
        &self,
        checkout: &CheckoutAggregate,
        order_id: Uuid,
        shop_id: Uuid,
        items: Vec<OrderItem>,
    ) -> Result<OrderAggregate, ServiceError> {
        let order_number = self
            .numbers
            .order_number(self.clock.now().date_naive(), order_id)
            .await?;

        let coupon = checkout.coupon.as_ref().map(|coupon| CouponSnapshot {
            coupon_id: coupon.id,
            code: coupon.code.clone(),
            discount_amount: checkout.coupon_discount,
        });

        let order = NewOrder {
            order_number,
            customer_id: checkout.customer_id,
            shop_id,
            checkout_id: checkout.id,
            cart_id: checkout.cart_id,
            currency: checkout.currency.clone(),
            items,
            pricing: checkout.pricing.clone(),
            coupon,
            shipping_address: checkout.shipping_address.clone(),
            billing_address: checkout
                .billing_address
                .clone()
                .or_else(|| checkout.shipping_address.clone()),
            shipping_method: checkout.shipping_method.clone(),
            delivery_window: checkout.delivery_window.clone(),
            payment_method: checkout.payment_method.clone(),
            notes: checkout.customer_notes.clone(),
        };
        self.orders.place(order_id, order).await
    }

    /// Copy what the order must keep even if the catalog changes later
    async fn snapshot(&self, line: &PlacementLine) -> Result<OrderItem, ServiceError> {
        let product = self.catalog.product(line.product_id, line.variant_id).await?;
        Ok(OrderItem {
            id: Uuid::new_v4(),
            product_id: line.product_id,
            variant_id: line.variant_id,
            product_name: product.name,
            sku: product.sku,
            image_url: product.image_url,
            category: product.category,
            quantity: line.quantity,
            unit_price: line.unit_price,
            cost_price: product.cost_price,
            discount_amount: line.discount_amount,
            tax_amount: Decimal::ZERO,
            total_price: OrderItem::line_total(line.unit_price, line.quantity, line.discount_amount, Decimal::ZERO),
            status: OrderItemStatus::Pending,
            quantity_shipped: 0,
            quantity_returned: 0,
            quantity_refunded: 0,
        })
    }

    async fn reserve(&self, order_id: Uuid, line: &PlacementLine) -> Result<(), ServiceError> {
        let outcome = self
            .inventory
            .reserve_stock_any_warehouse(line.product_id, line.variant_id, line.quantity, order_id)
            .await?;

        match outcome {
            ReservationOutcome::Reserved { warehouse_id } => {
                self.metrics.record_reservation("reserved");
                tracing::debug!(
                    order_id = %order_id,
                    product_id = %line.product_id,
                    warehouse_id = %warehouse_id,
                    quantity = line.quantity,
                    "Line reserved"
                );
                Ok(())
            }
            ReservationOutcome::Insufficient { available } => {
                self.metrics.record_reservation("insufficient");
                let released = self.inventory.release_reservation(order_id).await?;
                tracing::warn!(
                    order_id = %order_id,
                    product_id = %line.product_id,
                    variant_id = %line.variant_id,
                    requested = line.quantity,
                    available = available,
                    released_lines = released,
                    "❌ Insufficient stock, placement aborted"
                );
                Err(ServiceError::InsufficientInventory {
                    product_id: line.product_id,
                    variant_id: line.variant_id,
                    product_name: line.product_name.clone(),
                    requested: line.quantity,
                    available,
                })
            }
        }
    }
}
