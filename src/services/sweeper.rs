use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};

use crate::clock::Clock;
use crate::config::LifecyclePolicy;
use crate::domain::cart::AbandonReason;
use crate::metrics::Metrics;
use super::cart::CartService;
use super::checkout::CheckoutService;
use super::error::ServiceError;

// ============================================================================
// Expiration Sweep
// ============================================================================
//
// TTLs are stored timestamps, never timers. The sweep walks the open
// checkout sessions and carts and closes the ones whose time has passed.
// Sessions go first: a cart behind a session that is still open is left
// alone, since the shopper is working on it. One bad aggregate is logged
// and skipped so it cannot stall the rest.
//
// ============================================================================

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Past `expires_at`
    pub carts_expired: u64,
    /// Idle longer than the abandonment window
    pub carts_abandoned: u64,
    pub checkouts_expired: u64,
    pub failures: u64,
}

pub struct ExpirationSweeper {
    carts: Arc<CartService>,
    checkouts: Arc<CheckoutService>,
    clock: Arc<dyn Clock>,
    policy: LifecyclePolicy,
    metrics: Arc<Metrics>,
}

impl ExpirationSweeper {
    pub fn new(
        carts: Arc<CartService>,
        checkouts: Arc<CheckoutService>,
        clock: Arc<dyn Clock>,
        policy: LifecyclePolicy,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            carts,
            checkouts,
            clock,
            policy,
            metrics,
        }
    }

    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<SweepReport, ServiceError> {
        let mut report = SweepReport::default();

        let mut in_checkout = HashSet::new();
        for checkout in self.checkouts.open_sessions().await? {
            // Placement owns a session once it has begun
            if !checkout.needs_expiry(now) || checkout.placement_order_id.is_some() {
                in_checkout.insert(checkout.cart_id);
                continue;
            }
            match self.checkouts.expire(checkout.id).await {
                Ok(_) => report.checkouts_expired += 1,
                Err(e) => {
                    report.failures += 1;
                    in_checkout.insert(checkout.cart_id);
                    tracing::warn!(checkout_id = %checkout.id, error = %e, "Sweep could not expire checkout");
                }
            }
        }

        for cart in self.carts.active_carts().await? {
            if in_checkout.contains(&cart.id) {
                continue;
            }
            let reason = if cart.is_expired(now) {
                AbandonReason::Expired
            } else if cart.is_abandonment_candidate(now, self.policy.cart_abandon_after) {
                AbandonReason::Inactive
            } else {
                continue;
            };

            match self.carts.mark_abandoned(cart.id, reason).await {
                Ok(_) if reason == AbandonReason::Expired => report.carts_expired += 1,
                Ok(_) => report.carts_abandoned += 1,
                Err(e) => {
                    report.failures += 1;
                    tracing::warn!(cart_id = %cart.id, error = %e, "Sweep could not close cart");
                }
            }
        }

        self.metrics.record_sweep(
            report.carts_expired + report.carts_abandoned,
            report.checkouts_expired,
        );
        if report != SweepReport::default() {
            tracing::info!(
                carts_expired = report.carts_expired,
                carts_abandoned = report.carts_abandoned,
                checkouts_expired = report.checkouts_expired,
                failures = report.failures,
                "🧹 Expiration sweep finished"
            );
        }
        Ok(report)
    }

    /// Sweep every `interval` until `shutdown` resolves
    pub async fn run(&self, interval: StdDuration, shutdown: impl Future<Output = ()>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        tracing::info!(interval_secs = interval.as_secs(), "Expiration sweeper started");
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Expiration sweeper stopped");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once(self.clock.now()).await {
                        tracing::error!(error = %e, "Expiration sweep failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::domain::cart::{CartEvent, CartStatus};
    use crate::domain::checkout::CheckoutStatus;
    use crate::domain::pricing::CurrencyCode;
    use crate::event_sourcing::InMemoryEventStore;
    use crate::services::catalog::{InMemoryCatalog, ProductSnapshot};
    use chrono::{Duration, TimeZone};
    use rust_decimal::Decimal;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_sweep_closes_stale_carts_and_sessions() {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 10, 1, 8, 0, 0).unwrap()));
        let catalog = Arc::new(InMemoryCatalog::new());
        let metrics = Arc::new(Metrics::new().unwrap());
        let policy = LifecyclePolicy::default();
        let carts = Arc::new(CartService::new(
            Arc::new(InMemoryEventStore::<CartEvent>::new("carts")),
            catalog.clone(),
            clock.clone(),
            policy.clone(),
            CurrencyCode::default(),
            metrics.clone(),
        ));
        let checkouts = Arc::new(CheckoutService::new(
            Arc::new(InMemoryEventStore::new("checkouts")),
            carts.clone(),
            catalog.clone(),
            clock.clone(),
            policy.clone(),
            metrics.clone(),
        ));
        let sweeper = ExpirationSweeper::new(carts.clone(), checkouts.clone(), clock.clone(), policy, metrics);

        let product = ProductSnapshot {
            product_id: Uuid::new_v4(),
            variant_id: Uuid::new_v4(),
            shop_id: Uuid::new_v4(),
            name: "Plant".to_string(),
            sku: "PLT-1".to_string(),
            image_url: None,
            category: None,
            unit_price: Decimal::from(12),
            cost_price: Decimal::from(4),
            discount: None,
        };
        catalog.upsert_product(product.clone()).await;

        let customer = Uuid::new_v4();
        let idle = carts.get_or_create(customer).await.unwrap();
        carts.add_item(idle.id, product.product_id, product.variant_id, 1).await.unwrap();
        let checkout = checkouts.start(idle.id, customer).await.unwrap();

        // Nothing is due yet
        let report = sweeper.sweep_once(clock.now()).await.unwrap();
        assert_eq!(report, SweepReport::default());

        clock.advance(Duration::hours(2));
        let busy = carts.get_or_create_guest("sess-busy").await.unwrap();
        let report = sweeper.sweep_once(clock.now()).await.unwrap();
        assert_eq!(report.checkouts_expired, 1);
        assert_eq!(report.carts_abandoned, 0);

        clock.advance(Duration::hours(23));
        let report = sweeper.sweep_once(clock.now()).await.unwrap();
        assert_eq!(report.carts_abandoned, 1);

        assert_eq!(carts.get(idle.id).await.unwrap().status, CartStatus::Abandoned);
        assert_eq!(carts.get(busy.id).await.unwrap().status, CartStatus::Active);
        assert_eq!(
            checkouts.get(checkout.id).await.unwrap().status,
            CheckoutStatus::Abandoned
        );
    }

    #[tokio::test]
    async fn test_cart_behind_open_checkout_survives_idle_window() {
        use crate::app::{App, Collaborators, Stores};
        use crate::config::AppConfig;
        use crate::domain::checkout::{Address, PaymentMethod};
        use crate::services::inventory::{InMemoryInventory, InventoryService};
        use crate::services::notification::LoggingNotifier;
        use crate::services::payment::RecordingPaymentGateway;

        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 10, 2, 9, 0, 0).unwrap()));
        let catalog = Arc::new(InMemoryCatalog::new());
        let inventory = Arc::new(InMemoryInventory::new());
        let app = App::build(
            &AppConfig::default(),
            Stores::in_memory(),
            Collaborators::new(
                catalog.clone(),
                inventory.clone(),
                Arc::new(RecordingPaymentGateway::new()),
                Arc::new(LoggingNotifier),
            ),
            clock.clone(),
            Arc::new(Metrics::new().unwrap()),
        );

        let product = ProductSnapshot {
            product_id: Uuid::new_v4(),
            variant_id: Uuid::new_v4(),
            shop_id: Uuid::new_v4(),
            name: "Lantern".to_string(),
            sku: "LTN-1".to_string(),
            image_url: None,
            category: None,
            unit_price: Decimal::from(25),
            cost_price: Decimal::from(9),
            discount: None,
        };
        catalog.upsert_product(product.clone()).await;
        inventory.increment_inventory(product.product_id, product.variant_id, 5).await.unwrap();

        // Last cart edit at t0
        let customer = Uuid::new_v4();
        let cart = app.carts.get_or_create(customer).await.unwrap();
        app.carts.add_item(cart.id, product.product_id, product.variant_id, 1).await.unwrap();

        // Checkout made ready shortly before the idle window closes
        clock.advance(Duration::hours(23) + Duration::minutes(50));
        let checkout = app.checkouts.start(cart.id, customer).await.unwrap();
        app.checkouts
            .set_shipping_address(
                checkout.id,
                Address {
                    id: Uuid::new_v4(),
                    recipient: "Hedy Lamarr".to_string(),
                    line1: "7 Frequency Ave".to_string(),
                    line2: None,
                    city: "Vienna".to_string(),
                    region: None,
                    postal_code: "1010".to_string(),
                    country_code: "AT".to_string(),
                    phone: None,
                },
            )
            .await
            .unwrap();
        app.checkouts
            .set_payment_method(checkout.id, PaymentMethod { id: Uuid::new_v4(), kind: "CARD".to_string() })
            .await
            .unwrap();

        clock.advance(Duration::minutes(15));
        let report = app.sweeper.sweep_once(clock.now()).await.unwrap();
        assert_eq!(report.carts_abandoned, 0);
        assert_eq!(report.checkouts_expired, 0);
        assert_eq!(app.carts.get(cart.id).await.unwrap().status, CartStatus::Active);

        let order = app.placement.place_order(checkout.id).await.unwrap();
        assert_eq!(app.carts.get(cart.id).await.unwrap().status, CartStatus::Converted);
        assert_eq!(app.checkouts.get(checkout.id).await.unwrap().order_id, Some(order.id));

        // Once the session has expired the idle cart is fair game again
        let stale = app.carts.get_or_create(Uuid::new_v4()).await.unwrap();
        app.carts.add_item(stale.id, product.product_id, product.variant_id, 1).await.unwrap();
        let customer = app.carts.get(stale.id).await.unwrap().owner.customer_id().unwrap();
        let abandoned = app.checkouts.start(stale.id, customer).await.unwrap();
        clock.advance(Duration::hours(25));
        let report = app.sweeper.sweep_once(clock.now()).await.unwrap();
        assert_eq!(report.checkouts_expired, 1);
        assert_eq!(report.carts_abandoned, 1);
        assert_eq!(app.checkouts.get(abandoned.id).await.unwrap().status, CheckoutStatus::Abandoned);
    }
}
