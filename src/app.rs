use std::sync::Arc;

use crate::clock::Clock;
use crate::config::AppConfig;
use crate::domain::cart::CartEvent;
use crate::domain::checkout::CheckoutEvent;
use crate::domain::order::OrderEvent;
use crate::domain::pricing::CurrencyCode;
use crate::event_sourcing::{EventStore, InMemoryEventStore};
use crate::metrics::Metrics;
use crate::services::{
    CartService, Catalog, CheckoutService, DocumentNumbers, ExpirationSweeper, InMemorySequence, InventoryService,
    NotificationDispatcher, NotificationService, OrderPlacementService, OrderService, PaymentGateway, ServiceError,
    SequenceGenerator,
};

/// Event streams, one per aggregate type
pub struct Stores {
    pub carts: Arc<dyn EventStore<CartEvent>>,
    pub checkouts: Arc<dyn EventStore<CheckoutEvent>>,
    pub orders: Arc<dyn EventStore<OrderEvent>>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            carts: Arc::new(InMemoryEventStore::new("cart_events")),
            checkouts: Arc::new(InMemoryEventStore::new("checkout_events")),
            orders: Arc::new(InMemoryEventStore::new("order_events")),
        }
    }
}

/// Outside systems the lifecycle talks to
pub struct Collaborators {
    pub catalog: Arc<dyn Catalog>,
    pub inventory: Arc<dyn InventoryService>,
    pub payments: Arc<dyn PaymentGateway>,
    pub notifier: Arc<dyn NotificationService>,
    pub sequence: Arc<dyn SequenceGenerator>,
}

impl Collaborators {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        inventory: Arc<dyn InventoryService>,
        payments: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn NotificationService>,
    ) -> Self {
        Self {
            catalog,
            inventory,
            payments,
            notifier,
            sequence: Arc::new(InMemorySequence::new()),
        }
    }
}

/// Fully wired order lifecycle
pub struct App {
    pub carts: Arc<CartService>,
    pub checkouts: Arc<CheckoutService>,
    pub orders: Arc<OrderService>,
    pub placement: Arc<OrderPlacementService>,
    pub sweeper: Arc<ExpirationSweeper>,
    pub metrics: Arc<Metrics>,
}

impl App {
    pub fn build(
        config: &AppConfig,
        stores: Stores,
        collaborators: Collaborators,
        clock: Arc<dyn Clock>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let currency = CurrencyCode::new(config.default_currency.as_str());
        let numbers = Arc::new(DocumentNumbers::new(collaborators.sequence.clone(), metrics.clone()));
        let notifications = Arc::new(NotificationDispatcher::new(collaborators.notifier.clone(), metrics.clone()));

        let carts = Arc::new(CartService::new(
            stores.carts,
            collaborators.catalog.clone(),
            clock.clone(),
            config.policy.clone(),
            currency,
            metrics.clone(),
        ));
        let checkouts = Arc::new(CheckoutService::new(
            stores.checkouts,
            carts.clone(),
            collaborators.catalog.clone(),
            clock.clone(),
            config.policy.clone(),
            metrics.clone(),
        ));
        let orders = Arc::new(OrderService::new(
            stores.orders,
            collaborators.inventory.clone(),
            collaborators.payments.clone(),
            notifications.clone(),
            numbers.clone(),
            clock.clone(),
            metrics.clone(),
        ));
        let placement = Arc::new(OrderPlacementService::new(
            carts.clone(),
            checkouts.clone(),
            orders.clone(),
            collaborators.catalog.clone(),
            collaborators.inventory.clone(),
            numbers,
            notifications,
            clock.clone(),
            metrics.clone(),
        ));
        let sweeper = Arc::new(ExpirationSweeper::new(
            carts.clone(),
            checkouts.clone(),
            clock,
            config.policy.clone(),
            metrics.clone(),
        ));

        Self {
            carts,
            checkouts,
            orders,
            placement,
            sweeper,
            metrics,
        }
    }

    /// Rebuild every lookup projection from the event streams
    pub async fn rebuild_indexes(&self) -> Result<(), ServiceError> {
        let carts = self.carts.rebuild_index().await?;
        let checkouts = self.checkouts.rebuild_index().await?;
        let orders = self.orders.rebuild_number_index().await?;
        tracing::info!(
            active_carts = carts,
            open_checkouts = checkouts,
            orders = orders,
            "Projections rebuilt"
        );
        Ok(())
    }
}
