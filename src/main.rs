use std::sync::Arc;

use chrono::Duration;
use rust_decimal::Decimal;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

use marketplace_orders::app::{App, Collaborators, Stores};
use marketplace_orders::clock::{Clock, SystemClock};
use marketplace_orders::config::AppConfig;
use marketplace_orders::domain::checkout::{Address, PaymentMethod, ShippingMethod};
use marketplace_orders::domain::order::{ShippingInfo, SYSTEM_ACTOR};
use marketplace_orders::domain::pricing::{Coupon, DiscountKind};
use marketplace_orders::metrics::{self, Metrics};
use marketplace_orders::services::{
    InMemoryCatalog, InMemoryInventory, InventoryService, LoggingNotifier, ProductSnapshot, RecordingPaymentGateway,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default to INFO level, can be overridden with RUST_LOG env var
    // Example: RUST_LOG=debug cargo run
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,marketplace_orders=debug"))
        )
        .init();

    tracing::info!("🚀 Starting marketplace order lifecycle");

    let config = AppConfig::from_env()?;

    // === 1. Prometheus metrics ===
    let metrics = Arc::new(Metrics::new()?);
    tracing::info!("📊 Metrics registry created with {} metrics", metrics.registry().gather().len());

    let metrics_registry = Arc::new(metrics.registry().clone());
    let metrics_port = config.metrics_port;
    std::thread::spawn(move || {
        let result = actix_web::rt::System::new()
            .block_on(metrics::start_metrics_server(metrics_registry, metrics_port));
        if let Err(e) = result {
            tracing::error!("Metrics server error: {}", e);
        }
    });

    // === 2. Event stores and stock ===
    let (stores, inventory) = open_backend(&config).await?;

    // === 3. Collaborators ===
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let catalog = Arc::new(InMemoryCatalog::new());
    let payments = Arc::new(RecordingPaymentGateway::new());
    let collaborators = Collaborators::new(
        catalog.clone(),
        inventory.clone(),
        payments.clone(),
        Arc::new(LoggingNotifier),
    );

    let app = App::build(&config, stores, collaborators, clock.clone(), metrics);
    app.rebuild_indexes().await?;

    // === 4. Demonstrate the lifecycle ===
    let shop_id = Uuid::new_v4();
    let product = ProductSnapshot {
        product_id: Uuid::new_v4(),
        variant_id: Uuid::new_v4(),
        shop_id,
        name: "Ceramic Pour-Over Set".to_string(),
        sku: "CPO-001".to_string(),
        image_url: None,
        category: Some("kitchen".to_string()),
        unit_price: Decimal::new(4500, 2),
        cost_price: Decimal::new(1800, 2),
        discount: None,
    };
    catalog.upsert_product(product.clone()).await;
    inventory
        .increment_inventory(product.product_id, product.variant_id, 25)
        .await?;

    let now = clock.now();
    catalog
        .upsert_coupon(Coupon {
            id: Uuid::new_v4(),
            code: "WELCOME20".to_string(),
            kind: DiscountKind::FixedAmount,
            value: Decimal::from(20),
            minimum_amount: Decimal::from(50),
            starts_at: now - Duration::days(1),
            ends_at: now + Duration::days(30),
            is_active: true,
            shop_ids: vec![shop_id],
        })
        .await;

    if let Err(e) = run_demo(&app, &product).await {
        tracing::error!(error = %e, "Demo lifecycle failed");
    }

    // === 5. Expiration sweep until Ctrl-C ===
    tracing::info!("⏳ Sweeper running, press Ctrl-C to stop");
    let sweeper = app.sweeper.clone();
    let interval = config.sweep_interval;
    sweeper
        .run(interval, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
        })
        .await;

    tracing::info!("🎉 Shutdown complete");
    Ok(())
}

async fn run_demo(app: &App, product: &ProductSnapshot) -> anyhow::Result<()> {
    tracing::info!("📝 Demonstrating cart → checkout → order");

    let customer_id = Uuid::new_v4();
    let cart = app.carts.get_or_create(customer_id).await?;
    app.carts
        .add_item(cart.id, product.product_id, product.variant_id, 2)
        .await?;

    let checkout = app.checkouts.start(cart.id, customer_id).await?;
    let address = Address {
        id: Uuid::new_v4(),
        recipient: "Grace Hopper".to_string(),
        line1: "42 Compiler Lane".to_string(),
        line2: None,
        city: "Arlington".to_string(),
        region: Some("VA".to_string()),
        postal_code: "22201".to_string(),
        country_code: "US".to_string(),
        phone: None,
    };
    app.checkouts.set_shipping_address(checkout.id, address).await?;
    app.checkouts
        .set_shipping_method(
            checkout.id,
            ShippingMethod {
                code: "STD".to_string(),
                name: "Standard".to_string(),
                cost: Decimal::from(10),
            },
        )
        .await?;
    if !app.checkouts.apply_coupon(checkout.id, "WELCOME20").await? {
        tracing::warn!("Coupon WELCOME20 was not accepted");
    }
    app.checkouts
        .set_payment_method(
            checkout.id,
            PaymentMethod {
                id: Uuid::new_v4(),
                kind: "CARD".to_string(),
            },
        )
        .await?;

    let order = app.placement.place_order(checkout.id).await?;
    tracing::info!(
        order_id = %order.id,
        order_number = %order.order_number,
        total = %order.pricing.total,
        "✅ Order placed"
    );

    app.orders.confirm_payment(order.id, "txn-demo-0001", SYSTEM_ACTOR).await?;
    app.orders.start_processing(order.id, "warehouse").await?;
    app.orders
        .ship(
            order.id,
            ShippingInfo {
                carrier: "UPS".to_string(),
                tracking_number: "1Z999AA10123456784".to_string(),
                tracking_url: None,
            },
            "warehouse",
        )
        .await?;
    let order = app.orders.deliver(order.id, "carrier").await?;

    tracing::info!(
        order_number = %order.order_number,
        status = order.status.as_str(),
        transitions = order.status_history.len(),
        "✅ Order delivered"
    );
    Ok(())
}

#[cfg(feature = "scylla")]
async fn open_backend(config: &AppConfig) -> anyhow::Result<(Stores, Arc<dyn InventoryService>)> {
    use marketplace_orders::event_sourcing::ScyllaEventStore;
    use marketplace_orders::services::ScyllaInventory;
    use scylla::client::session::Session;
    use scylla::client::session_builder::SessionBuilder;

    let Some(uri) = config.scylla_uri.as_deref() else {
        tracing::info!("SCYLLA_URI not set, using in-memory stores");
        return Ok((Stores::in_memory(), Arc::new(InMemoryInventory::new())));
    };

    tracing::info!(uri = uri, "Connecting to ScyllaDB...");
    let session: Session = SessionBuilder::new().known_node(uri).build().await?;
    session
        .query_unpaged(
            "CREATE KEYSPACE IF NOT EXISTS marketplace_ks WITH REPLICATION = \
             {'class': 'SimpleStrategy', 'replication_factor': 1}",
            &[],
        )
        .await?;
    session.use_keyspace("marketplace_ks", false).await?;
    ScyllaEventStore::<marketplace_orders::domain::cart::CartEvent>::ensure_schema(&session).await?;
    ScyllaInventory::ensure_schema(&session).await?;

    let session = Arc::new(session);
    let stores = Stores {
        carts: Arc::new(ScyllaEventStore::new(session.clone(), "Cart")),
        checkouts: Arc::new(ScyllaEventStore::new(session.clone(), "Checkout")),
        orders: Arc::new(ScyllaEventStore::new(session.clone(), "Order")),
    };
    Ok((stores, Arc::new(ScyllaInventory::new(session, Uuid::new_v4()))))
}

#[cfg(not(feature = "scylla"))]
async fn open_backend(config: &AppConfig) -> anyhow::Result<(Stores, Arc<dyn InventoryService>)> {
    if config.scylla_uri.is_some() {
        tracing::warn!("SCYLLA_URI is set but the scylla feature is disabled; using in-memory stores");
    }
    Ok((Stores::in_memory(), Arc::new(InMemoryInventory::new())))
}
