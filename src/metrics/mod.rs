// Private module declaration
mod server;

use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec,
    IntGauge, Opts, Registry,
};

// Re-export for public API
pub use server::start_metrics_server;

// ============================================================================
// Metrics Module - Prometheus metrics for observability
// ============================================================================
//
// Provides metrics for:
// - Cart, checkout and order lifecycle outcomes
// - Order status transitions
// - Inventory reservations and shortfalls
// - Refund requests and notification delivery
// - Retry attempts and circuit breaker state
// - Expiration sweeps
//
// All metrics are registered with Prometheus and can be scraped via /metrics
// ============================================================================

/// Central metrics registry for the entire application
pub struct Metrics {
    registry: Registry,

    // Cart Metrics
    pub carts_opened: IntCounterVec,
    pub carts_closed: IntCounterVec,

    // Checkout Metrics
    pub checkouts: IntCounterVec,

    // Order Metrics
    pub orders_placed: IntCounter,
    pub order_transitions: IntCounterVec,
    pub operation_duration: HistogramVec,

    // Inventory Metrics
    pub inventory_reservations: IntCounterVec,

    // Side Effects
    pub refunds_requested: IntCounterVec,
    pub notifications: IntCounterVec,

    // Retry Metrics
    pub retry_attempts_total: IntCounterVec,
    pub retry_success: IntCounterVec,
    pub retry_failure: IntCounterVec,

    // Circuit Breaker Metrics
    pub circuit_breaker_state: IntGauge,

    // Sweep Metrics
    pub sweep_runs: IntCounter,
    pub sweep_closed: IntCounterVec,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        // Cart Metrics
        let carts_opened = IntCounterVec::new(
            Opts::new("carts_opened_total", "Carts opened"),
            &["owner"],
        )?;
        registry.register(Box::new(carts_opened.clone()))?;

        let carts_closed = IntCounterVec::new(
            Opts::new("carts_closed_total", "Carts that left the ACTIVE state"),
            &["outcome"],
        )?;
        registry.register(Box::new(carts_closed.clone()))?;

        // Checkout Metrics
        let checkouts = IntCounterVec::new(
            Opts::new("checkout_sessions_total", "Checkout session lifecycle events"),
            &["outcome"],
        )?;
        registry.register(Box::new(checkouts.clone()))?;

        // Order Metrics
        let orders_placed = IntCounter::new("orders_placed_total", "Orders created from a checkout")?;
        registry.register(Box::new(orders_placed.clone()))?;

        let order_transitions = IntCounterVec::new(
            Opts::new("order_transitions_total", "Order status transitions"),
            &["from_status", "to_status"],
        )?;
        registry.register(Box::new(order_transitions.clone()))?;

        let operation_duration = HistogramVec::new(
            HistogramOpts::new("operation_duration_seconds", "Service operation duration")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["operation"],
        )?;
        registry.register(Box::new(operation_duration.clone()))?;

        // Inventory Metrics
        let inventory_reservations = IntCounterVec::new(
            Opts::new("inventory_reservations_total", "Stock reservation outcomes"),
            &["outcome"],
        )?;
        registry.register(Box::new(inventory_reservations.clone()))?;

        // Side Effects
        let refunds_requested = IntCounterVec::new(
            Opts::new("refund_requests_total", "Refund requests issued to the payment gateway"),
            &["reason"],
        )?;
        registry.register(Box::new(refunds_requested.clone()))?;

        let notifications = IntCounterVec::new(
            Opts::new("notifications_total", "Order notification delivery outcomes"),
            &["outcome"],
        )?;
        registry.register(Box::new(notifications.clone()))?;

        // Retry Metrics
        let retry_attempts_total = IntCounterVec::new(
            Opts::new("retry_attempts_total", "Total retry attempts"),
            &["operation", "attempt"],
        )?;
        registry.register(Box::new(retry_attempts_total.clone()))?;

        let retry_success = IntCounterVec::new(
            Opts::new("retry_success_total", "Total successful retries"),
            &["operation"],
        )?;
        registry.register(Box::new(retry_success.clone()))?;

        let retry_failure = IntCounterVec::new(
            Opts::new("retry_failure_total", "Total failed retries after all attempts"),
            &["operation"],
        )?;
        registry.register(Box::new(retry_failure.clone()))?;

        // Circuit Breaker Metrics
        let circuit_breaker_state = IntGauge::new(
            "circuit_breaker_state",
            "Notification circuit breaker state (0=Closed, 1=Open, 2=HalfOpen)",
        )?;
        registry.register(Box::new(circuit_breaker_state.clone()))?;

        // Sweep Metrics
        let sweep_runs = IntCounter::new("expiration_sweeps_total", "Expiration sweep runs")?;
        registry.register(Box::new(sweep_runs.clone()))?;

        let sweep_closed = IntCounterVec::new(
            Opts::new("expiration_sweep_closed_total", "Carts and sessions closed by the sweep"),
            &["kind"],
        )?;
        registry.register(Box::new(sweep_closed.clone()))?;

        Ok(Self {
            registry,
            carts_opened,
            carts_closed,
            checkouts,
            orders_placed,
            order_transitions,
            operation_duration,
            inventory_reservations,
            refunds_requested,
            notifications,
            retry_attempts_total,
            retry_success,
            retry_failure,
            circuit_breaker_state,
            sweep_runs,
            sweep_closed,
        })
    }

    /// Get the Prometheus registry for exposing metrics via HTTP
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_cart_opened(&self, owner_kind: &str) {
        self.carts_opened.with_label_values(&[owner_kind]).inc();
    }

    pub fn record_cart_closed(&self, outcome: &str) {
        self.carts_closed.with_label_values(&[outcome]).inc();
    }

    pub fn record_checkout(&self, outcome: &str) {
        self.checkouts.with_label_values(&[outcome]).inc();
    }

    /// Helper to record an order placement and how long it took
    pub fn record_order_placed(&self, duration_secs: f64) {
        self.orders_placed.inc();
        self.operation_duration.with_label_values(&["place_order"]).observe(duration_secs);
    }

    pub fn record_order_transition(&self, from_status: &str, to_status: &str) {
        self.order_transitions.with_label_values(&[from_status, to_status]).inc();
    }

    pub fn record_reservation(&self, outcome: &str) {
        self.inventory_reservations.with_label_values(&[outcome]).inc();
    }

    pub fn record_refund_requested(&self, reason: &str) {
        self.refunds_requested.with_label_values(&[reason]).inc();
    }

    pub fn record_notification(&self, outcome: &str) {
        self.notifications.with_label_values(&[outcome]).inc();
    }

    /// Helper to record retry attempt
    pub fn record_retry_attempt(&self, operation: &str, attempt: u32) {
        self.retry_attempts_total.with_label_values(&[operation, &attempt.to_string()]).inc();
    }

    /// Helper to record retry outcome
    pub fn record_retry_outcome(&self, operation: &str, success: bool) {
        if success {
            self.retry_success.with_label_values(&[operation]).inc();
        } else {
            self.retry_failure.with_label_values(&[operation]).inc();
        }
    }

    /// Helper to update circuit breaker state
    pub fn update_circuit_breaker_state(&self, state: i64) {
        self.circuit_breaker_state.set(state);
    }

    pub fn record_sweep(&self, closed_carts: u64, closed_checkouts: u64) {
        self.sweep_runs.inc();
        self.sweep_closed.with_label_values(&["cart"]).inc_by(closed_carts);
        self.sweep_closed.with_label_values(&["checkout"]).inc_by(closed_checkouts);
    }
}
