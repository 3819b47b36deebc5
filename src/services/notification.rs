use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use crate::metrics::Metrics;
use crate::utils::{BreakerConfig, BreakerError, CircuitBreaker};

// ============================================================================
// Notification Collaborator
// ============================================================================
//
// Delivery is best-effort: the dispatcher never returns an error to the
// order flow. Failures are logged and counted, and a circuit breaker stops
// calling a notifier that keeps failing.
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationType {
    OrderPlaced,
    OrderConfirmed,
    OrderShipped,
    OrderOutForDelivery,
    OrderDelivered,
    OrderCancelled,
    ReturnRequested,
    ReturnCompleted,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::OrderPlaced => "ORDER_PLACED",
            NotificationType::OrderConfirmed => "ORDER_CONFIRMED",
            NotificationType::OrderShipped => "ORDER_SHIPPED",
            NotificationType::OrderOutForDelivery => "ORDER_OUT_FOR_DELIVERY",
            NotificationType::OrderDelivered => "ORDER_DELIVERED",
            NotificationType::OrderCancelled => "ORDER_CANCELLED",
            NotificationType::ReturnRequested => "RETURN_REQUESTED",
            NotificationType::ReturnCompleted => "RETURN_COMPLETED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderNotification {
    pub customer_id: Uuid,
    pub kind: NotificationType,
    pub title: String,
    pub body: String,
    /// Order id the notification is about
    pub reference_id: Uuid,
}

#[derive(Debug, thiserror::Error)]
#[error("Notification delivery failed: {0}")]
pub struct NotificationError(#[from] pub anyhow::Error);

#[async_trait]
pub trait NotificationService: Send + Sync {
    async fn create_order_notification(&self, notification: OrderNotification) -> Result<(), NotificationError>;
}

/// Writes notifications to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingNotifier;

#[async_trait]
impl NotificationService for LoggingNotifier {
    async fn create_order_notification(&self, notification: OrderNotification) -> Result<(), NotificationError> {
        tracing::info!(
            customer_id = %notification.customer_id,
            kind = notification.kind.as_str(),
            reference_id = %notification.reference_id,
            title = %notification.title,
            "📨 Order notification"
        );
        Ok(())
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

pub struct NotificationDispatcher {
    notifier: Arc<dyn NotificationService>,
    breaker: CircuitBreaker,
    metrics: Arc<Metrics>,
}

impl NotificationDispatcher {
    pub fn new(notifier: Arc<dyn NotificationService>, metrics: Arc<Metrics>) -> Self {
        Self::with_breaker(notifier, BreakerConfig::default(), metrics)
    }

    pub fn with_breaker(
        notifier: Arc<dyn NotificationService>,
        config: BreakerConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            notifier,
            breaker: CircuitBreaker::new(config),
            metrics,
        }
    }

    /// Send and forget. Returns whether the notifier accepted it.
    pub async fn notify(&self, notification: OrderNotification) -> bool {
        let kind = notification.kind;
        let reference_id = notification.reference_id;

        let result = self
            .breaker
            .call(self.notifier.create_order_notification(notification))
            .await;
        self.metrics
            .update_circuit_breaker_state(self.breaker.state().await.as_gauge());

        match result {
            Ok(()) => {
                self.metrics.record_notification("sent");
                true
            }
            Err(BreakerError::Open) => {
                tracing::warn!(
                    kind = kind.as_str(),
                    reference_id = %reference_id,
                    "Notification skipped, circuit open"
                );
                self.metrics.record_notification("short_circuited");
                false
            }
            Err(BreakerError::Failed(e)) => {
                tracing::warn!(
                    kind = kind.as_str(),
                    reference_id = %reference_id,
                    error = %e,
                    "Notification delivery failed"
                );
                self.metrics.record_notification("failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct FailingNotifier {
        calls: AtomicU32,
    }

    #[async_trait]
    impl NotificationService for FailingNotifier {
        async fn create_order_notification(&self, _: OrderNotification) -> Result<(), NotificationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(NotificationError(anyhow::anyhow!("smtp down")))
        }
    }

    fn notification() -> OrderNotification {
        OrderNotification {
            customer_id: Uuid::new_v4(),
            kind: NotificationType::OrderPlaced,
            title: "Order placed".to_string(),
            body: "Thanks".to_string(),
            reference_id: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn test_logging_notifier_delivers() {
        let dispatcher = NotificationDispatcher::new(Arc::new(LoggingNotifier), Arc::new(Metrics::new().unwrap()));
        assert!(dispatcher.notify(notification()).await);
    }

    #[tokio::test]
    async fn test_failures_are_swallowed_and_circuit_opens() {
        let notifier = Arc::new(FailingNotifier { calls: AtomicU32::new(0) });
        let dispatcher = NotificationDispatcher::with_breaker(
            notifier.clone(),
            BreakerConfig {
                failure_threshold: 2,
                cool_down: Duration::from_secs(60),
            },
            Arc::new(Metrics::new().unwrap()),
        );

        for _ in 0..5 {
            assert!(!dispatcher.notify(notification()).await);
        }
        // the breaker stopped calling after two failures
        assert_eq!(notifier.calls.load(Ordering::SeqCst), 2);
    }
}
