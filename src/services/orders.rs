use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

use crate::clock::Clock;
use crate::domain::checkout::Address;
use crate::domain::order::{
    InspectionResolution, NewOrder, OrderAggregate, OrderCommand, OrderError, OrderEvent, OrderNumber, OrderStatus,
    ReturnInspection, ReturnLine, RmaNumber, ShippingInfo,
};
use crate::event_sourcing::{Aggregate, CommandContext, CommandHandler, EventStore, HandlerError};
use crate::metrics::Metrics;
use super::error::ServiceError;
use super::inventory::{InventoryService, ReservationOutcome};
use super::notification::{NotificationDispatcher, NotificationType, OrderNotification};
use super::payment::{PaymentGateway, RefundReason, RefundRequest, RequesterType};
use super::sequence::DocumentNumbers;

// ============================================================================
// Order Service - post-purchase lifecycle
// ============================================================================
//
// Side effects with outside systems happen before the event is appended:
//   1. refund request (idempotency key per order and purpose)
//   2. stock restore
//   3. append the status change
// A failed append takes the restored stock again; the refund request is
// deduplicated by the gateway when the caller retries.
//
// The stock reserved at placement stays with the order until it is either
// cancelled (the reservation is released to its warehouses) or picked for
// processing (the reservation is committed).
//
// ============================================================================

/// One stock movement made while closing a return
#[derive(Debug, Clone, Copy)]
struct Restock {
    product_id: Uuid,
    variant_id: Uuid,
    quantity: u32,
}

pub struct OrderService {
    handler: CommandHandler<OrderAggregate>,
    inventory: Arc<dyn InventoryService>,
    payments: Arc<dyn PaymentGateway>,
    notifications: Arc<NotificationDispatcher>,
    numbers: Arc<DocumentNumbers>,
    clock: Arc<dyn Clock>,
    metrics: Arc<Metrics>,
}

impl OrderService {
    pub fn new(
        event_store: Arc<dyn EventStore<OrderEvent>>,
        inventory: Arc<dyn InventoryService>,
        payments: Arc<dyn PaymentGateway>,
        notifications: Arc<NotificationDispatcher>,
        numbers: Arc<DocumentNumbers>,
        clock: Arc<dyn Clock>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            handler: CommandHandler::new(event_store),
            inventory,
            payments,
            notifications,
            numbers,
            clock,
            metrics,
        }
    }

    fn ctx(&self) -> CommandContext {
        CommandContext::new(self.clock.now())
    }

    pub async fn get(&self, order_id: Uuid) -> Result<OrderAggregate, ServiceError> {
        Ok(self.handler.load(order_id).await?)
    }

    /// `None` when no order has been written under `order_id` yet
    pub async fn find(&self, order_id: Uuid) -> Result<Option<OrderAggregate>, ServiceError> {
        match self.handler.load(order_id).await {
            Ok(order) => Ok(Some(order)),
            Err(HandlerError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_by_number(&self, order_number: &str) -> Result<OrderAggregate, ServiceError> {
        let order_id = self
            .numbers
            .owner_of(order_number)
            .await
            .ok_or_else(|| ServiceError::not_found("Order", order_number))?;
        self.get(order_id).await
    }

    /// Write the order stream. Placing the same id twice returns the stored order.
    pub async fn place(&self, order_id: Uuid, order: NewOrder) -> Result<OrderAggregate, ServiceError> {
        let command = OrderCommand::Place(Box::new(order));
        match self.handler.create(order_id, &command, self.ctx()).await {
            Ok(order) => {
                self.metrics.record_order_transition("NEW", OrderStatus::Pending.as_str());
                tracing::info!(
                    order_id = %order_id,
                    order_number = %order.order_number,
                    customer_id = %order.customer_id,
                    total = %order.pricing.total,
                    items = order.items.len(),
                    "📦 Order placed"
                );
                Ok(order)
            }
            Err(HandlerError::AlreadyExists { .. }) => {
                tracing::debug!(order_id = %order_id, "Order already written, reusing it");
                self.get(order_id).await
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn rebuild_number_index(&self) -> Result<usize, ServiceError> {
        let ids = self.handler.event_store().aggregate_ids().await?;
        for order_id in &ids {
            let order = self.get(*order_id).await?;
            self.numbers
                .register(OrderNumber::PREFIX, order.order_number.as_str(), order.id)
                .await;
            if let Some(request) = &order.return_request {
                self.numbers
                    .register(RmaNumber::PREFIX, request.rma_number.as_str(), order.id)
                    .await;
            }
        }
        Ok(ids.len())
    }

    /// Run a status command and record what changed
    async fn transition(
        &self,
        order_id: Uuid,
        command: OrderCommand,
        notify: Option<(NotificationType, &str)>,
    ) -> Result<OrderAggregate, ServiceError> {
        let before = self.get(order_id).await?.status;
        let order = self.handler.handle(order_id, &command, self.ctx()).await?;

        if order.status != before {
            self.metrics
                .record_order_transition(before.as_str(), order.status.as_str());
            tracing::info!(
                order_id = %order_id,
                order_number = %order.order_number,
                from = before.as_str(),
                to = order.status.as_str(),
                "Order status changed"
            );
            if let Some((kind, title)) = notify {
                self.notify(&order, kind, title).await;
            }
        }
        Ok(order)
    }

    async fn notify(&self, order: &OrderAggregate, kind: NotificationType, title: &str) {
        let body = format!("Order {} is now {}", order.order_number, order.status);
        self.notifications
            .notify(OrderNotification {
                customer_id: order.customer_id,
                kind,
                title: title.to_string(),
                body,
                reference_id: order.id,
            })
            .await;
    }

    pub async fn confirm_payment(&self, order_id: Uuid, transaction_id: &str, actor: &str) -> Result<OrderAggregate, ServiceError> {
        self.transition(
            order_id,
            OrderCommand::ConfirmPayment {
                transaction_id: transaction_id.to_string(),
                changed_by: actor.to_string(),
            },
            Some((NotificationType::OrderConfirmed, "Payment received")),
        )
        .await
    }

    pub async fn start_processing(&self, order_id: Uuid, actor: &str) -> Result<OrderAggregate, ServiceError> {
        let order = self
            .transition(order_id, OrderCommand::StartProcessing { changed_by: actor.to_string() }, None)
            .await?;
        // The order can no longer be cancelled, so its units are gone for good
        if let Err(e) = self.inventory.commit_reservation(order_id).await {
            tracing::warn!(order_id = %order_id, error = %e, "Failed to commit reservation");
        }
        Ok(order)
    }

    pub async fn ship(&self, order_id: Uuid, shipping: ShippingInfo, actor: &str) -> Result<OrderAggregate, ServiceError> {
        self.transition(
            order_id,
            OrderCommand::Ship {
                shipping,
                changed_by: actor.to_string(),
            },
            Some((NotificationType::OrderShipped, "Your order has shipped")),
        )
        .await
    }

    pub async fn mark_out_for_delivery(&self, order_id: Uuid, actor: &str) -> Result<OrderAggregate, ServiceError> {
        self.transition(
            order_id,
            OrderCommand::MarkOutForDelivery { changed_by: actor.to_string() },
            Some((NotificationType::OrderOutForDelivery, "Out for delivery")),
        )
        .await
    }

    pub async fn deliver(&self, order_id: Uuid, actor: &str) -> Result<OrderAggregate, ServiceError> {
        self.transition(
            order_id,
            OrderCommand::Deliver { changed_by: actor.to_string() },
            Some((NotificationType::OrderDelivered, "Delivered")),
        )
        .await
    }

    /// Cancel a PENDING or CONFIRMED order: refund if paid, put the stock back,
    /// then record CANCELLED. Cancelling a cancelled order returns it unchanged.
    pub async fn cancel(&self, order_id: Uuid, reason: &str, actor: &str) -> Result<OrderAggregate, ServiceError> {
        let order = self.get(order_id).await?;
        if order.status == OrderStatus::Cancelled {
            return Ok(order);
        }
        if !order.can_be_cancelled() {
            return Err(OrderError::NotCancellable(order.status).into());
        }

        if order.is_paid() {
            self.request_refund(RefundRequest {
                idempotency_key: format!("cancel:{order_id}"),
                order_id,
                amount: order.pricing.total,
                currency: order.currency.clone(),
                reason: RefundReason::Other,
                note: Some(reason.to_string()),
                requester_id: None,
                requester_type: RequesterType::Admin,
            })
            .await?;
        }

        let released = self.inventory.release_reservation(order_id).await?;

        let command = OrderCommand::Cancel {
            reason: reason.to_string(),
            changed_by: actor.to_string(),
        };
        match self
            .transition(order_id, command, Some((NotificationType::OrderCancelled, "Order cancelled")))
            .await
        {
            Ok(order) => {
                tracing::info!(order_id = %order_id, released_lines = released, "Order stock released");
                Ok(order)
            }
            Err(e) => {
                if released > 0 {
                    self.rereserve(&order).await;
                }
                Err(e)
            }
        }
    }

    /// Open a return on a delivered order within the return window
    pub async fn request_return(
        &self,
        order_id: Uuid,
        reason: &str,
        lines: Vec<ReturnLine>,
        requested_by: &str,
    ) -> Result<OrderAggregate, ServiceError> {
        let order = self.get(order_id).await?;
        let now = self.clock.now();
        let request = |rma_number: RmaNumber| OrderCommand::RequestReturn {
            rma_number,
            reason: reason.to_string(),
            lines: lines.clone(),
            requested_by: requested_by.to_string(),
        };

        // Validate against a throwaway number before spending a real one
        order
            .handle_command(&request(RmaNumber::new(now.date_naive(), 0)), now)
            .map_err(ServiceError::from)?;

        let command = request(self.numbers.rma_number(now.date_naive(), order_id).await?);
        let order = self
            .transition(order_id, command, Some((NotificationType::ReturnRequested, "Return requested")))
            .await?;
        if let Some(request) = &order.return_request {
            tracing::info!(order_id = %order_id, rma_number = %request.rma_number, "↩️ Return requested");
        }
        Ok(order)
    }

    pub async fn start_return(&self, order_id: Uuid, actor: &str) -> Result<OrderAggregate, ServiceError> {
        self.transition(order_id, OrderCommand::StartReturn { changed_by: actor.to_string() }, None)
            .await
    }

    /// Close a return from its inspections: refund the REFUND lines and put
    /// restockable accepted units back on the shelf.
    pub async fn complete_return(
        &self,
        order_id: Uuid,
        inspections: Vec<ReturnInspection>,
        actor: &str,
    ) -> Result<OrderAggregate, ServiceError> {
        let order = self.get(order_id).await?;
        let lines: Vec<Restock> = inspections
            .iter()
            .filter(|i| i.restockable && i.is_accepted())
            .filter_map(|i| {
                order.item(i.item_id).map(|item| Restock {
                    product_id: item.product_id,
                    variant_id: item.variant_id,
                    quantity: i.quantity,
                })
            })
            .collect();
        let command = OrderCommand::CompleteReturn {
            inspections,
            changed_by: actor.to_string(),
        };

        // Decide first to learn the refund before anything is written
        let decided = order.handle_command(&command, self.clock.now()).map_err(ServiceError::from)?;
        let refund_amount = decided
            .iter()
            .find_map(|event| match event {
                OrderEvent::ReturnCompleted(e) => Some(e.refund_amount),
                _ => None,
            })
            .unwrap_or(Decimal::ZERO);

        if refund_amount > Decimal::ZERO {
            let rma = order
                .return_request
                .as_ref()
                .map(|r| r.rma_number.to_string())
                .unwrap_or_else(|| order_id.to_string());
            self.request_refund(RefundRequest {
                idempotency_key: format!("return:{rma}"),
                order_id,
                amount: refund_amount,
                currency: order.currency.clone(),
                reason: RefundReason::Return,
                note: Some(format!("Return {rma}")),
                requester_id: None,
                requester_type: RequesterType::System,
            })
            .await?;
        }

        let restored = self.restock(order_id, &lines).await?;

        match self
            .transition(order_id, command, Some((NotificationType::ReturnCompleted, "Return processed")))
            .await
        {
            Ok(order) => {
                let refunded_lines = order
                    .inspections
                    .iter()
                    .filter(|i| i.resolution == InspectionResolution::Refund)
                    .count();
                tracing::info!(
                    order_id = %order_id,
                    status = order.status.as_str(),
                    refund_amount = %refund_amount,
                    refunded_lines = refunded_lines,
                    restocked_lines = restored.len(),
                    "Return completed"
                );
                Ok(order)
            }
            Err(e) => {
                self.unrestock(order_id, &restored).await;
                Err(e)
            }
        }
    }

    pub async fn update_shipping_address(&self, order_id: Uuid, address: Address) -> Result<OrderAggregate, ServiceError> {
        let order = self
            .handler
            .handle(order_id, &OrderCommand::UpdateShippingAddress { address }, self.ctx())
            .await?;
        tracing::info!(order_id = %order_id, "Order shipping address updated");
        Ok(order)
    }

    pub async fn update_notes(&self, order_id: Uuid, notes: Option<String>) -> Result<OrderAggregate, ServiceError> {
        Ok(self
            .handler
            .handle(order_id, &OrderCommand::UpdateNotes { notes }, self.ctx())
            .await?)
    }

    async fn request_refund(&self, request: RefundRequest) -> Result<(), ServiceError> {
        let reason = request.reason;
        let order_id = request.order_id;
        let amount = request.amount;

        let receipt = self.payments.create_refund_request(request).await?;
        if !receipt.duplicate {
            self.metrics.record_refund_requested(reason.as_str());
        }
        tracing::info!(
            order_id = %order_id,
            refund_id = %receipt.refund_id,
            amount = %amount,
            reason = reason.as_str(),
            duplicate = receipt.duplicate,
            "💸 Refund requested"
        );
        Ok(())
    }

    /// Put stock back line by line; on failure the lines already restored are taken out again
    async fn restock(&self, order_id: Uuid, lines: &[Restock]) -> Result<Vec<Restock>, ServiceError> {
        let mut restored = Vec::with_capacity(lines.len());
        for line in lines {
            if let Err(e) = self
                .inventory
                .increment_inventory(line.product_id, line.variant_id, line.quantity)
                .await
            {
                self.unrestock(order_id, &restored).await;
                return Err(e.into());
            }
            restored.push(*line);
        }
        Ok(restored)
    }

    /// Take back a released reservation after the cancel could not be recorded
    async fn rereserve(&self, order: &OrderAggregate) {
        for item in &order.items {
            match self
                .inventory
                .reserve_stock_any_warehouse(item.product_id, item.variant_id, item.quantity, order.id)
                .await
            {
                Ok(ReservationOutcome::Reserved { .. }) => {}
                Ok(ReservationOutcome::Insufficient { available }) => tracing::error!(
                    order_id = %order.id,
                    product_id = %item.product_id,
                    variant_id = %item.variant_id,
                    quantity = item.quantity,
                    available = available,
                    "Could not re-reserve released stock, already sold"
                ),
                Err(e) => tracing::error!(
                    order_id = %order.id,
                    product_id = %item.product_id,
                    error = %e,
                    "Stock compensation failed"
                ),
            }
        }
    }

    async fn unrestock(&self, order_id: Uuid, restored: &[Restock]) {
        for line in restored {
            match self
                .inventory
                .decrement_inventory(line.product_id, line.variant_id, line.quantity)
                .await
            {
                Ok(0) => tracing::error!(
                    order_id = %order_id,
                    product_id = %line.product_id,
                    variant_id = %line.variant_id,
                    quantity = line.quantity,
                    "Could not take back restored stock, already sold"
                ),
                Ok(_) => {}
                Err(e) => tracing::error!(
                    order_id = %order_id,
                    product_id = %line.product_id,
                    error = %e,
                    "Stock compensation failed"
                ),
            }
        }
    }
}
