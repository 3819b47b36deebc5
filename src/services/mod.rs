// ============================================================================
// Services - orchestration over the aggregates and outside collaborators
// ============================================================================
//
// Collaborators (inventory, payment, notification, catalog, sequence) are
// traits with in-memory implementations. The lifecycle services load
// aggregates through a CommandHandler, apply side effects in an order that
// can be retried, and keep the lookup projections (owner → cart,
// cart → checkout, number → order).
//
// ============================================================================

pub mod error;
pub mod catalog;
pub mod inventory;
#[cfg(feature = "scylla")]
pub mod scylla_inventory;
pub mod payment;
pub mod notification;
pub mod sequence;
pub mod cart;
pub mod checkout;
pub mod orders;
pub mod placement;
pub mod sweeper;

pub use error::{ErrorKind, ServiceError};
pub use catalog::{Catalog, CatalogError, InMemoryCatalog, ProductSnapshot};
pub use inventory::{InMemoryInventory, InventoryError, InventoryService, ReservationOutcome};
#[cfg(feature = "scylla")]
pub use scylla_inventory::ScyllaInventory;
pub use payment::{PaymentError, PaymentGateway, RecordingPaymentGateway, RefundReason, RefundRequest, RequesterType};
pub use notification::{LoggingNotifier, NotificationDispatcher, NotificationService, NotificationType, OrderNotification};
pub use sequence::{DocumentNumbers, InMemorySequence, SequenceGenerator};
pub use cart::CartService;
pub use checkout::CheckoutService;
pub use orders::OrderService;
pub use placement::OrderPlacementService;
pub use sweeper::{ExpirationSweeper, SweepReport};
