// ============================================================================
// Order Domain - Business Logic for Order Aggregate
// ============================================================================
//
// This module contains ALL Order-specific code:
// - Value objects (OrderItem, OrderStatus, StatusHistoryEntry, OrderNumber)
// - Events (OrderPlaced, OrderShipped, OrderCancelled, etc.)
// - Commands (Place, ConfirmPayment, Ship, Cancel, RequestReturn, etc.)
// - Errors (OrderError enum)
// - Aggregate (OrderAggregate with the status transition graph)
//
// ============================================================================

pub mod value_objects;
pub mod events;
pub mod commands;
pub mod errors;
pub mod aggregate;

// Re-export for convenience
pub use value_objects::*;
pub use events::*;
pub use commands::*;
pub use errors::*;
pub use aggregate::*;
