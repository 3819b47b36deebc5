// ============================================================================
// Checkout Domain - Checkout session aggregate
// ============================================================================
//
// Short-lived, single-use session over exactly one cart. Collects shipping,
// payment and billing selections, keeps a pricing snapshot, and records the
// order it was turned into.
//
// ============================================================================

pub mod value_objects;
pub mod events;
pub mod commands;
pub mod errors;
pub mod aggregate;

pub use value_objects::*;
pub use events::*;
pub use commands::*;
pub use errors::*;
pub use aggregate::*;
