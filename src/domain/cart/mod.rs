// ============================================================================
// Cart Domain - Shopping cart aggregate
// ============================================================================
//
// A cart belongs to a customer or a guest session, holds one line per
// variant, tracks saved-for-later lines and coupons, and keeps its totals
// recomputed after every event. Merged, converted and abandoned carts are
// read-only.
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
