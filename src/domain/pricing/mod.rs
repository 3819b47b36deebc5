// ============================================================================
// Pricing - discounts, coupons and totals
// ============================================================================

pub mod value_objects;
pub mod calculator;

pub use value_objects::*;
pub use calculator::*;
