// ============================================================================
// Domain Layer - Business Logic
// ============================================================================
//
// Each aggregate has its own subdirectory with:
// - Value objects
// - Events
// - Commands
// - Errors
// - Aggregate implementation
//
// Pricing holds the pure money arithmetic shared by all three.
//
// ============================================================================

pub mod pricing;
pub mod cart;
pub mod checkout;
pub mod order;
