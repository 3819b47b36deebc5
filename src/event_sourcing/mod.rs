// ============================================================================
// Event Sourcing Infrastructure
// ============================================================================
//
// Generic, reusable event sourcing infrastructure.
// Domain-specific code is in src/domain/
//
// ============================================================================

mod core;
mod store;
mod command_handler;

pub use core::*;
pub use store::*;
pub use command_handler::{CommandContext, CommandHandler, HandlerError};
