//! Conversational Actions
//!
//! One handler per fulfillment tag. Handlers validate their parameters, call
//! collaborators through the [`ActionContext`](crate::dispatch::ActionContext)
//! and return the turn's result; the dispatcher publishes it.

mod ask;
mod create_complaint;
mod lookup;
mod send_code;
mod validate_code;

use std::sync::Arc;

pub use ask::Ask;
pub use create_complaint::CreateComplaint;
pub use lookup::Lookup;
pub use send_code::SendVerificationCode;
pub use validate_code::ValidateVerificationCode;

use crate::dispatch::{ActionHandler, ActionRegistry};

/// Every action the service answers to.
pub fn default_registry() -> ActionRegistry {
    ActionRegistry::new([
        Arc::new(Lookup) as Arc<dyn ActionHandler>,
        Arc::new(CreateComplaint),
        Arc::new(Ask),
        Arc::new(SendVerificationCode),
        Arc::new(ValidateVerificationCode),
    ])
}
