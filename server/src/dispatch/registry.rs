//! Action handler contract and the tag → handler table.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::context::ActionContext;
use super::error::ActionError;

/// Successful result of a turn, published as its `final` message.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub text: String,
    pub meta: Option<serde_json::Value>,
}

impl Outcome {
    pub fn new(text: impl Into<String>, meta: serde_json::Value) -> Self {
        Self {
            text: text.into(),
            meta: Some(meta),
        }
    }
}

#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Tag this handler answers to.
    fn tag(&self) -> &'static str;

    /// Budget for the whole invocation, collaborator calls included.
    fn deadline(&self) -> Duration;

    /// Conversation parameters cleared once the action is accepted.
    fn resets(&self) -> &'static [&'static str] {
        &[]
    }

    async fn run(&self, ctx: &ActionContext) -> Result<Outcome, ActionError>;
}

/// Immutable after construction.
#[derive(Clone, Default)]
pub struct ActionRegistry {
    handlers: HashMap<&'static str, Arc<dyn ActionHandler>>,
}

impl ActionRegistry {
    /// Build from a handler list. A repeated tag replaces the earlier entry.
    pub fn new(handlers: impl IntoIterator<Item = Arc<dyn ActionHandler>>) -> Self {
        let handlers = handlers
            .into_iter()
            .map(|handler| (handler.tag(), handler))
            .collect();
        Self { handlers }
    }

    pub fn get(&self, tag: &str) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.get(tag).cloned()
    }

    /// Registered tags, sorted.
    pub fn tags(&self) -> Vec<&'static str> {
        let mut tags: Vec<_> = self.handlers.keys().copied().collect();
        tags.sort_unstable();
        tags
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("tags", &self.tags())
            .finish()
    }
}
