//! Execution context handed to an action handler.

use std::future::Future;

use serde_json::json;
use tokio::time::Instant;
use uuid::Uuid;

use super::error::ActionError;
use super::params::Params;
use crate::collaborators::{CollaboratorResult, Services};
use crate::events::{ToolStatus, TurnEmitter};

/// Everything a handler may touch while running one turn.
///
/// Handlers report intermediate progress through the context; the turn's
/// result and its terminal event are published by the dispatcher from the
/// handler's return value.
pub struct ActionContext {
    session_id: Uuid,
    turn_id: String,
    params: Params,
    deadline: Instant,
    emitter: TurnEmitter,
    services: Services,
}

impl ActionContext {
    pub(crate) fn new(
        params: Params,
        deadline: Instant,
        emitter: TurnEmitter,
        services: Services,
    ) -> Self {
        Self {
            session_id: emitter.session_id(),
            turn_id: emitter.turn_id().to_string(),
            params,
            deadline,
            emitter,
            services,
        }
    }

    pub const fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn turn_id(&self) -> &str {
        &self.turn_id
    }

    pub const fn params(&self) -> &Params {
        &self.params
    }

    pub const fn services(&self) -> &Services {
        &self.services
    }

    pub const fn deadline(&self) -> Instant {
        self.deadline
    }

    pub async fn ack(&self, text: impl Into<String>) {
        self.emitter.ack(text, None).await;
    }

    pub async fn progress(&self, text: impl Into<String>) {
        self.emitter.progress(text, None).await;
    }

    /// Await a collaborator call under the turn's deadline.
    pub async fn call<T, F>(&self, fut: F) -> Result<T, ActionError>
    where
        F: Future<Output = CollaboratorResult<T>>,
    {
        match tokio::time::timeout_at(self.deadline, fut).await {
            Ok(result) => result.map_err(ActionError::from),
            Err(_) => Err(ActionError::Timeout),
        }
    }

    /// Like [`ActionContext::call`], bracketed by `tool_call` start/end
    /// events named `tool`.
    pub async fn tool<T, F>(&self, tool: &str, fut: F) -> Result<T, ActionError>
    where
        F: Future<Output = CollaboratorResult<T>>,
    {
        self.emitter.tool(tool, ToolStatus::Start, None).await;
        let result = self.call(fut).await;
        let progress = result.is_err().then(|| json!({ "ok": false }));
        self.emitter.tool(tool, ToolStatus::End, progress).await;
        result
    }
}
