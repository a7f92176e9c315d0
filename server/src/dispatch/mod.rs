//! Turn Dispatcher
//!
//! Accepts inbound action requests, answers immediately, and runs each turn
//! in a supervised background task with its own resource scope and deadline.
//!
//! Every accepted turn publishes exactly one `final` or `error` followed by
//! one `done`, including when its handler times out or panics.

mod context;
mod dedupe;
mod error;
mod params;
mod registry;
mod scope;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::task::TaskTracker;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

pub use context::ActionContext;
pub use dedupe::{IdempotencyStore, MemoryIdempotencyStore};
pub use error::ActionError;
pub use params::Params;
pub use registry::{ActionHandler, ActionRegistry, Outcome};
pub use scope::{ActionScope, ScopeFactory, ScopeLease, SharedScopeFactory};

use crate::events::{EventBus, TurnEmitter};

/// Inbound request to run an action.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub tag: String,
    pub session_id: Uuid,
    /// Generated when absent or blank.
    pub turn_id: Option<String>,
    pub params: Params,
    /// Provider-assigned id used to drop redeliveries.
    pub message_id: Option<String>,
    /// Inbound channel, namespaces `message_id`.
    pub source: &'static str,
}

/// Immediate acknowledgment of a [`TurnRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    pub turn_id: String,
    /// The message id was seen before; nothing was scheduled.
    pub duplicate: bool,
    /// Parameters the caller should clear.
    pub resets: &'static [&'static str],
}

struct DispatcherInner {
    registry: ActionRegistry,
    bus: Arc<dyn EventBus>,
    scopes: Arc<dyn ScopeFactory>,
    dedupe: Arc<dyn IdempotencyStore>,
    tracker: TaskTracker,
}

/// Cheap to clone; clones share the task group.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

impl Dispatcher {
    pub fn new(
        registry: ActionRegistry,
        bus: Arc<dyn EventBus>,
        scopes: Arc<dyn ScopeFactory>,
        dedupe: Arc<dyn IdempotencyStore>,
    ) -> Self {
        info!(tags = ?registry.tags(), "Dispatcher ready");
        Self {
            inner: Arc::new(DispatcherInner {
                registry,
                bus,
                scopes,
                dedupe,
                tracker: TaskTracker::new(),
            }),
        }
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.inner.registry
    }

    /// Acknowledge `request` and schedule its turn.
    ///
    /// Never waits on the handler. Unknown tags are accepted too; their turn
    /// resolves to `UNKNOWN_TAG`.
    pub async fn accept(&self, request: TurnRequest) -> Accepted {
        let TurnRequest {
            tag,
            session_id,
            turn_id,
            params,
            message_id,
            source,
        } = request;

        let turn_id = turn_id
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let handler = self.inner.registry.get(&tag);
        let resets = handler.as_ref().map_or(&[][..], |h| h.resets());

        if let Some(message_id) = message_id.as_deref() {
            match self.inner.dedupe.claim(source, message_id).await {
                Ok(true) => {}
                Ok(false) => {
                    info!(
                        %session_id,
                        %turn_id,
                        message_id,
                        "Duplicate inbound message, not scheduling"
                    );
                    return Accepted {
                        turn_id,
                        duplicate: true,
                        resets,
                    };
                }
                Err(e) => {
                    warn!(message_id, "Idempotency check failed, accepting anyway: {}", e);
                }
            }
        }

        self.spawn_turn(tag, handler, session_id, turn_id.clone(), params);

        Accepted {
            turn_id,
            duplicate: false,
            resets,
        }
    }

    fn spawn_turn(
        &self,
        tag: String,
        handler: Option<Arc<dyn ActionHandler>>,
        session_id: Uuid,
        turn_id: String,
        params: Params,
    ) {
        let emitter = TurnEmitter::new(self.inner.bus.clone(), session_id, &turn_id);
        let supervisor = emitter.clone();
        let scopes = self.inner.scopes.clone();
        let span = info_span!("turn", %session_id, turn_id = %turn_id, tag = %tag);

        // The inner task isolates handler panics; the outer one is tracked and
        // settles the turn if the inner one dies.
        self.inner.tracker.spawn(
            async move {
                let handle = tokio::spawn(
                    run_turn(tag, handler, params, emitter, scopes).in_current_span(),
                );
                if let Err(e) = handle.await {
                    if e.is_panic() {
                        error!("Turn task panicked: {}", e);
                    } else {
                        warn!("Turn task cancelled: {}", e);
                    }
                    if !supervisor.is_terminated() {
                        supervisor.close_open_tools().await;
                        let fault = ActionError::Internal(e.to_string());
                        supervisor
                            .error(fault.code(), fault.user_message(), fault.retryable())
                            .await;
                        supervisor.done().await;
                    }
                }
            }
            .instrument(span),
        );
    }

    /// Turns still running.
    pub fn in_flight(&self) -> usize {
        self.inner.tracker.len()
    }

    /// Wait until no turn is running. Later `accept` calls still schedule
    /// work.
    ///
    /// Polls the task group without closing it, so it is safe alongside
    /// [`Dispatcher::shutdown`]. Meant for tests and diagnostics.
    pub async fn wait_idle(&self) {
        let mut tick = tokio::time::interval(Duration::from_millis(5));
        while !self.inner.tracker.is_empty() {
            tick.tick().await;
        }
    }

    /// Wait for in-flight turns before the process exits.
    pub async fn shutdown(&self) {
        let pending = self.in_flight();
        if pending > 0 {
            info!(pending, "Waiting for in-flight turns");
        }
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        info!("Dispatcher drained");
    }
}

async fn run_turn(
    tag: String,
    handler: Option<Arc<dyn ActionHandler>>,
    params: Params,
    emitter: TurnEmitter,
    scopes: Arc<dyn ScopeFactory>,
) {
    let started = Instant::now();

    let result = match handler {
        Some(handler) => execute(handler.as_ref(), params, &emitter, scopes.as_ref()).await,
        None => Err(ActionError::UnknownTag(tag)),
    };

    // A handler cut off by its deadline or a fault may leave tool calls open.
    emitter.close_open_tools().await;

    match result {
        Ok(outcome) => emitter.final_message(outcome.text, outcome.meta).await,
        Err(err) => {
            match &err {
                ActionError::Upstream(_) | ActionError::Internal(_) => {
                    error!(code = err.code(), "Turn failed: {}", err);
                }
                _ => warn!(code = err.code(), "Turn rejected: {}", err),
            }
            emitter
                .error(err.code(), err.user_message(), err.retryable())
                .await;
        }
    }
    emitter.done().await;

    info!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Turn finished"
    );
}

async fn execute(
    handler: &dyn ActionHandler,
    params: Params,
    emitter: &TurnEmitter,
    scopes: &dyn ScopeFactory,
) -> Result<Outcome, ActionError> {
    let budget: Duration = handler.deadline();
    let deadline = Instant::now() + budget;

    let scope = tokio::time::timeout_at(deadline, scopes.open_scope())
        .await
        .map_err(|_| ActionError::Timeout)??;
    let ctx = ActionContext::new(params, deadline, emitter.clone(), scope.services.clone());

    let result = tokio::time::timeout_at(deadline, handler.run(&ctx))
        .await
        .unwrap_or(Err(ActionError::Timeout));

    drop(scope);
    result
}
