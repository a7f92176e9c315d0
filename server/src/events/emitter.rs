//! Per-Turn Emitter
//!
//! The only way events for a turn reach the bus. Tracks the turn's lifecycle
//! so that nothing is published after `done` and `done` is published at most
//! once, no matter how many exit paths try to terminate the turn.
//!
//! Publishing is best-effort: bus failures are logged and swallowed, never
//! surfaced to the action that produced the event.
//!
//! Every event gets the next per-turn sequence number, starting at 1. Events
//! published ahead of the turn's dispatch (channel acks) come from an
//! unsequenced emitter and order by timestamp instead. Tool
//! calls that were started but never ended are closed by
//! [`TurnEmitter::close_open_tools`] before the turn resolves.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{EventBus, Phase, ToolStatus, TurnEvent};

struct TurnState {
    /// A `final` or `error` has been published.
    resolved: AtomicBool,
    /// `done` has been published.
    terminated: AtomicBool,
    /// Whether events are numbered.
    sequenced: bool,
    /// Last sequence number handed out.
    seq: AtomicU64,
    /// Tools with a published `start` and no `end` yet.
    open_tools: Mutex<Vec<String>>,
}

/// Cheap to clone; clones share the turn's lifecycle state.
#[derive(Clone)]
pub struct TurnEmitter {
    bus: Arc<dyn EventBus>,
    session_id: Uuid,
    turn_id: Arc<str>,
    state: Arc<TurnState>,
}

impl TurnEmitter {
    pub fn new(bus: Arc<dyn EventBus>, session_id: Uuid, turn_id: &str) -> Self {
        Self::build(bus, session_id, turn_id, true)
    }

    /// Emitter whose events carry `seq` 0. For events published before the
    /// dispatcher takes over the same turn with its own numbering.
    pub fn unsequenced(bus: Arc<dyn EventBus>, session_id: Uuid, turn_id: &str) -> Self {
        Self::build(bus, session_id, turn_id, false)
    }

    fn build(bus: Arc<dyn EventBus>, session_id: Uuid, turn_id: &str, sequenced: bool) -> Self {
        Self {
            bus,
            session_id,
            turn_id: Arc::from(turn_id),
            state: Arc::new(TurnState {
                resolved: AtomicBool::new(false),
                terminated: AtomicBool::new(false),
                sequenced,
                seq: AtomicU64::new(0),
                open_tools: Mutex::new(Vec::new()),
            }),
        }
    }

    pub const fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn turn_id(&self) -> &str {
        &self.turn_id
    }

    /// Whether a `final` or `error` has been published.
    pub fn is_resolved(&self) -> bool {
        self.state.resolved.load(Ordering::Acquire)
    }

    /// Whether `done` has been published.
    pub fn is_terminated(&self) -> bool {
        self.state.terminated.load(Ordering::Acquire)
    }

    pub async fn ack(&self, text: impl Into<String>, meta: Option<serde_json::Value>) {
        let event = TurnEvent::message(self.session_id, &self.turn_id, Phase::Ack, text, meta);
        self.publish(event).await;
    }

    pub async fn progress(&self, text: impl Into<String>, meta: Option<serde_json::Value>) {
        let event = TurnEvent::message(self.session_id, &self.turn_id, Phase::Progress, text, meta);
        self.publish(event).await;
    }

    pub async fn final_message(&self, text: impl Into<String>, meta: Option<serde_json::Value>) {
        let event = TurnEvent::message(self.session_id, &self.turn_id, Phase::Final, text, meta);
        if self.mark_resolved() {
            self.publish(event).await;
        }
    }

    pub async fn tool(
        &self,
        tool: &str,
        status: ToolStatus,
        progress: Option<serde_json::Value>,
    ) {
        let event = TurnEvent::tool(self.session_id, &self.turn_id, tool, status, progress);
        match status {
            ToolStatus::Start => {
                self.with_open_tools(|open| open.push(tool.to_string()));
                self.publish(event).await;
            }
            // Forgotten only once the end is out; a dropped publish leaves it open.
            ToolStatus::End => {
                self.publish(event).await;
                self.with_open_tools(|open| {
                    if let Some(pos) = open.iter().rposition(|t| t == tool) {
                        open.remove(pos);
                    }
                });
            }
            ToolStatus::Progress => self.publish(event).await,
        }
    }

    /// Publish a failed `end` for every tool still open, newest first.
    pub async fn close_open_tools(&self) {
        let open = self.with_open_tools(std::mem::take);
        for tool in open.iter().rev() {
            debug!(turn_id = %self.turn_id, tool, "Closing interrupted tool call");
            let event = TurnEvent::tool(
                self.session_id,
                &self.turn_id,
                tool.as_str(),
                ToolStatus::End,
                Some(json!({ "ok": false })),
            );
            self.publish(event).await;
        }
    }

    fn with_open_tools<R>(&self, f: impl FnOnce(&mut Vec<String>) -> R) -> R {
        let mut open = self
            .state
            .open_tools
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        f(&mut open)
    }

    pub async fn error(&self, code: &str, message: impl Into<String>, retryable: bool) {
        let event = TurnEvent::error(self.session_id, &self.turn_id, code, message, retryable);
        if self.mark_resolved() {
            self.publish(event).await;
        }
    }

    /// Publish the terminal event. Later calls are no-ops.
    pub async fn done(&self) {
        let first = self
            .state
            .terminated
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if !first {
            debug!(turn_id = %self.turn_id, "Turn already terminated, skipping done");
            return;
        }
        let event = TurnEvent::done(self.session_id, &self.turn_id);
        self.send(event).await;
    }

    /// First caller wins; a turn has one result.
    fn mark_resolved(&self) -> bool {
        let first = self
            .state
            .resolved
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if !first {
            warn!(turn_id = %self.turn_id, "Turn already resolved, dropping second result");
        }
        first
    }

    async fn publish(&self, event: TurnEvent) {
        if self.is_terminated() {
            warn!(
                turn_id = %self.turn_id,
                event_type = event.name(),
                "Dropping event published after done"
            );
            return;
        }
        self.send(event).await;
    }

    async fn send(&self, mut event: TurnEvent) {
        if self.state.sequenced {
            event.seq = self.state.seq.fetch_add(1, Ordering::AcqRel) + 1;
        }
        if let Err(e) = self.bus.publish(&event).await {
            warn!(
                session_id = %self.session_id,
                turn_id = %self.turn_id,
                event_type = event.name(),
                "Failed to publish turn event: {}", e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::StreamExt;

    use super::*;
    use crate::events::{EventKind, MemoryEventBus};

    async fn collect(stream: &mut crate::events::EventStream, n: usize) -> Vec<TurnEvent> {
        let mut out = Vec::new();
        for _ in 0..n {
            let raw = tokio::time::timeout(Duration::from_secs(1), stream.next())
                .await
                .expect("timed out waiting for event")
                .expect("stream ended");
            out.push(TurnEvent::from_json(&raw).unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_done_is_idempotent_and_final() {
        let bus = Arc::new(MemoryEventBus::new(Duration::from_secs(60)));
        let session_id = Uuid::new_v4();
        let mut stream = bus.subscribe(session_id).await.unwrap();
        let emitter = TurnEmitter::new(bus.clone(), session_id, "turn-1");

        emitter.final_message("ok", None).await;
        emitter.done().await;
        emitter.done().await;
        emitter.progress("late", None).await;
        assert!(emitter.is_terminated());

        // Marker from another turn proves nothing else was queued before it.
        let marker = TurnEmitter::new(bus.clone(), session_id, "marker");
        marker.done().await;

        let events = collect(&mut stream, 3).await;
        assert!(matches!(events[0].kind, EventKind::Message { phase: Phase::Final, .. }));
        assert_eq!(events[1].kind, EventKind::Done);
        assert_eq!(events[1].turn_id, "turn-1");
        assert_eq!(events[2].turn_id, "marker");
    }

    #[tokio::test]
    async fn test_only_first_result_is_published() {
        let bus = Arc::new(MemoryEventBus::new(Duration::from_secs(60)));
        let session_id = Uuid::new_v4();
        let emitter = TurnEmitter::new(bus.clone(), session_id, "t");

        emitter.error("UPSTREAM_ERROR", "fallo", false).await;
        emitter.final_message("too late", None).await;

        let snapshot = bus.last_snapshot(session_id, "t").await.unwrap().unwrap();
        assert!(matches!(snapshot.kind, EventKind::Error { .. }));
        assert!(emitter.is_resolved());
        assert!(!emitter.is_terminated());
    }

    #[tokio::test]
    async fn test_clones_share_lifecycle() {
        let bus = Arc::new(MemoryEventBus::new(Duration::from_secs(60)));
        let emitter = TurnEmitter::new(bus, Uuid::new_v4(), "t");
        let clone = emitter.clone();

        clone.done().await;
        assert!(emitter.is_terminated());
    }

    #[tokio::test]
    async fn test_open_tools_are_closed_once() {
        let bus = Arc::new(MemoryEventBus::new(Duration::from_secs(60)));
        let session_id = Uuid::new_v4();
        let mut stream = bus.subscribe(session_id).await.unwrap();
        let emitter = TurnEmitter::new(bus.clone(), session_id, "t");

        emitter.tool("db", ToolStatus::Start, None).await;
        emitter.tool("db", ToolStatus::End, None).await;
        emitter.tool("email", ToolStatus::Start, None).await;
        emitter.close_open_tools().await;
        emitter.close_open_tools().await;
        emitter.done().await;

        let events = collect(&mut stream, 5).await;
        assert_eq!(
            events[3].kind,
            EventKind::ToolCall {
                tool: "email".into(),
                status: ToolStatus::End,
                progress: Some(serde_json::json!({ "ok": false })),
            }
        );
        assert_eq!(events[4].kind, EventKind::Done);
        let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, [1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_unsequenced_acks_do_not_shadow_dispatched_events() {
        let bus = Arc::new(MemoryEventBus::new(Duration::from_secs(60)));
        let session_id = Uuid::new_v4();
        let mut stream = bus.subscribe(session_id).await.unwrap();

        let channel = TurnEmitter::unsequenced(bus.clone(), session_id, "t");
        channel.ack("uno", None).await;
        channel.ack("dos", None).await;
        tokio::time::sleep(Duration::from_millis(2)).await;

        let dispatched = TurnEmitter::new(bus.clone(), session_id, "t");
        dispatched.final_message("listo", None).await;

        let events = collect(&mut stream, 3).await;
        assert_eq!(events[0].seq, 0);
        assert_eq!(events[1].seq, 0);
        assert_eq!(events[2].seq, 1);
        assert!(events[2].is_after(&events[1]));
    }
}
