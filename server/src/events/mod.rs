//! Turn Event Model
//!
//! Progress events published for every turn, the bus they travel on, and the
//! per-turn emitter handlers write through.
//!
//! Every event shares one envelope (`type`, `sessionId`, `turnId`, `ts`, `seq`); the
//! `type` tag selects the payload variant. Events are serialized through
//! [`TurnEvent::to_json`] only, so the bus, the snapshot store and the stream
//! all carry byte-identical payloads.

mod bus;
mod emitter;
mod memory_bus;
mod redis_bus;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use bus::{BusError, EventBus, EventStream};
pub use emitter::TurnEmitter;
pub use memory_bus::MemoryEventBus;
pub use redis_bus::RedisEventBus;

/// Who authored a message event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Assistant,
    User,
    System,
}

/// Position of a message within a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Immediate acknowledgment that work started.
    Ack,
    /// Intermediate status text.
    Progress,
    /// The turn's single result message.
    Final,
}

/// Lifecycle of a named sub-step (an external collaborator call).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Start,
    Progress,
    End,
}

/// Type-specific event payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// Human-readable text for the client.
    Message {
        role: Role,
        phase: Phase,
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        meta: Option<serde_json::Value>,
    },
    /// Start/progress/end of a collaborator call.
    ToolCall {
        tool: String,
        status: ToolStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        progress: Option<serde_json::Value>,
    },
    /// Structured failure. Always followed by `Done`.
    Error {
        code: String,
        message: String,
        retryable: bool,
    },
    /// Terminal event of a turn.
    Done,
}

impl EventKind {
    /// SSE event name for this payload (matches the JSON `type` tag).
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Message { .. } => "message",
            Self::ToolCall { .. } => "tool_call",
            Self::Error { .. } => "error",
            Self::Done => "done",
        }
    }
}

/// One immutable fact about a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnEvent {
    pub session_id: Uuid,
    pub turn_id: String,
    pub ts: DateTime<Utc>,
    /// Position within the turn, from 1. Zero when not published through a
    /// [`TurnEmitter`].
    #[serde(default)]
    pub seq: u64,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl TurnEvent {
    /// Stamp a payload with its envelope at the current instant.
    pub fn new(session_id: Uuid, turn_id: impl Into<String>, kind: EventKind) -> Self {
        Self {
            session_id,
            turn_id: turn_id.into(),
            ts: Utc::now(),
            seq: 0,
            kind,
        }
    }

    /// Assistant message in the given phase.
    pub fn message(
        session_id: Uuid,
        turn_id: &str,
        phase: Phase,
        text: impl Into<String>,
        meta: Option<serde_json::Value>,
    ) -> Self {
        Self::new(
            session_id,
            turn_id,
            EventKind::Message {
                role: Role::Assistant,
                phase,
                text: text.into(),
                meta,
            },
        )
    }

    pub fn tool(
        session_id: Uuid,
        turn_id: &str,
        tool: impl Into<String>,
        status: ToolStatus,
        progress: Option<serde_json::Value>,
    ) -> Self {
        Self::new(
            session_id,
            turn_id,
            EventKind::ToolCall {
                tool: tool.into(),
                status,
                progress,
            },
        )
    }

    pub fn error(
        session_id: Uuid,
        turn_id: &str,
        code: impl Into<String>,
        message: impl Into<String>,
        retryable: bool,
    ) -> Self {
        Self::new(
            session_id,
            turn_id,
            EventKind::Error {
                code: code.into(),
                message: message.into(),
                retryable,
            },
        )
    }

    pub fn done(session_id: Uuid, turn_id: &str) -> Self {
        Self::new(session_id, turn_id, EventKind::Done)
    }

    /// SSE event name (`message`, `tool_call`, `error`, `done`).
    pub const fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub const fn is_terminal(&self) -> bool {
        matches!(self.kind, EventKind::Done)
    }

    /// Whether `self` was published after `other` within the same turn.
    ///
    /// Sequence numbers decide when both carry one; otherwise timestamps.
    pub fn is_after(&self, other: &Self) -> bool {
        if self.seq > 0 && other.seq > 0 {
            self.seq > other.seq
        } else {
            self.ts > other.ts
        }
    }

    /// Envelope encoder shared by the bus, the snapshot store and the stream.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a raw bus or snapshot payload.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn session() -> Uuid {
        Uuid::parse_str("6f1c2a4e-8d7b-4c3a-9e21-0b5d7f3a1c11").unwrap()
    }

    #[test]
    fn test_message_envelope_shape() {
        let event = TurnEvent::message(
            session(),
            "turn-1",
            Phase::Final,
            "listo",
            Some(json!({ "source": "db" })),
        );
        let value: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();

        assert_eq!(value["type"], "message");
        assert_eq!(value["sessionId"], session().to_string());
        assert_eq!(value["turnId"], "turn-1");
        assert_eq!(value["role"], "assistant");
        assert_eq!(value["phase"], "final");
        assert_eq!(value["text"], "listo");
        assert_eq!(value["meta"]["source"], "db");
        assert!(value["ts"].is_string());
    }

    #[test]
    fn test_message_without_meta_omits_field() {
        let event = TurnEvent::message(session(), "t", Phase::Ack, "hola", None);
        let value: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert!(value.get("meta").is_none());
    }

    #[test]
    fn test_tool_call_shape() {
        let event = TurnEvent::tool(
            session(),
            "t",
            "discovery_search",
            ToolStatus::Progress,
            Some(json!({ "current": 2, "total": 5 })),
        );
        let value: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();

        assert_eq!(value["type"], "tool_call");
        assert_eq!(value["tool"], "discovery_search");
        assert_eq!(value["status"], "progress");
        assert_eq!(value["progress"]["total"], 5);
        assert_eq!(event.name(), "tool_call");
    }

    #[test]
    fn test_error_and_done_shape() {
        let error = TurnEvent::error(session(), "t", "UNKNOWN_TAG", "nope", false);
        let value: serde_json::Value = serde_json::from_str(&error.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["code"], "UNKNOWN_TAG");
        assert_eq!(value["retryable"], false);

        let done = TurnEvent::done(session(), "t");
        let value: serde_json::Value = serde_json::from_str(&done.to_json().unwrap()).unwrap();
        let keys: Vec<&String> = value.as_object().unwrap().keys().collect();
        assert_eq!(keys.len(), 5, "done carries the envelope only: {keys:?}");
        assert_eq!(value["seq"], 0);
        assert!(done.is_terminal());
        assert!(!error.is_terminal());
    }

    #[test]
    fn test_parse_preserves_timestamp_precision() {
        let event = TurnEvent::tool(session(), "t", "db", ToolStatus::Start, None);
        let parsed = TurnEvent::from_json(&event.to_json().unwrap()).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_parse_rejects_unknown_type() {
        let raw = json!({
            "type": "telemetry",
            "sessionId": session(),
            "turnId": "t",
            "ts": "2025-01-01T00:00:00Z"
        })
        .to_string();
        assert!(TurnEvent::from_json(&raw).is_err());
        assert!(TurnEvent::from_json("not json").is_err());
    }

    #[test]
    fn test_sequence_orders_events_with_equal_timestamps() {
        let mut first = TurnEvent::tool(session(), "t", "db", ToolStatus::Start, None);
        let mut second = first.clone();
        first.seq = 1;
        second.seq = 2;

        assert!(second.is_after(&first));
        assert!(!first.is_after(&second));
        assert!(!first.is_after(&first.clone()));
    }

    #[test]
    fn test_unsequenced_events_fall_back_to_timestamps() {
        let earlier = TurnEvent::done(session(), "t");
        let mut later = earlier.clone();
        later.ts += chrono::Duration::milliseconds(1);

        assert!(later.is_after(&earlier));
        assert!(!earlier.is_after(&later));
    }
}
