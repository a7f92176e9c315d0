//! Event Bus Contract
//!
//! Live fan-out per session plus a last-event-per-turn snapshot used for
//! replay. Live delivery carries no history; replay is an explicit snapshot
//! read.

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;
use uuid::Uuid;

use super::TurnEvent;

/// Raw JSON payloads published on a session channel after subscription start.
///
/// Dropping the stream unsubscribes.
pub type EventStream = BoxStream<'static, String>;

/// Event bus failures. Not retried by the bus.
#[derive(Debug, Error)]
pub enum BusError {
    /// Event could not be encoded.
    #[error("Event encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    /// Redis transport error.
    #[error("Redis error: {0}")]
    Redis(#[from] fred::error::Error),

    /// Subscription could not be established.
    #[error("Subscription failed: {0}")]
    Subscribe(String),
}

#[async_trait]
pub trait EventBus: Send + Sync {
    /// Deliver `event` to every current subscriber of its session and record
    /// it as the turn's snapshot (and the session's last turn).
    async fn publish(&self, event: &TurnEvent) -> Result<(), BusError>;

    /// Live events for `session_id`, starting now.
    async fn subscribe(&self, session_id: Uuid) -> Result<EventStream, BusError>;

    /// Most recent event published for `(session_id, turn_id)`, if unexpired.
    ///
    /// A malformed stored payload reads as `None`.
    async fn last_snapshot(
        &self,
        session_id: Uuid,
        turn_id: &str,
    ) -> Result<Option<TurnEvent>, BusError>;

    /// Turn id of the session's most recent publish, if unexpired.
    async fn last_turn(&self, session_id: Uuid) -> Result<Option<String>, BusError>;

    /// Liveness check for the health endpoint.
    async fn ping(&self) -> Result<(), BusError>;
}
