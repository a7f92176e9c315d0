//! In-Process Event Bus
//!
//! Single-node bus used for development (`EVENT_BUS=memory`) and tests. Same
//! semantics as the Redis bus: broadcast fan-out per session, last-write-wins
//! snapshots that expire after the configured TTL.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};
use uuid::Uuid;

use super::bus::{BusError, EventBus, EventStream};
use super::TurnEvent;

/// Per-session channel capacity before slow subscribers start lagging.
const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug)]
struct Expiring {
    value: String,
    expires_at: Instant,
}

impl Expiring {
    fn live(&self) -> Option<&str> {
        (Instant::now() < self.expires_at).then_some(self.value.as_str())
    }
}

/// Broadcast channels and snapshots held in memory.
#[derive(Debug)]
pub struct MemoryEventBus {
    channels: DashMap<Uuid, broadcast::Sender<String>>,
    snapshots: DashMap<(Uuid, String), Expiring>,
    last_turns: DashMap<Uuid, Expiring>,
    snapshot_ttl: Duration,
}

impl MemoryEventBus {
    #[must_use]
    pub fn new(snapshot_ttl: Duration) -> Self {
        Self {
            channels: DashMap::new(),
            snapshots: DashMap::new(),
            last_turns: DashMap::new(),
            snapshot_ttl,
        }
    }

    fn sender(&self, session_id: Uuid) -> broadcast::Sender<String> {
        self.channels
            .entry(session_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    /// Push an arbitrary payload to a session's live subscribers, bypassing
    /// the encoder and the snapshot store.
    pub fn publish_raw(&self, session_id: Uuid, payload: impl Into<String>) {
        let _ = self.sender(session_id).send(payload.into());
    }

    /// Store an arbitrary snapshot payload for a turn.
    pub fn put_raw_snapshot(&self, session_id: Uuid, turn_id: &str, payload: impl Into<String>) {
        let expires_at = Instant::now() + self.snapshot_ttl;
        self.snapshots.insert(
            (session_id, turn_id.to_string()),
            Expiring {
                value: payload.into(),
                expires_at,
            },
        );
        self.last_turns.insert(
            session_id,
            Expiring {
                value: turn_id.to_string(),
                expires_at,
            },
        );
    }

    /// Number of live subscribers on a session channel.
    pub fn subscriber_count(&self, session_id: Uuid) -> usize {
        self.channels
            .get(&session_id)
            .map_or(0, |sender| sender.receiver_count())
    }

    /// Drop expired snapshots and idle channels.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.snapshots.retain(|_, snap| snap.expires_at > now);
        self.last_turns.retain(|_, turn| turn.expires_at > now);
        self.channels.retain(|_, sender| sender.receiver_count() > 0);
    }
}

#[async_trait]
impl EventBus for MemoryEventBus {
    async fn publish(&self, event: &TurnEvent) -> Result<(), BusError> {
        let payload = event.to_json()?;

        // No receivers is not an error: nobody is watching this session yet.
        let _ = self.sender(event.session_id).send(payload.clone());
        self.put_raw_snapshot(event.session_id, &event.turn_id, payload);

        Ok(())
    }

    async fn subscribe(&self, session_id: Uuid) -> Result<EventStream, BusError> {
        let rx = self.sender(session_id).subscribe();

        let stream = futures::stream::unfold(rx, move |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(payload) => return Some((payload, rx)),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(session_id = %session_id, skipped, "Subscriber lagged, events dropped");
                    }
                    Err(RecvError::Closed) => {
                        debug!(session_id = %session_id, "Session channel closed");
                        return None;
                    }
                }
            }
        });

        Ok(stream.boxed())
    }

    async fn last_snapshot(
        &self,
        session_id: Uuid,
        turn_id: &str,
    ) -> Result<Option<TurnEvent>, BusError> {
        let raw = self
            .snapshots
            .get(&(session_id, turn_id.to_string()))
            .and_then(|snap| snap.live().map(str::to_owned));

        Ok(raw.and_then(|raw| match TurnEvent::from_json(&raw) {
            Ok(event) => Some(event),
            Err(e) => {
                warn!(session_id = %session_id, turn_id, "Ignoring malformed snapshot: {}", e);
                None
            }
        }))
    }

    async fn last_turn(&self, session_id: Uuid) -> Result<Option<String>, BusError> {
        Ok(self
            .last_turns
            .get(&session_id)
            .and_then(|turn| turn.live().map(str::to_owned)))
    }

    async fn ping(&self) -> Result<(), BusError> {
        Ok(())
    }
}
