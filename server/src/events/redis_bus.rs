//! Redis Pub/Sub Event Bus
//!
//! Publishes on `{prefix}{session_id}` and keeps the last event of each turn
//! as a string key with a TTL. Each subscription uses its own subscriber
//! connection, closed when the stream is dropped.

use std::time::Duration;

use async_trait::async_trait;
use fred::prelude::*;
use fred::types::Expiration;
use futures::StreamExt;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::bus::{BusError, EventBus, EventStream};
use super::TurnEvent;
use crate::db::keys;

/// Event bus over a shared Redis client.
#[derive(Clone)]
pub struct RedisEventBus {
    redis: Client,
    channel_prefix: String,
    snapshot_ttl: Duration,
}

impl RedisEventBus {
    #[must_use]
    pub fn new(redis: Client, channel_prefix: impl Into<String>, snapshot_ttl: Duration) -> Self {
        Self {
            redis,
            channel_prefix: channel_prefix.into(),
            snapshot_ttl,
        }
    }

    fn expiration(&self) -> Expiration {
        Expiration::EX(self.snapshot_ttl.as_secs().max(1) as i64)
    }
}

/// Closes the per-subscription connection when the stream goes away.
struct SubscriberGuard {
    subscriber: Client,
    channel: String,
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        let subscriber = self.subscriber.clone();
        let channel = std::mem::take(&mut self.channel);
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        runtime.spawn(async move {
            if let Err(e) = subscriber.unsubscribe(channel.as_str()).await {
                debug!(channel = %channel, "Unsubscribe failed: {}", e);
            }
            let _ = subscriber.quit().await;
            debug!(channel = %channel, "Subscriber closed");
        });
    }
}

#[async_trait]
impl EventBus for RedisEventBus {
    async fn publish(&self, event: &TurnEvent) -> Result<(), BusError> {
        let payload = event.to_json()?;
        let channel = keys::session_channel(&self.channel_prefix, event.session_id);

        let published = self
            .redis
            .publish::<(), _, _>(channel, payload.as_str())
            .await;

        // Snapshot is written even if the live publish failed, so a reconnecting
        // client still catches up.
        self.redis
            .set::<(), _, _>(
                keys::turn_snapshot(event.session_id, &event.turn_id),
                payload.as_str(),
                Some(self.expiration()),
                None,
                false,
            )
            .await?;
        self.redis
            .set::<(), _, _>(
                keys::last_turn(event.session_id),
                event.turn_id.as_str(),
                Some(self.expiration()),
                None,
                false,
            )
            .await?;

        published.map_err(BusError::from)
    }

    async fn subscribe(&self, session_id: Uuid) -> Result<EventStream, BusError> {
        let channel = keys::session_channel(&self.channel_prefix, session_id);

        let subscriber = self.redis.clone_new();
        let _connect_handle = subscriber.connect();
        subscriber.wait_for_connect().await?;

        let rx = subscriber.message_rx();
        if let Err(e) = subscriber.subscribe(channel.as_str()).await {
            error!(channel = %channel, "Failed to subscribe: {}", e);
            let _ = subscriber.quit().await;
            return Err(BusError::Subscribe(e.to_string()));
        }

        let guard = SubscriberGuard {
            subscriber,
            channel: channel.clone(),
        };

        let stream = futures::stream::unfold((rx, guard), |(mut rx, guard)| async move {
            loop {
                match rx.recv().await {
                    Ok(message) => {
                        if message.channel.to_string() != guard.channel {
                            continue;
                        }
                        if let Some(payload) = message.value.as_string() {
                            return Some((payload, (rx, guard)));
                        }
                        debug!(channel = %guard.channel, "Dropping non-string pub/sub payload");
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(channel = %guard.channel, skipped, "Subscriber lagged, events dropped");
                    }
                    Err(RecvError::Closed) => return None,
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
        let raw: Option<String> = self
            .redis
            .get(keys::turn_snapshot(session_id, turn_id))
            .await?;

        Ok(raw.and_then(|raw| match TurnEvent::from_json(&raw) {
            Ok(event) => Some(event),
            Err(e) => {
                warn!(session_id = %session_id, turn_id, "Ignoring malformed snapshot: {}", e);
                None
            }
        }))
    }

    async fn last_turn(&self, session_id: Uuid) -> Result<Option<String>, BusError> {
        let turn: Option<String> = self.redis.get(keys::last_turn(session_id)).await?;
        Ok(turn.filter(|t| !t.is_empty()))
    }

    async fn ping(&self) -> Result<(), BusError> {
        self.redis.ping::<()>(None).await?;
        Ok(())
    }
}
