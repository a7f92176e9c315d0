//! State Store Layer
//!
//! Redis connection, key namespacing, and the Redis-backed idempotency store.
//!
//! Key Registry
//! - `{prefix}{session_id}` = pub/sub channel for a session's turn events
//! - `sse:last:{session_id}:{turn_id}` = last event snapshot for a turn
//! - `sse:lastturn:{session_id}` = turn id of the session's latest publish
//! - `idem:{provider}:{message_id}` = inbound redelivery marker

mod idempotency;


use anyhow::Result;
use tracing::info;

pub use idempotency::RedisIdempotencyStore;

/// Redis key builders.
pub mod keys {
    use uuid::Uuid;

    /// Pub/sub channel carrying a session's events.
    pub fn session_channel(prefix: &str, session_id: Uuid) -> String {
        format!("{prefix}{session_id}")
    }

    /// Snapshot of the last event published for a turn.
    pub fn turn_snapshot(session_id: Uuid, turn_id: &str) -> String {
        format!("sse:last:{session_id}:{turn_id}")
    }

    /// Pointer to the session's most recently published turn.
    pub fn last_turn(session_id: Uuid) -> String {
        format!("sse:lastturn:{session_id}")
    }

    /// Redelivery marker for an inbound message.
    pub fn idempotency(provider: &str, message_id: &str) -> String {
        format!("idem:{provider}:{message_id}")
    }
}

/// Create Redis client.
pub async fn create_redis_client(redis_url: &str) -> Result<fred::clients::Client> {
    use fred::prelude::*;

    let config = Config::from_url(redis_url)?;
    let client = Client::new(config, None, None, None);
    client.connect();
    client.wait_for_connect().await?;

    info!("Connected to Redis");
    Ok(client)
}
