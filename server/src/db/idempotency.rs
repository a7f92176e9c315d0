//! Redis-backed inbound redelivery markers.

use std::time::Duration;

use async_trait::async_trait;
use fred::prelude::*;
use fred::types::{Expiration, SetOptions};

use super::keys;
use crate::dispatch::IdempotencyStore;
use crate::events::BusError;

/// Claims `idem:{provider}:{message_id}` with `SET NX EX`.
#[derive(Clone)]
pub struct RedisIdempotencyStore {
    redis: Client,
    ttl: Duration,
}

impl RedisIdempotencyStore {
    #[must_use]
    pub const fn new(redis: Client, ttl: Duration) -> Self {
        Self { redis, ttl }
    }
}

#[async_trait]
impl IdempotencyStore for RedisIdempotencyStore {
    async fn claim(&self, provider: &str, message_id: &str) -> Result<bool, BusError> {
        let reply: Option<String> = self
            .redis
            .set(
                keys::idempotency(provider, message_id),
                "1",
                Some(Expiration::EX(self.ttl.as_secs().max(1) as i64)),
                Some(SetOptions::NX),
                false,
            )
            .await?;

        Ok(reply.is_some())
    }
}
