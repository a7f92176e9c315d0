//! Inbound redelivery guard.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::events::BusError;

/// Records inbound message ids so a redelivered webhook does not start a
/// second turn.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// `true` if this call claimed the id, `false` if it was already seen
    /// within the retention window.
    async fn claim(&self, provider: &str, message_id: &str) -> Result<bool, BusError>;
}

/// Process-local store for single-instance and test deployments.
pub struct MemoryIdempotencyStore {
    seen: DashMap<String, Instant>,
    ttl: Duration,
}

impl MemoryIdempotencyStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            seen: DashMap::new(),
            ttl,
        }
    }

    /// Forget ids whose retention window has passed.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.seen.retain(|_, expires_at| *expires_at > now);
    }

    /// Ids currently remembered, expired ones included until purged.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[async_trait]
impl IdempotencyStore for MemoryIdempotencyStore {
    async fn claim(&self, provider: &str, message_id: &str) -> Result<bool, BusError> {
        let now = Instant::now();
        let key = format!("{provider}:{message_id}");

        let mut claimed = false;
        self.seen
            .entry(key)
            .and_modify(|expires_at| {
                if *expires_at <= now {
                    *expires_at = now + self.ttl;
                    claimed = true;
                }
            })
            .or_insert_with(|| {
                claimed = true;
                now + self.ttl
            });
        Ok(claimed)
    }
}
