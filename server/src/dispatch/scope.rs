//! Handler-local resource scope.
//!
//! Each turn runs against its own scope, opened by the dispatcher after the
//! inbound request has already been answered. Dropping the scope releases it,
//! so every exit path (result, error, timeout, panic unwind) gives it back.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::trace;

use crate::collaborators::{CollaboratorResult, Services};

/// Opens scopes for turns.
#[async_trait]
pub trait ScopeFactory: Send + Sync {
    async fn open_scope(&self) -> CollaboratorResult<ActionScope>;
}

/// Collaborator handles for one turn plus the lease that releases them.
pub struct ActionScope {
    pub services: Services,
    _lease: ScopeLease,
}

impl ActionScope {
    pub fn new(services: Services, lease: ScopeLease) -> Self {
        Self {
            services,
            _lease: lease,
        }
    }
}

/// Decrements the owning factory's open-scope count on drop.
pub struct ScopeLease {
    open: Arc<AtomicUsize>,
}

impl Drop for ScopeLease {
    fn drop(&mut self) {
        let remaining = self.open.fetch_sub(1, Ordering::AcqRel) - 1;
        trace!(remaining, "Action scope released");
    }
}

/// Hands every turn the same (cheaply cloned) service handles and counts
/// how many scopes are open.
pub struct SharedScopeFactory {
    services: Services,
    open: Arc<AtomicUsize>,
}

impl SharedScopeFactory {
    pub fn new(services: Services) -> Self {
        Self {
            services,
            open: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Scopes currently held by running turns.
    pub fn open_scopes(&self) -> usize {
        self.open.load(Ordering::Acquire)
    }
}

#[async_trait]
impl ScopeFactory for SharedScopeFactory {
    async fn open_scope(&self) -> CollaboratorResult<ActionScope> {
        self.open.fetch_add(1, Ordering::AcqRel);
        let lease = ScopeLease {
            open: self.open.clone(),
        };
        Ok(ActionScope::new(self.services.clone(), lease))
    }
}
