//! Registry of containers that currently have an interactive session.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use log::{debug, warn};

use super::SessionError;

/// Tracks attached containers when single-session mode is enabled.
///
/// Acquisition is a single check-and-insert under the map's shard lock, so
/// two concurrent attaches for the same container can never both succeed.
/// The lock is never held across I/O.
#[derive(Debug, Clone)]
pub struct SessionRegistry {
    single_session: bool,
    /// Container ID -> claim held by the attached session
    attached: Arc<DashMap<String, Claim>>,
    next_claim: Arc<AtomicU64>,
}

#[derive(Debug, Clone, Copy)]
struct Claim {
    id: u64,
    since: Instant,
}

impl SessionRegistry {
    pub fn new(single_session: bool) -> Self {
        Self {
            single_session,
            attached: Arc::new(DashMap::new()),
            next_claim: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Whether at most one session per container is enforced.
    pub fn single_session(&self) -> bool {
        self.single_session
    }

    /// Claim the container for a new session.
    ///
    /// The returned guard releases the claim when dropped. With single-session
    /// mode off this always succeeds and records nothing.
    pub fn try_acquire(&self, container_id: &str) -> Result<SessionGuard, SessionError> {
        if !self.single_session {
            return Ok(SessionGuard {
                registry: None,
                container_id: container_id.to_string(),
                claim_id: 0,
            });
        }

        match self.attached.entry(container_id.to_string()) {
            Entry::Occupied(_) => {
                warn!("container {} has established connection", container_id);
                Err(SessionError::AlreadyAttached(container_id.to_string()))
            }
            Entry::Vacant(slot) => {
                let claim_id = self.next_claim.fetch_add(1, Ordering::Relaxed);
                slot.insert(Claim {
                    id: claim_id,
                    since: Instant::now(),
                });
                debug!("container {} attached", container_id);
                Ok(SessionGuard {
                    registry: Some(Arc::clone(&self.attached)),
                    container_id: container_id.to_string(),
                    claim_id,
                })
            }
        }
    }

    /// Remove the container's entry. Releasing an absent entry is a no-op.
    pub fn release(&self, container_id: &str) {
        if let Some((_, claim)) = self.attached.remove(container_id) {
            log_detached(container_id, claim);
        }
    }

    /// Whether the container currently holds a session.
    pub fn is_attached(&self, container_id: &str) -> bool {
        self.attached.contains_key(container_id)
    }

    /// Number of attached containers.
    pub fn len(&self) -> usize {
        self.attached.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attached.is_empty()
    }
}

fn log_detached(container_id: &str, claim: Claim) {
    debug!(
        "container {} detached after {:?}",
        container_id,
        claim.since.elapsed()
    );
}

/// Claim on a container, released exactly once when dropped.
///
/// Dropping covers every exit path of a session: normal close, I/O errors,
/// early returns after acquisition and panics.
#[derive(Debug)]
pub struct SessionGuard {
    registry: Option<Arc<DashMap<String, Claim>>>,
    container_id: String,
    claim_id: u64,
}

impl SessionGuard {
    pub fn container_id(&self) -> &str {
        &self.container_id
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let Some(attached) = self.registry.take() else {
            return;
        };
        // Only remove our own claim: after an explicit release the container
        // may already belong to a newer session.
        let claim_id = self.claim_id;
        let removed = attached.remove_if(&self.container_id, |_, claim| claim.id == claim_id);
        if let Some((_, claim)) = removed {
            log_detached(&self.container_id, claim);
        }
    }
}
