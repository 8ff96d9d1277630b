use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error, Clone)]
pub enum LockError {
    #[error("Lock backend unavailable: {0}")]
    Backend(String),
}

/// Proof of ownership of a named lock until `ttl` elapses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockLease {
    pub key: String,
    pub token: String,
    pub acquired_at: DateTime<Utc>,
    pub ttl: Duration,
}

/// Named, TTL-bounded mutual exclusion across processes.
#[async_trait]
pub trait DistributedLockProvider: Send + Sync {
    /// Returns `None` when another holder has a live lease on `key`.
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockLease>, LockError>;

    /// Returns `false` when the lease already expired or was taken over.
    async fn release(&self, lease: &LockLease) -> Result<bool, LockError>;
}

/// Builds a lease token unique to this process and acquisition.
pub fn new_lease_token() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown-host".to_string());
    format!("{}:{}", host, Uuid::new_v4())
}

#[derive(Debug, Clone)]
struct HeldLease {
    token: String,
    expires_at: Instant,
}

/// Process-local lock table. Suitable for tests and single-instance
/// deployments; expiry mirrors the Redis implementation.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDistributedLock {
    leases: Arc<DashMap<String, HeldLease>>,
}

impl InMemoryDistributedLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self, key: &str) -> bool {
        self.leases
            .get(key)
            .map(|lease| lease.expires_at > Instant::now())
            .unwrap_or(false)
    }
}

#[async_trait]
impl DistributedLockProvider for InMemoryDistributedLock {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockLease>, LockError> {
        let now = Instant::now();
        let token = new_lease_token();
        let held = HeldLease {
            token: token.clone(),
            expires_at: now + ttl,
        };

        match self.leases.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                if entry.get().expires_at > now {
                    return Ok(None);
                }
                debug!("Taking over expired lease on {}", key);
                entry.insert(held);
            }
            Entry::Vacant(entry) => {
                entry.insert(held);
            }
        }

        Ok(Some(LockLease {
            key: key.to_string(),
            token,
            acquired_at: Utc::now(),
            ttl,
        }))
    }

    async fn release(&self, lease: &LockLease) -> Result<bool, LockError> {
        Ok(self
            .leases
            .remove_if(&lease.key, |_, held| held.token == lease.token)
            .is_some())
    }
}
