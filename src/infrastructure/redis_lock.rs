use crate::infrastructure::distributed_lock::{
    new_lease_token, DistributedLockProvider, LockError, LockLease,
};
use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use std::time::Duration;
use tracing::{debug, warn};

const KEY_PREFIX: &str = "lock:";

const RELEASE_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

/// Redis-backed lease: `SET key token NX PX ttl` to acquire, compare-and-delete
/// script to release so an expired holder never frees someone else's lease.
#[derive(Clone)]
pub struct RedisDistributedLock {
    connection: ConnectionManager,
}

impl RedisDistributedLock {
    pub async fn connect(redis_url: &str) -> Result<Self, LockError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| LockError::Backend(format!("invalid redis url: {}", e)))?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| LockError::Backend(e.to_string()))?;
        Ok(Self { connection })
    }

    pub fn from_connection(connection: ConnectionManager) -> Self {
        Self { connection }
    }

    fn redis_key(key: &str) -> String {
        format!("{}{}", KEY_PREFIX, key)
    }
}

#[async_trait]
impl DistributedLockProvider for RedisDistributedLock {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockLease>, LockError> {
        let token = new_lease_token();
        let redis_key = Self::redis_key(key);
        let mut conn = self.connection.clone();

        let reply: Option<String> = redis::cmd("SET")
            .arg(&redis_key)
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis().max(1) as u64)
            .query_async(&mut conn)
            .await
            .map_err(|e| LockError::Backend(e.to_string()))?;

        match reply {
            Some(_) => {
                debug!("Acquired redis lock {}", redis_key);
                Ok(Some(LockLease {
                    key: key.to_string(),
                    token,
                    acquired_at: Utc::now(),
                    ttl,
                }))
            }
            None => Ok(None),
        }
    }

    async fn release(&self, lease: &LockLease) -> Result<bool, LockError> {
        let redis_key = Self::redis_key(&lease.key);
        let mut conn = self.connection.clone();

        let removed: i32 = redis::Script::new(RELEASE_SCRIPT)
            .key(&redis_key)
            .arg(&lease.token)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| LockError::Backend(e.to_string()))?;

        if removed == 0 {
            warn!("Redis lock {} was no longer held by {}", redis_key, lease.token);
        }
        Ok(removed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore]
    async fn redis_lock_is_exclusive() {
        let lock = RedisDistributedLock::connect("redis://127.0.0.1/").await.unwrap();
        let key = format!("test-{}", uuid::Uuid::new_v4());

        let lease = lock
            .try_acquire(&key, Duration::from_secs(5))
            .await
            .unwrap()
            .unwrap();
        assert!(lock
            .try_acquire(&key, Duration::from_secs(5))
            .await
            .unwrap()
            .is_none());
        assert!(lock.release(&lease).await.unwrap());
    }
}
