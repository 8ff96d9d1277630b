use crate::domain::MigrationEnvelope;
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::shutdown::Shutdown;
use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, warn};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Execution failures allowed before an event is abandoned.
    pub max_attempts: u32,
    /// Lock-contention republishes allowed before an event is abandoned.
    pub max_lock_waits: u32,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            max_lock_waits: 20,
            min_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(15),
        }
    }
}

impl RetryPolicy {
    /// Uniform random delay in `[min_delay, max_delay]`.
    pub fn next_delay(&self) -> Duration {
        let min = self.min_delay.as_millis() as u64;
        let max = (self.max_delay.as_millis() as u64).max(min);
        if min == max {
            return Duration::from_millis(min);
        }
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }
}

/// Republishes envelopes after a delay on timer tasks, so a pending retry never
/// occupies the worker that is handling other events.
#[derive(Clone)]
pub struct RetryScheduler {
    bus: Arc<dyn EventBus>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl RetryScheduler {
    pub fn new(bus: Arc<dyn EventBus>, shutdown: CancellationToken) -> Self {
        Self {
            bus,
            tracker: TaskTracker::new(),
            shutdown,
        }
    }

    /// The returned handle resolves to `true` once the envelope is back on the
    /// bus, or `false` if the republish failed.
    pub fn schedule(&self, envelope: MigrationEnvelope, delay: Duration) -> JoinHandle<bool> {
        let bus = self.bus.clone();
        let shutdown = self.shutdown.clone();

        self.tracker.spawn(async move {
            let key = envelope.payload.lock_key();
            tokio::select! {
                _ = sleep(delay) => {
                    debug!("Republishing {} after {:?}", key, delay);
                }
                _ = shutdown.cancelled() => {
                    warn!("Shutdown requested, republishing {} without waiting", key);
                }
            }

            match bus.publish(envelope).await {
                Ok(()) => true,
                Err(e) => {
                    error!("Failed to republish migration request {}: {}", key, e);
                    false
                }
            }
        })
    }

    /// Retries that are still waiting for their timer.
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Waits until every scheduled retry has been published.
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}

#[async_trait]
impl Shutdown for RetryScheduler {
    /// Fires every pending retry immediately and waits for the publishes.
    async fn shutdown(&self) -> anyhow::Result<()> {
        self.shutdown.cancel();
        self.wait_idle().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Envelope, MigrationRequestEvent};
    use crate::infrastructure::event_bus::InMemoryEventBus;

    #[test]
    fn delay_stays_within_bounds() {
        let policy = RetryPolicy::default();
        for _ in 0..200 {
            let delay = policy.next_delay();
            assert!(delay >= Duration::from_secs(5) && delay <= Duration::from_secs(15));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_retry_publishes_after_delay() {
        let bus = InMemoryEventBus::new();
        let scheduler = RetryScheduler::new(Arc::new(bus.clone()), CancellationToken::new());

        scheduler.schedule(
            Envelope::new(MigrationRequestEvent::host("catalog")).next_attempt(),
            Duration::from_secs(10),
        );
        assert_eq!(scheduler.pending(), 1);
        assert_eq!(bus.published_count(), 0);

        scheduler.wait_idle().await;
        assert_eq!(bus.published_count(), 1);
        assert_eq!(bus.published()[0].attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn schedule_handle_reports_failed_republish() {
        let bus = InMemoryEventBus::new();
        drop(bus.subscribe());
        let scheduler = RetryScheduler::new(Arc::new(bus.clone()), CancellationToken::new());

        let published = scheduler
            .schedule(Envelope::new(MigrationRequestEvent::host("catalog")), Duration::from_secs(5))
            .await
            .unwrap();

        assert!(!published);
    }

    #[tokio::test]
    async fn shutdown_flushes_pending_retries() {
        let bus = InMemoryEventBus::new();
        let shutdown = CancellationToken::new();
        let scheduler = RetryScheduler::new(Arc::new(bus.clone()), shutdown.clone());

        scheduler.schedule(
            Envelope::new(MigrationRequestEvent::host("catalog")),
            Duration::from_secs(3600),
        );
        shutdown.cancel();

        scheduler.wait_idle().await;
        assert_eq!(bus.published_count(), 1);
    }
}
