use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct MigrationMetrics {
    // Handler outcomes
    pub events_received: AtomicU64,
    pub events_ignored: AtomicU64,
    pub migrations_succeeded: AtomicU64,
    pub retries_scheduled: AtomicU64,
    pub lock_waits_scheduled: AtomicU64,
    pub events_abandoned: AtomicU64,

    // Executor
    pub owners_applied: AtomicU64,
    pub owners_skipped: AtomicU64,
    pub structural_changes: AtomicU64,

    // Lock
    pub locks_acquired: AtomicU64,
    pub lock_contention: AtomicU64,
    pub lock_release_failures: AtomicU64,

    pub migration_latency: AtomicU64, // in milliseconds
}

impl MigrationMetrics {
    pub fn record_migration_latency(&self, duration: Duration) {
        self.migration_latency
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn get_average_migration_latency(&self) -> f64 {
        let total = self.migration_latency.load(Ordering::Relaxed);
        let count = self.migrations_succeeded.load(Ordering::Relaxed);
        if count > 0 {
            total as f64 / count as f64
        } else {
            0.0
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "events_received": self.events_received.load(Ordering::Relaxed),
            "events_ignored": self.events_ignored.load(Ordering::Relaxed),
            "migrations_succeeded": self.migrations_succeeded.load(Ordering::Relaxed),
            "retries_scheduled": self.retries_scheduled.load(Ordering::Relaxed),
            "lock_waits_scheduled": self.lock_waits_scheduled.load(Ordering::Relaxed),
            "events_abandoned": self.events_abandoned.load(Ordering::Relaxed),
            "owners_applied": self.owners_applied.load(Ordering::Relaxed),
            "owners_skipped": self.owners_skipped.load(Ordering::Relaxed),
            "structural_changes": self.structural_changes.load(Ordering::Relaxed),
            "locks_acquired": self.locks_acquired.load(Ordering::Relaxed),
            "lock_contention": self.lock_contention.load(Ordering::Relaxed),
            "lock_release_failures": self.lock_release_failures.load(Ordering::Relaxed),
            "avg_migration_latency_ms": self.get_average_migration_latency(),
        })
    }
}

#[derive(Debug, Default)]
pub struct GatewayMetrics {
    // Aggregation
    pub aggregation_requests: AtomicU64,
    pub endpoint_calls: AtomicU64,
    pub endpoint_failures: AtomicU64,
    pub cache_hits: AtomicU64,
    pub aggregation_latency: AtomicU64, // in milliseconds

    // Proxy fall-through
    pub proxied_requests: AtomicU64,
    pub proxy_errors: AtomicU64,
    pub unmatched_routes: AtomicU64,
}

impl GatewayMetrics {
    pub fn record_aggregation_latency(&self, duration: Duration) {
        self.aggregation_latency
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn get_average_aggregation_latency(&self) -> f64 {
        let total = self.aggregation_latency.load(Ordering::Relaxed);
        let count = self.aggregation_requests.load(Ordering::Relaxed);
        if count > 0 {
            total as f64 / count as f64
        } else {
            0.0
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "aggregation_requests": self.aggregation_requests.load(Ordering::Relaxed),
            "endpoint_calls": self.endpoint_calls.load(Ordering::Relaxed),
            "endpoint_failures": self.endpoint_failures.load(Ordering::Relaxed),
            "cache_hits": self.cache_hits.load(Ordering::Relaxed),
            "avg_aggregation_latency_ms": self.get_average_aggregation_latency(),
            "proxied_requests": self.proxied_requests.load(Ordering::Relaxed),
            "proxy_errors": self.proxy_errors.load(Ordering::Relaxed),
            "unmatched_routes": self.unmatched_routes.load(Ordering::Relaxed),
        })
    }
}
