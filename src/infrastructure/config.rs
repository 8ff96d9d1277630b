use crate::infrastructure::aggregation_cache::AggregationCacheConfig;
use crate::infrastructure::kafka_event_bus::KafkaConfig;
use crate::infrastructure::retry_scheduler::RetryPolicy;
use std::str::FromStr;
use std::time::Duration;

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_string(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub port: u16,
    pub proxy_config_path: String,
    pub proxy_config_reload_interval: Duration,
    pub aggregation_timeout: Duration,
    pub aggregation_cache: AggregationCacheConfig,
    /// Headers copied from the inbound request onto every aggregation call.
    pub forwarded_headers: Vec<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            proxy_config_path: "proxy.json".to_string(),
            proxy_config_reload_interval: Duration::from_secs(5),
            aggregation_timeout: Duration::from_secs(10),
            aggregation_cache: AggregationCacheConfig::default(),
            forwarded_headers: vec!["authorization".to_string(), "accept-language".to_string()],
        }
    }
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            port: env_or("GATEWAY_PORT", defaults.port),
            proxy_config_path: env_string("PROXY_CONFIG_PATH", &defaults.proxy_config_path),
            proxy_config_reload_interval: Duration::from_secs(env_or(
                "PROXY_CONFIG_RELOAD_SECS",
                defaults.proxy_config_reload_interval.as_secs(),
            )),
            aggregation_timeout: Duration::from_millis(env_or(
                "AGGREGATION_TIMEOUT_MS",
                defaults.aggregation_timeout.as_millis() as u64,
            )),
            aggregation_cache: AggregationCacheConfig {
                ttl: Duration::from_secs(env_or(
                    "AGGREGATION_CACHE_TTL_SECS",
                    defaults.aggregation_cache.ttl.as_secs(),
                )),
                ..defaults.aggregation_cache
            },
            forwarded_headers: std::env::var("AGGREGATION_FORWARDED_HEADERS")
                .map(|v| {
                    v.split(',')
                        .map(|h| h.trim().to_ascii_lowercase())
                        .filter(|h| !h.is_empty())
                        .collect()
                })
                .unwrap_or(defaults.forwarded_headers),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MigrationWorkerConfig {
    /// The logical database this service owns.
    pub database_name: String,
    pub redis_url: String,
    pub kafka: KafkaConfig,
    pub retry: RetryPolicy,
    pub lock_ttl: Duration,
    pub unit_of_work_timeout: Option<Duration>,
    pub max_db_connections: u32,
    /// Publish a host migration request on startup.
    pub migrate_on_startup: bool,
}

impl Default for MigrationWorkerConfig {
    fn default() -> Self {
        Self {
            database_name: "catalog".to_string(),
            redis_url: "redis://127.0.0.1:6379".to_string(),
            kafka: KafkaConfig::default(),
            retry: RetryPolicy::default(),
            lock_ttl: Duration::from_secs(120),
            unit_of_work_timeout: None,
            max_db_connections: 2,
            migrate_on_startup: true,
        }
    }
}

impl MigrationWorkerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let retry = RetryPolicy {
            max_attempts: env_or("MIGRATION_MAX_ATTEMPTS", defaults.retry.max_attempts),
            max_lock_waits: env_or("MIGRATION_MAX_LOCK_WAITS", defaults.retry.max_lock_waits),
            min_delay: Duration::from_millis(env_or(
                "MIGRATION_RETRY_MIN_MS",
                defaults.retry.min_delay.as_millis() as u64,
            )),
            max_delay: Duration::from_millis(env_or(
                "MIGRATION_RETRY_MAX_MS",
                defaults.retry.max_delay.as_millis() as u64,
            )),
        };
        let kafka = KafkaConfig {
            bootstrap_servers: env_string(
                "KAFKA_BOOTSTRAP_SERVERS",
                &defaults.kafka.bootstrap_servers,
            ),
            group_id: env_string("KAFKA_GROUP_ID", &defaults.kafka.group_id),
            migration_topic: env_string("MIGRATION_TOPIC", &defaults.kafka.migration_topic),
            ..defaults.kafka
        };

        Self {
            database_name: env_string("MIGRATION_DATABASE", &defaults.database_name),
            redis_url: env_string("REDIS_URL", &defaults.redis_url),
            kafka,
            retry,
            lock_ttl: Duration::from_secs(env_or(
                "MIGRATION_LOCK_TTL_SECS",
                defaults.lock_ttl.as_secs(),
            )),
            unit_of_work_timeout: std::env::var("MIGRATION_UOW_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.trim().parse().ok())
                .map(Duration::from_secs),
            max_db_connections: env_or("MIGRATION_MAX_DB_CONNECTIONS", defaults.max_db_connections),
            migrate_on_startup: env_or("MIGRATE_ON_STARTUP", defaults.migrate_on_startup),
        }
    }
}
