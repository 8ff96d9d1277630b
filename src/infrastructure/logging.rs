use std::fs;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Configuration for console and file logging
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub log_dir: String,
    /// Prefix of the daily rolling file, e.g. `shop-gateway.log.2024-05-01`.
    pub file_name: String,
    pub enable_console: bool,
    pub enable_file: bool,
    pub log_level: Level,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: "logs".to_string(),
            file_name: "shop-coordinator.log".to_string(),
            enable_console: true,
            enable_file: false,
            log_level: Level::INFO,
        }
    }
}

impl LoggingConfig {
    /// File logging is switched on by setting `LOG_DIR`.
    pub fn from_env(file_name: &str) -> Self {
        let mut config = Self {
            file_name: file_name.to_string(),
            ..Self::default()
        };
        if let Ok(dir) = std::env::var("LOG_DIR") {
            if !dir.trim().is_empty() {
                config.log_dir = dir;
                config.enable_file = true;
            }
        }
        if let Some(level) = std::env::var("LOG_LEVEL")
            .ok()
            .and_then(|v| v.parse::<Level>().ok())
        {
            config.log_level = level;
        }
        config
    }

    fn default_filter(&self) -> String {
        format!(
            "shop_coordinator={level},tower_http={level},sqlx=warn,rdkafka=warn,hyper=warn,reqwest=warn",
            level = self.log_level
        )
    }
}

/// Holds the file writer alive; dropping it flushes and stops file logging.
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Installs the global subscriber. `RUST_LOG` overrides the configured level.
pub fn init_logging(config: LoggingConfig) -> Result<LoggingGuard, Box<dyn std::error::Error>> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.default_filter()));

    let mut layers: Vec<Box<dyn Layer<_> + Send + Sync>> = Vec::new();

    if config.enable_console {
        let console_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_level(true)
            .with_ansi(true);
        layers.push(Box::new(console_layer));
    }

    let mut file_guard = None;
    if config.enable_file {
        fs::create_dir_all(&config.log_dir)?;
        let appender = RollingFileAppender::new(Rotation::DAILY, &config.log_dir, &config.file_name);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        file_guard = Some(guard);

        let file_layer = fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_level(true)
            .with_ansi(false);
        layers.push(Box::new(file_layer));
    }

    tracing_subscriber::registry()
        .with(env_filter)
        .with(layers)
        .try_init()?;

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}
