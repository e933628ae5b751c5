/// Configuration management for the processway engine
///
/// Handles server configuration, the database connection and engine runtime parameters.
/// Every value can be overridden from the environment for k8s/container deployment.

use crate::history::HistoryLevel;
use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Engine behaviour (history, events, job executor)
    pub engine: EngineConfig,
    /// Logging filter
    pub logging: LoggingConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite connection URL (e.g., "sqlite://data/processway.db" or "sqlite::memory:")
    pub url: String,
    /// Pool size for file databases (in-memory databases always use one connection)
    pub max_connections: u32,
}

impl DatabaseConfig {
    pub fn in_memory() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
        }
    }

    pub fn is_in_memory(&self) -> bool {
        self.url.contains(":memory:") || self.url.contains("mode=memory")
    }
}

/// Engine-wide behaviour shared by every command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Amount of audit data recorded by the history manager
    pub history_level: HistoryLevel,
    /// Initial state of the event dispatcher gate
    pub events_enabled: bool,
    /// Async job executor settings
    pub jobs: JobExecutorConfig,
}

/// Async job executor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobExecutorConfig {
    /// Whether the background acquisition loop runs
    pub enabled: bool,
    /// Delay between acquisition cycles
    pub acquire_interval_ms: u64,
    /// Upper bound of jobs locked per acquisition
    pub max_jobs_per_acquisition: usize,
    /// How long an acquired job stays locked to this node
    pub lock_time_ms: i64,
    /// Retries given to new jobs
    pub default_retries: i32,
    /// Delay before a failed job becomes due again
    pub retry_wait_ms: i64,
    /// Lock owner written on acquired jobs
    pub lock_owner: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// tracing EnvFilter directive (e.g., "info", "processway=debug")
    pub filter: String,
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for k8s/container deployment
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: std::env::var("PROCESSWAY_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env_or("PROCESSWAY_PORT", 3004),
            },
            database: DatabaseConfig {
                url: std::env::var("PROCESSWAY_DATABASE_URL")
                    .unwrap_or_else(|_| "sqlite://data/processway.db".to_string()),
                max_connections: env_or("PROCESSWAY_DB_MAX_CONNECTIONS", 5),
            },
            engine: EngineConfig::default(),
            logging: LoggingConfig {
                filter: std::env::var("PROCESSWAY_LOG").unwrap_or_else(|_| "info".to_string()),
            },
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            history_level: env_or("PROCESSWAY_HISTORY_LEVEL", HistoryLevel::Audit),
            events_enabled: env_or("PROCESSWAY_EVENTS_ENABLED", true),
            jobs: JobExecutorConfig::default(),
        }
    }
}

impl Default for JobExecutorConfig {
    fn default() -> Self {
        Self {
            enabled: env_or("PROCESSWAY_JOB_EXECUTOR_ENABLED", true),
            acquire_interval_ms: env_or("PROCESSWAY_JOB_ACQUIRE_INTERVAL_MS", 5_000),
            max_jobs_per_acquisition: env_or("PROCESSWAY_JOB_MAX_PER_ACQUISITION", 10),
            lock_time_ms: env_or("PROCESSWAY_JOB_LOCK_TIME_MS", 300_000),
            default_retries: env_or("PROCESSWAY_JOB_RETRIES", 3),
            retry_wait_ms: env_or("PROCESSWAY_JOB_RETRY_WAIT_MS", 10_000),
            lock_owner: std::env::var("PROCESSWAY_JOB_LOCK_OWNER")
                .unwrap_or_else(|_| uuid::Uuid::new_v4().to_string()),
        }
    }
}
