/// Configuration management for the Runway engine
///
/// Handles server binding, the run store location, queue worker pools and
/// outbound HTTP defaults. Every value can be overridden from the environment.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Task-execution and dependency-check queue configuration
    pub queue: QueueConfig,
    /// Outbound HTTP defaults for apiCall nodes
    pub http: HttpConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
}

/// Database configuration for workflows, runs, tasks and run logs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// sqlx connection URL (default: "sqlite://data/runway.db")
    pub url: String,
}

/// Worker pool and retry settings for both work queues
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub task_workers: usize,
    pub dependency_workers: usize,
    pub task_retry: RetryPolicy,
    pub dependency_retry: RetryPolicy,
}

/// Bounded exponential backoff applied to retryable job failures
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total delivery attempts, including the first one
    pub attempts: u32,
    /// Delay before the first retry; doubles on every further retry
    pub backoff_ms: u64,
}

impl RetryPolicy {
    /// Backoff to wait after the given (1-based) failed attempt.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.backoff_ms.saturating_mul(1u64 << exponent))
    }
}

/// Outbound HTTP configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Timeout applied when an apiCall node does not set `timeoutMs`
    pub default_timeout_ms: u64,
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for k8s/container deployment
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: std::env::var("RUNWAY_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env_or("RUNWAY_PORT", 3004),
            },
            database: DatabaseConfig {
                url: std::env::var("RUNWAY_DATABASE_URL")
                    .unwrap_or_else(|_| "sqlite://data/runway.db".to_string()),
            },
            queue: QueueConfig {
                task_workers: env_or("RUNWAY_TASK_WORKERS", 4),
                dependency_workers: env_or("RUNWAY_DEPENDENCY_WORKERS", 2),
                task_retry: RetryPolicy {
                    attempts: env_or("RUNWAY_TASK_ATTEMPTS", 3),
                    backoff_ms: env_or("RUNWAY_TASK_BACKOFF_MS", 2000),
                },
                dependency_retry: RetryPolicy {
                    attempts: env_or("RUNWAY_DEPENDENCY_ATTEMPTS", 2),
                    backoff_ms: env_or("RUNWAY_DEPENDENCY_BACKOFF_MS", 1000),
                },
            },
            http: HttpConfig {
                default_timeout_ms: env_or("RUNWAY_HTTP_TIMEOUT_MS", 10_000),
            },
        }
    }
}

/// Read and parse an environment variable, falling back on absence or parse failure
fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
