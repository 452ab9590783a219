//! Configuration management for the MCP server.
//!
//! This module provides a centralized configuration structure that can be
//! populated from environment variables, a `.env` file, or defaults.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::middleware::RateLimitConfig;
use super::pool::PoolConfig;
use super::resilience::{CircuitBreakerConfig, RetryConfig};

/// Main configuration structure for the MCP server.
///
/// This struct contains all configurable aspects of the server, organized
/// by concern for clarity and maintainability.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server identification and metadata.
    pub server: ServerConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,

    /// Middleware chain configuration.
    pub middleware: MiddlewareConfig,

    /// Metrics and tracing.
    pub monitoring: MonitoringConfig,

    /// Timeout, retry and circuit breaker settings for tool handlers.
    pub resilience: ResilienceConfig,

    /// Defaults for resource pools.
    pub pools: PoolsConfig,
}

/// Server identification configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The name of the server as reported to clients.
    pub name: String,

    /// The version of the server.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "toolrack-mcp-server".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "trace").
    pub level: String,

    /// Whether to include timestamps in log output.
    pub with_timestamps: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            with_timestamps: true,
        }
    }
}

/// Which middleware units are installed, and how they are tuned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiddlewareConfig {
    pub rate_limit_enabled: bool,
    pub rate_limit_max_requests: usize,
    pub rate_limit_window_seconds: f64,
    /// Limit each tool separately instead of all calls together.
    pub rate_limit_per_tool: bool,
    pub validation_enabled: bool,
}

impl Default for MiddlewareConfig {
    fn default() -> Self {
        Self {
            rate_limit_enabled: false,
            rate_limit_max_requests: 100,
            rate_limit_window_seconds: 60.0,
            rate_limit_per_tool: false,
            validation_enabled: true,
        }
    }
}

impl MiddlewareConfig {
    pub fn rate_limit(&self) -> RateLimitConfig {
        RateLimitConfig {
            max_requests: self.rate_limit_max_requests,
            window: secs(self.rate_limit_window_seconds, Duration::from_secs(60)),
            per_tool: self.rate_limit_per_tool,
        }
    }
}

/// Metrics and tracing switches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    pub metrics_enabled: bool,
    pub tracing_enabled: bool,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: true,
            tracing_enabled: true,
        }
    }
}

/// Handler resilience settings. Durations are in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceConfig {
    /// Per-attempt handler timeout.
    pub operation_timeout: f64,
    pub retry_max_attempts: u32,
    pub retry_initial_delay: f64,
    pub retry_max_delay: f64,
    pub circuit_failure_threshold: u32,
    pub circuit_recovery_timeout: f64,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            operation_timeout: 30.0,
            retry_max_attempts: 3,
            retry_initial_delay: 1.0,
            retry_max_delay: 60.0,
            circuit_failure_threshold: 5,
            circuit_recovery_timeout: 60.0,
        }
    }
}

impl ResilienceConfig {
    pub fn operation_timeout(&self) -> Duration {
        secs(self.operation_timeout, Duration::from_secs(30))
    }

    pub fn retry(&self) -> RetryConfig {
        RetryConfig::new(
            self.retry_max_attempts,
            secs(self.retry_initial_delay, Duration::from_secs(1)),
            secs(self.retry_max_delay, Duration::from_secs(60)),
        )
        .with_jitter(true)
    }

    pub fn circuit_breaker(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig::new(
            self.circuit_failure_threshold,
            secs(self.circuit_recovery_timeout, Duration::from_secs(60)),
        )
    }
}

/// Defaults applied to resource pools created by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolsConfig {
    pub max_size: usize,
    pub min_size: usize,
    /// Seconds to wait for a free resource.
    pub acquire_timeout: f64,
}

impl Default for PoolsConfig {
    fn default() -> Self {
        Self {
            max_size: 10,
            min_size: 1,
            acquire_timeout: 30.0,
        }
    }
}

impl PoolsConfig {
    pub fn pool(&self) -> PoolConfig {
        PoolConfig::new(
            self.min_size,
            self.max_size,
            secs(self.acquire_timeout, Duration::from_secs(30)),
        )
    }
}

impl Config {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from environment variables.
    ///
    /// Environment variables are expected to be prefixed with `MCP_`.
    /// For example: `MCP_SERVER_NAME`, `MCP_LOG_LEVEL`. Values that fail to
    /// parse are ignored and the default is kept.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let mut config = Self::default();

        if let Ok(name) = std::env::var("MCP_SERVER_NAME") {
            config.server.name = name;
        }

        if let Ok(level) = std::env::var("MCP_LOG_LEVEL") {
            config.logging.level = level;
        }

        let middleware = &mut config.middleware;
        env_flag("MCP_RATE_LIMIT_ENABLED", &mut middleware.rate_limit_enabled);
        env_parse("MCP_RATE_LIMIT_MAX_REQUESTS", &mut middleware.rate_limit_max_requests);
        env_parse("MCP_RATE_LIMIT_WINDOW_SECONDS", &mut middleware.rate_limit_window_seconds);
        env_flag("MCP_RATE_LIMIT_PER_TOOL", &mut middleware.rate_limit_per_tool);
        env_flag("MCP_VALIDATION_ENABLED", &mut middleware.validation_enabled);

        env_flag("MCP_METRICS_ENABLED", &mut config.monitoring.metrics_enabled);
        env_flag("MCP_TRACING_ENABLED", &mut config.monitoring.tracing_enabled);

        let resilience = &mut config.resilience;
        env_parse("MCP_OPERATION_TIMEOUT", &mut resilience.operation_timeout);
        env_parse("MCP_RETRY_MAX_ATTEMPTS", &mut resilience.retry_max_attempts);
        env_parse("MCP_RETRY_INITIAL_DELAY", &mut resilience.retry_initial_delay);
        env_parse("MCP_RETRY_MAX_DELAY", &mut resilience.retry_max_delay);
        env_parse("MCP_CIRCUIT_FAILURE_THRESHOLD", &mut resilience.circuit_failure_threshold);
        env_parse("MCP_CIRCUIT_RECOVERY_TIMEOUT", &mut resilience.circuit_recovery_timeout);

        env_parse("MCP_POOL_MAX_SIZE", &mut config.pools.max_size);
        env_parse("MCP_POOL_MIN_SIZE", &mut config.pools.min_size);
        env_parse("MCP_POOL_ACQUIRE_TIMEOUT", &mut config.pools.acquire_timeout);

        config
    }
}

/// Overwrite `target` with the parsed value of `var`, if set and valid.
fn env_parse<T: FromStr>(var: &str, target: &mut T) {
    let Ok(raw) = std::env::var(var) else {
        return;
    };
    match raw.trim().parse() {
        Ok(value) => *target = value,
        Err(_) => warn!("Ignoring invalid value for {}: {:?}", var, raw),
    }
}

/// Boolean flags accept `true/1/yes/on`; anything else is false.
fn env_flag(var: &str, target: &mut bool) {
    if let Ok(raw) = std::env::var(var) {
        *target = matches!(raw.trim().to_lowercase().as_str(), "true" | "1" | "yes" | "on");
    }
}

/// Seconds to a `Duration`, falling back for negative or non-finite input.
fn secs(value: f64, fallback: Duration) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Mutex to ensure env var tests run serially
    static ENV_TEST_LOCK: Mutex<()> = Mutex::new(());

    const VARS: &[&str] = &[
        "MCP_SERVER_NAME",
        "MCP_RATE_LIMIT_ENABLED",
        "MCP_RATE_LIMIT_MAX_REQUESTS",
        "MCP_RATE_LIMIT_WINDOW_SECONDS",
        "MCP_RETRY_MAX_ATTEMPTS",
        "MCP_OPERATION_TIMEOUT",
        "MCP_TRACING_ENABLED",
    ];

    fn clear_vars() {
        for var in VARS {
            unsafe {
                std::env::remove_var(var);
            }
        }
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(!config.middleware.rate_limit_enabled);
        assert!(config.middleware.validation_enabled);
        assert!(config.monitoring.metrics_enabled);
        assert_eq!(config.resilience.operation_timeout(), Duration::from_secs(30));
        assert_eq!(config.resilience.retry().max_attempts, 3);
        assert_eq!(config.resilience.circuit_breaker().failure_threshold, 5);
        assert_eq!(config.pools.pool().max_size, 10);
    }

    #[test]
    fn test_from_env_overrides() {
        let _lock = ENV_TEST_LOCK.lock().unwrap();
        clear_vars();
        unsafe {
            std::env::set_var("MCP_SERVER_NAME", "test-server");
            std::env::set_var("MCP_RATE_LIMIT_ENABLED", "yes");
            std::env::set_var("MCP_RATE_LIMIT_MAX_REQUESTS", "5");
            std::env::set_var("MCP_RATE_LIMIT_WINDOW_SECONDS", "2.5");
            std::env::set_var("MCP_TRACING_ENABLED", "off");
        }

        let config = Config::from_env();
        assert_eq!(config.server.name, "test-server");
        assert!(config.middleware.rate_limit_enabled);
        let rate_limit = config.middleware.rate_limit();
        assert_eq!(rate_limit.max_requests, 5);
        assert_eq!(rate_limit.window, Duration::from_millis(2500));
        assert!(!config.monitoring.tracing_enabled);

        clear_vars();
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let _lock = ENV_TEST_LOCK.lock().unwrap();
        clear_vars();
        unsafe {
            std::env::set_var("MCP_RETRY_MAX_ATTEMPTS", "many");
            std::env::set_var("MCP_OPERATION_TIMEOUT", "-4");
        }

        let config = Config::from_env();
        assert_eq!(config.resilience.retry_max_attempts, 3);
        // Parses, but is not a valid duration.
        assert_eq!(config.resilience.operation_timeout(), Duration::from_secs(30));

        clear_vars();
    }
}
