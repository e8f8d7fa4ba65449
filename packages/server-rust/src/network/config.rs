//! Configuration types for the opsguard server.
//!
//! [`ServerConfig`] is the command-line / environment surface. The other
//! structs are the per-module views derived from it.

use std::time::Duration;

use clap::Parser;

use crate::observability::analytics::DEFAULT_ANALYTICS_CAPACITY;
use crate::observability::lifecycle::DEFAULT_LIFECYCLE_CAPACITY;
use crate::observability::LogFormat;

/// Invalid combinations of configuration values.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("host must not be empty")]
    EmptyHost,
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
}

/// Process configuration, read from flags or `OPSGUARD_*` environment variables.
#[derive(Debug, Clone, Parser)]
#[command(name = "opsguard-server", version, about)]
pub struct ServerConfig {
    /// Bind address for the HTTP server.
    #[arg(long, env = "OPSGUARD_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on. 0 means OS-assigned.
    #[arg(long, env = "OPSGUARD_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Overall budget for the shutdown sequence.
    #[arg(long, env = "OPSGUARD_SHUTDOWN_TIMEOUT_SECS", default_value_t = 30)]
    pub shutdown_timeout_secs: u64,

    /// Maximum time a single HTTP request may take.
    #[arg(long, env = "OPSGUARD_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    pub request_timeout_secs: u64,

    /// Lifecycle events retained before eviction.
    #[arg(long, env = "OPSGUARD_LIFECYCLE_CAPACITY", default_value_t = DEFAULT_LIFECYCLE_CAPACITY)]
    pub lifecycle_capacity: usize,

    /// Error records retained by the analytics engine.
    #[arg(long, env = "OPSGUARD_ANALYTICS_CAPACITY", default_value_t = DEFAULT_ANALYTICS_CAPACITY)]
    pub analytics_capacity: usize,

    #[arg(long, env = "OPSGUARD_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl ServerConfig {
    /// Checks values clap cannot express as constraints.
    ///
    /// # Errors
    ///
    /// Returns the first invalid field found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        if self.shutdown_timeout_secs == 0 {
            return Err(ConfigError::Zero {
                field: "shutdown_timeout_secs",
            });
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Zero {
                field: "request_timeout_secs",
            });
        }
        if self.lifecycle_capacity == 0 {
            return Err(ConfigError::Zero {
                field: "lifecycle_capacity",
            });
        }
        if self.analytics_capacity == 0 {
            return Err(ConfigError::Zero {
                field: "analytics_capacity",
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    #[must_use]
    pub fn network(&self) -> NetworkConfig {
        NetworkConfig {
            host: self.host.clone(),
            port: self.port,
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }

    #[must_use]
    pub fn diagnostics(&self) -> DiagnosticsConfig {
        DiagnosticsConfig {
            lifecycle_capacity: self.lifecycle_capacity,
            analytics_capacity: self.analytics_capacity,
        }
    }
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Bind address for the server.
    pub host: String,
    /// Port to listen on. 0 means OS-assigned.
    pub port: u16,
    /// Maximum time to wait for a request to complete.
    pub request_timeout: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 0,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Sizing of the in-memory diagnostic buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiagnosticsConfig {
    pub lifecycle_capacity: usize,
    pub analytics_capacity: usize,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            lifecycle_capacity: DEFAULT_LIFECYCLE_CAPACITY,
            analytics_capacity: DEFAULT_ANALYTICS_CAPACITY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> ServerConfig {
        let mut argv = vec!["opsguard-server"];
        argv.extend_from_slice(args);
        ServerConfig::try_parse_from(argv).unwrap()
    }

    #[test]
    fn network_config_defaults() {
        let config = NetworkConfig::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 0);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn diagnostics_config_defaults() {
        let config = DiagnosticsConfig::default();
        assert_eq!(config.lifecycle_capacity, 10_000);
        assert_eq!(config.analytics_capacity, 10_000);
    }

    #[test]
    fn flags_override_defaults() {
        let config = parse(&[
            "--host",
            "127.0.0.1",
            "--port",
            "9000",
            "--shutdown-timeout-secs",
            "5",
            "--log-format",
            "json",
        ]);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 9000);
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(5));
        assert_eq!(config.log_format, LogFormat::Json);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn derived_views_follow_server_config() {
        let config = parse(&["--port", "0", "--request-timeout-secs", "7", "--lifecycle-capacity", "12"]);
        let network = config.network();
        assert_eq!(network.port, 0);
        assert_eq!(network.request_timeout, Duration::from_secs(7));
        assert_eq!(config.diagnostics().lifecycle_capacity, 12);
    }

    #[test]
    fn validate_rejects_zero_timeout() {
        let config = parse(&["--shutdown-timeout-secs", "0"]);
        assert_eq!(
            config.validate(),
            Err(ConfigError::Zero {
                field: "shutdown_timeout_secs"
            })
        );
    }

    #[test]
    fn validate_rejects_empty_host() {
        let config = parse(&["--host", " "]);
        assert_eq!(config.validate(), Err(ConfigError::EmptyHost));
    }

    #[test]
    fn invalid_log_format_is_rejected() {
        assert!(ServerConfig::try_parse_from(["opsguard-server", "--log-format", "xml"]).is_err());
    }
}
