use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while loading or validating configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("control plane URL is not set")]
    MissingEndpoint,

    #[error("control plane URL `{0}` points at a local placeholder, not a public endpoint")]
    PlaceholderEndpoint(String),

    #[error("invalid control plane URL `{url}`: {message}")]
    InvalidEndpoint { url: String, message: String },

    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

/// Main configuration for the LapCompare client
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Control plane endpoint configuration
    #[serde(default)]
    pub control_plane: ControlPlaneConfig,
    /// Job polling configuration
    #[serde(default)]
    pub poll: PollConfig,
    /// Lap auto-detection configuration
    #[serde(default)]
    pub detect: DetectConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// Control plane endpoint configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ControlPlaneConfig {
    /// Base URL of the control plane (e.g. https://lapcompare.example.com)
    #[serde(default)]
    pub url: String,
    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Accept loopback endpoints, for development against a locally running
    /// control plane
    #[serde(default)]
    pub allow_local: bool,
}

/// Job polling configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PollConfig {
    /// Interval between status polls in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub interval_ms: u64,
    /// Maximum total wait for a job before giving up, in seconds.
    /// Unset means wait indefinitely.
    #[serde(default)]
    pub max_wait_secs: Option<u64>,
}

/// Lap auto-detection configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DetectConfig {
    /// Minimum plausible lap length in seconds
    #[serde(default = "default_min_lap_s")]
    pub min_lap_s: f64,
    /// Maximum plausible lap length in seconds
    #[serde(default = "default_max_lap_s")]
    pub max_lap_s: f64,
    /// Number of candidate laps to request from the service
    #[serde(default = "default_top_k")]
    pub top_k: u32,
}

// Default value functions
fn default_service_name() -> String {
    "lapcompare-client".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_poll_interval_ms() -> u64 {
    1500
}

fn default_min_lap_s() -> f64 {
    20.0
}

fn default_max_lap_s() -> f64 {
    300.0
}

fn default_top_k() -> u32 {
    6
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> Result<Self, ConfigError> {
        let config = config::Config::builder()
            // Start with default values
            .set_default("service.name", "lapcompare-client")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9090)?
            // Add config file if present
            .add_source(config::File::with_name("config/client").required(false))
            .add_source(config::File::with_name("/etc/lapcompare/client").required(false))
            // Override with environment variables
            // LAPCOMPARE__CONTROL_PLANE__URL -> control_plane.url
            .add_source(
                config::Environment::with_prefix("LAPCOMPARE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = config.try_deserialize()?;
        Ok(config)
    }

    /// Validate the configuration, in particular the control plane endpoint.
    /// Called once at startup so a missing or placeholder endpoint is surfaced
    /// immediately instead of on the first failing call.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.control_plane.validate()
    }

    /// Get the per-request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.control_plane.request_timeout_secs)
    }

    /// Get the poll interval as Duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll.interval_ms)
    }

    /// Get the maximum poll wait as Duration, if configured
    pub fn max_poll_wait(&self) -> Option<Duration> {
        self.poll.max_wait_secs.map(Duration::from_secs)
    }
}

impl ControlPlaneConfig {
    /// Check that the endpoint is set and not an obviously-local placeholder
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.url.trim();
        if url.is_empty() {
            return Err(ConfigError::MissingEndpoint);
        }

        let parsed =
            reqwest::Url::parse(url).map_err(|e| ConfigError::InvalidEndpoint {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        match parsed.host_str() {
            None => {
                return Err(ConfigError::InvalidEndpoint {
                    url: url.to_string(),
                    message: "URL has no host".to_string(),
                })
            }
            Some(host) => {
                if is_placeholder_host(host) && !self.allow_local {
                    return Err(ConfigError::PlaceholderEndpoint(url.to_string()));
                }
            }
        }

        Ok(())
    }

    /// Base URL without a trailing slash, ready for path concatenation
    pub fn base_url(&self) -> String {
        self.url.trim().trim_end_matches('/').to_string()
    }
}

/// Hosts that mean the endpoint was never configured for real use
fn is_placeholder_host(host: &str) -> bool {
    host.eq_ignore_ascii_case("localhost")
        || host == "0.0.0.0"
        || host == "::1"
        || host == "[::1]"
        || host.starts_with("127.")
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            request_timeout_secs: default_request_timeout_secs(),
            allow_local: false,
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_poll_interval_ms(),
            max_wait_secs: None,
        }
    }
}

impl Default for DetectConfig {
    fn default() -> Self {
        Self {
            min_lap_s: default_min_lap_s(),
            max_lap_s: default_max_lap_s(),
            top_k: default_top_k(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(url: &str) -> ControlPlaneConfig {
        ControlPlaneConfig {
            url: url.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.poll.interval_ms, 1500);
        assert_eq!(config.poll.max_wait_secs, None);
        assert_eq!(config.detect.min_lap_s, 20.0);
        assert_eq!(config.detect.max_lap_s, 300.0);
        assert_eq!(config.detect.top_k, 6);
    }

    #[test]
    fn test_missing_endpoint_rejected() {
        let result = endpoint("").validate();
        assert!(matches!(result, Err(ConfigError::MissingEndpoint)));

        let result = endpoint("   ").validate();
        assert!(matches!(result, Err(ConfigError::MissingEndpoint)));
    }

    #[test]
    fn test_placeholder_endpoint_rejected() {
        for url in [
            "http://localhost:8000",
            "http://127.0.0.1:8000",
            "http://0.0.0.0:8000",
            "http://[::1]:8000",
        ] {
            let result = endpoint(url).validate();
            assert!(
                matches!(result, Err(ConfigError::PlaceholderEndpoint(_))),
                "expected {url} to be rejected"
            );
        }
    }

    #[test]
    fn test_allow_local_admits_loopback_for_development() {
        let config = ControlPlaneConfig {
            url: "http://127.0.0.1:8000".to_string(),
            allow_local: true,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_public_endpoint_accepted() {
        assert!(endpoint("https://lapcompare.example.com").validate().is_ok());
        assert!(endpoint("https://lapcompare.example.com/").validate().is_ok());
    }

    #[test]
    fn test_malformed_endpoint_rejected() {
        let result = endpoint("not a url").validate();
        assert!(matches!(result, Err(ConfigError::InvalidEndpoint { .. })));
    }

    #[test]
    fn test_base_url_strips_trailing_slash() {
        assert_eq!(
            endpoint("https://lapcompare.example.com/").base_url(),
            "https://lapcompare.example.com"
        );
    }
}
