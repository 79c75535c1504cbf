//! Configuration module for Universal Proxy
//!
//! Supports configuration via:
//! - YAML/TOML/JSON config files
//! - Environment variables (with UPROXY_ prefix)
//!
//! The address-range and header policy tables are compile-time constants and
//! are deliberately not part of the configuration.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::fetch::{retry, Backoff, RetryPolicy, DEFAULT_MAX_REDIRECTS};
use crate::rewrite::DEFAULT_PROXY_BASE;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Largest inbound request body accepted, in bytes
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Metrics settings
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Upstream fetch and routing settings
    #[serde(default)]
    pub proxy: ProxySettings,
}

/// Upstream fetch and routing settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxySettings {
    /// Path prefix proxied URLs live under; also used when rewriting documents
    #[serde(default = "default_route_prefix")]
    pub route_prefix: String,

    /// Timeout for a single upstream attempt
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,

    /// Retries after the first failed attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry; doubles for each further retry
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Redirect hops followed before giving up
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable Prometheus metrics endpoint
    #[serde(default = "default_true")]
    pub enabled: bool,
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_route_prefix() -> String {
    DEFAULT_PROXY_BASE.to_string()
}

fn default_attempt_timeout_ms() -> u64 {
    retry::DEFAULT_ATTEMPT_TIMEOUT.as_millis() as u64
}

fn default_max_retries() -> u32 {
    retry::DEFAULT_MAX_RETRIES
}

fn default_backoff_base_ms() -> u64 {
    retry::DEFAULT_BACKOFF_BASE.as_millis() as u64
}

fn default_max_redirects() -> usize {
    DEFAULT_MAX_REDIRECTS
}

fn default_true() -> bool {
    true
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            route_prefix: default_route_prefix(),
            attempt_timeout_ms: default_attempt_timeout_ms(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            max_redirects: default_max_redirects(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            max_body_bytes: default_max_body_bytes(),
            metrics: MetricsConfig::default(),
            proxy: ProxySettings::default(),
        }
    }
}

impl ProxySettings {
    /// Retry policy for the fetch pipeline
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            attempt_timeout: Duration::from_millis(self.attempt_timeout_ms),
            backoff: Backoff::Exponential {
                base: Duration::from_millis(self.backoff_base_ms),
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from file and environment variables
    pub fn load() -> Result<Self> {
        // Try to load .env file if present
        let _ = dotenvy::dotenv();

        let config = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config/universal-proxy").required(false))
            .add_source(config::File::with_name("/etc/universal-proxy/config").required(false))
            // Override with environment variables (UPROXY_ prefix)
            .add_source(
                config::Environment::with_prefix("UPROXY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app_config.validate()?;

        Ok(app_config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.port == 0 {
            anyhow::bail!("Port cannot be 0");
        }

        if self.max_body_bytes == 0 {
            anyhow::bail!("Maximum body size cannot be 0");
        }

        let prefix = &self.proxy.route_prefix;
        if !prefix.starts_with('/') || !prefix.ends_with('/') {
            anyhow::bail!("Route prefix must start and end with '/': {}", prefix);
        }

        if self.proxy.attempt_timeout_ms == 0 {
            anyhow::bail!("Attempt timeout cannot be 0");
        }

        Ok(())
    }
}
