//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gate.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::admission::responder::DEFAULT_OVERLOAD_MESSAGE;

/// Root configuration for the admission gate.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct GateConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Concurrency and queueing limits.
    pub admission: AdmissionConfig,

    /// The protected upstream that admitted requests are forwarded to.
    pub upstream: UpstreamConfig,

    /// Admin API settings.
    pub admin: AdminConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Admission limits.
///
/// `max_running` and `max_in_queue` are fixed once the gate starts;
/// `max_wait_in_queue_ms` and `overload` are picked up on reload.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Requests allowed to run the upstream call concurrently. Must be > 0.
    pub max_running: usize,

    /// Requests allowed to wait for a running slot. Zero disables queueing.
    pub max_in_queue: usize,

    /// Longest wait in the queue, in milliseconds. Zero waits indefinitely.
    pub max_wait_in_queue_ms: u64,

    /// Response sent to rejected requests.
    pub overload: OverloadConfig,
}

impl AdmissionConfig {
    pub fn max_wait_in_queue(&self) -> Duration {
        Duration::from_millis(self.max_wait_in_queue_ms)
    }
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_running: 64,
            max_in_queue: 128,
            max_wait_in_queue_ms: 0,
            overload: OverloadConfig::default(),
        }
    }
}

/// Overload response configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct OverloadConfig {
    /// HTTP status code.
    pub status: u16,

    /// Response body.
    pub message: String,

    /// Optional `Retry-After` header value in seconds.
    pub retry_after_secs: Option<u64>,
}

impl Default for OverloadConfig {
    fn default() -> Self {
        Self {
            status: 503,
            message: DEFAULT_OVERLOAD_MESSAGE.to_string(),
            retry_after_secs: None,
        }
    }
}

/// Upstream configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Upstream address (e.g., "127.0.0.1:3000").
    pub address: String,

    /// Time allowed for one upstream call, in seconds. Queue time is not
    /// counted.
    pub request_timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:3000".to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API.
    pub enabled: bool,

    /// Admin API bind address.
    pub bind_address: String,

    /// API key for authentication (Bearer token).
    pub api_key: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: "127.0.0.1:8081".to_string(),
            api_key: String::new(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error) or a full filter directive.
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let config: GateConfig = toml::from_str("").unwrap();
        assert_eq!(config, GateConfig::default());
        assert_eq!(config.admission.max_wait_in_queue(), Duration::ZERO);
        assert_eq!(config.admission.overload.status, 503);
    }

    #[test]
    fn parses_admission_section() {
        let config: GateConfig = toml::from_str(
            r#"
            [admission]
            max_running = 2
            max_in_queue = 3
            max_wait_in_queue_ms = 1500

            [admission.overload]
            status = 429
            retry_after_secs = 2

            [observability]
            log_format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.admission.max_running, 2);
        assert_eq!(config.admission.max_in_queue, 3);
        assert_eq!(config.admission.max_wait_in_queue(), Duration::from_millis(1500));
        assert_eq!(config.admission.overload.status, 429);
        assert_eq!(config.admission.overload.message, DEFAULT_OVERLOAD_MESSAGE);
        assert_eq!(config.admission.overload.retry_after_secs, Some(2));
        assert_eq!(config.observability.log_format, LogFormat::Json);
    }
}
