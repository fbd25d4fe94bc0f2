//! Configuration validation.
//!
//! Serde handles syntax; this checks values. All errors are collected so a
//! bad file is reported in one pass.

use std::net::SocketAddr;
use std::str::FromStr;

use axum::http::uri::Authority;
use axum::http::StatusCode;

use crate::admission::pool::MAX_CAPACITY;
use crate::config::schema::GateConfig;

/// A single semantic problem in a config file.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("admission.max_running must be greater than zero")]
    ZeroMaxRunning,

    #[error("{field} = {value} exceeds the largest pool capacity ({max})", max = MAX_CAPACITY)]
    CapacityTooLarge { field: &'static str, value: usize },

    #[error("{field}: invalid socket address {value:?}")]
    InvalidAddress { field: &'static str, value: String },

    #[error("upstream.address: invalid host:port authority {0:?}")]
    InvalidUpstream(String),

    #[error("admission.overload.status {0} is not a valid HTTP status code")]
    InvalidOverloadStatus(u16),

    #[error("upstream.request_timeout_secs must be greater than zero")]
    ZeroUpstreamTimeout,

    #[error("admin.api_key must be set when the admin API is enabled")]
    MissingAdminKey,
}

/// Validate a parsed config, returning every problem found.
pub fn validate_config(config: &GateConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.admission.max_running == 0 {
        errors.push(ValidationError::ZeroMaxRunning);
    }

    for (field, value) in [
        ("admission.max_running", config.admission.max_running),
        ("admission.max_in_queue", config.admission.max_in_queue),
    ] {
        if value > MAX_CAPACITY {
            errors.push(ValidationError::CapacityTooLarge { field, value });
        }
    }

    if StatusCode::from_u16(config.admission.overload.status).is_err() {
        errors.push(ValidationError::InvalidOverloadStatus(
            config.admission.overload.status,
        ));
    }

    if config.upstream.request_timeout_secs == 0 {
        errors.push(ValidationError::ZeroUpstreamTimeout);
    }

    check_address(&mut errors, "listener.bind_address", &config.listener.bind_address);
    if Authority::from_str(&config.upstream.address).is_err() {
        errors.push(ValidationError::InvalidUpstream(
            config.upstream.address.clone(),
        ));
    }

    if config.admin.enabled {
        check_address(&mut errors, "admin.bind_address", &config.admin.bind_address);
        if config.admin.api_key.is_empty() {
            errors.push(ValidationError::MissingAdminKey);
        }
    }

    if config.observability.metrics_enabled {
        check_address(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field,
            value: value.to_string(),
        });
    }
}
