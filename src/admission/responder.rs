//! Overload responses.
//!
//! Invoked for `Rejected-Immediate` and `Rejected-Timeout` outcomes only.
//! By the time a responder runs, the request no longer holds any permit.

use axum::{
    http::{header, request::Parts, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};

use crate::admission::controller::Rejection;
use crate::config::OverloadConfig;

/// Message used by [`StaticResponder::default`].
pub const DEFAULT_OVERLOAD_MESSAGE: &str = "503 service is overloaded, please try again later";

/// Produces the terminal response for a rejected request.
///
/// Implementations must be cheap and must not block: they run inline on the
/// request task. Closures of the form `Fn(&Rejection, &Parts) -> Response`
/// implement this trait.
pub trait OverloadResponder: Send + Sync + 'static {
    fn respond(&self, rejection: &Rejection, request: &Parts) -> Response;
}

impl<F> OverloadResponder for F
where
    F: Fn(&Rejection, &Parts) -> Response + Send + Sync + 'static,
{
    fn respond(&self, rejection: &Rejection, request: &Parts) -> Response {
        self(rejection, request)
    }
}

/// Fixed status and message, with an optional `Retry-After` header.
#[derive(Debug, Clone)]
pub struct StaticResponder {
    status: StatusCode,
    message: String,
    retry_after: Option<HeaderValue>,
}

impl StaticResponder {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            retry_after: None,
        }
    }

    /// Advertise a `Retry-After` delay in seconds.
    pub fn with_retry_after(mut self, secs: u64) -> Self {
        self.retry_after = Some(HeaderValue::from(secs));
        self
    }

    /// Build from the `[admission.overload]` config section.
    ///
    /// The status code is checked by config validation; an out-of-range
    /// value falls back to 503.
    pub fn from_config(config: &OverloadConfig) -> Self {
        let status =
            StatusCode::from_u16(config.status).unwrap_or(StatusCode::SERVICE_UNAVAILABLE);
        let responder = Self::new(status, config.message.clone());
        match config.retry_after_secs {
            Some(secs) => responder.with_retry_after(secs),
            None => responder,
        }
    }
}

impl Default for StaticResponder {
    fn default() -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, DEFAULT_OVERLOAD_MESSAGE)
    }
}

impl OverloadResponder for StaticResponder {
    fn respond(&self, _rejection: &Rejection, _request: &Parts) -> Response {
        let mut response = (self.status, self.message.clone()).into_response();
        if let Some(retry_after) = &self.retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, retry_after.clone());
        }
        response
    }
}
