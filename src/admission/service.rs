//! Tower service wrapping a delegate handler with admission control.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::{
    body::Body,
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
};
use futures_util::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tower::Service;

use crate::admission::controller::{Admission, AdmissionController};

/// Non-standard status for a caller that disconnected before a response.
/// Nothing reads it; it only exists because a service future must resolve
/// to something.
pub const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Runs the inner service only while holding a running permit.
///
/// Clones share one [`AdmissionController`]. A [`CancellationToken`] found
/// in the request extensions is treated as the caller's cancellation
/// signal while queued; dropping the response future has the same effect.
#[derive(Debug, Clone)]
pub struct MaxConnections<S> {
    inner: S,
    controller: Arc<AdmissionController>,
}

impl<S> MaxConnections<S> {
    pub fn new(max_running: NonZeroUsize, max_in_queue: usize, inner: S) -> Self {
        Self::with_controller(inner, Arc::new(AdmissionController::new(max_running, max_in_queue)))
    }

    pub fn with_controller(inner: S, controller: Arc<AdmissionController>) -> Self {
        Self { inner, controller }
    }

    pub fn controller(&self) -> &Arc<AdmissionController> {
        &self.controller
    }
}

impl<S, ReqBody> Service<Request<ReqBody>> for MaxConnections<S>
where
    S: Service<Request<ReqBody>> + Clone + Send + 'static,
    S::Response: IntoResponse,
    S::Future: Send + 'static,
    ReqBody: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Response, S::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        // Keep the instance that was driven to readiness.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let controller = Arc::clone(&self.controller);

        Box::pin(async move {
            let token = req.extensions().get::<CancellationToken>().cloned();
            let cancelled = async move {
                match token {
                    Some(token) => token.cancelled().await,
                    None => std::future::pending().await,
                }
            };

            match controller.admit(cancelled).await {
                Admission::Admitted(admitted) => {
                    let response = inner.call(req).await;
                    drop(admitted);
                    Ok(response?.into_response())
                }
                Admission::Rejected(rejection) => {
                    let (parts, _body) = req.into_parts();
                    Ok(controller.overload_responder().respond(&rejection, &parts))
                }
                Admission::Cancelled { .. } => {
                    let mut response = Response::new(Body::empty());
                    *response.status_mut() = StatusCode::from_u16(CLIENT_CLOSED_REQUEST)
                        .unwrap_or(StatusCode::SERVICE_UNAVAILABLE);
                    Ok(response)
                }
            }
        })
    }
}
