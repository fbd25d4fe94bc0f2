use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use tower::Layer;

use crate::admission::controller::AdmissionController;
use crate::admission::responder::OverloadResponder;
use crate::admission::service::MaxConnections;

/// Applies [`MaxConnections`] to a service.
///
/// Every service produced by one layer shares the same pools, so a layer
/// applied to a whole `Router` bounds the router as a unit rather than each
/// route separately.
#[derive(Debug, Clone)]
pub struct MaxConnectionsLayer {
    controller: Arc<AdmissionController>,
}

impl MaxConnectionsLayer {
    pub fn new(max_running: NonZeroUsize, max_in_queue: usize) -> Self {
        Self::from_controller(Arc::new(AdmissionController::new(max_running, max_in_queue)))
    }

    pub fn from_controller(controller: Arc<AdmissionController>) -> Self {
        Self { controller }
    }

    /// See [`AdmissionController::set_max_wait_in_queue`].
    pub fn max_wait_in_queue(self, max_wait: Duration) -> Self {
        self.controller.set_max_wait_in_queue(max_wait);
        self
    }

    /// See [`AdmissionController::set_overload_responder`]. A config reload
    /// that changes the overload section replaces this responder.
    pub fn overload_responder<R: OverloadResponder>(self, responder: R) -> Self {
        self.controller.set_overload_responder(responder);
        self
    }

    pub fn controller(&self) -> &Arc<AdmissionController> {
        &self.controller
    }
}

impl<S> Layer<S> for MaxConnectionsLayer {
    type Service = MaxConnections<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MaxConnections::with_controller(inner, Arc::clone(&self.controller))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request, http::StatusCode, routing::get, Router};
    use tower::ServiceExt;

    #[tokio::test]
    async fn routes_behind_one_layer_share_pools() {
        let layer = MaxConnectionsLayer::new(NonZeroUsize::new(1).unwrap(), 0)
            .max_wait_in_queue(Duration::from_millis(100));
        let ctrl = layer.controller().clone();
        let held = ctrl.running().try_acquire().unwrap();

        let app = Router::new()
            .route("/a", get(|| async { "a" }))
            .route("/b", get(|| async { "b" }))
            .layer(layer);

        for path in ["/a", "/b"] {
            let req = Request::get(path).body(Body::empty()).unwrap();
            let res = app.clone().oneshot(req).await.unwrap();
            assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
        }

        drop(held);
        let req = Request::get("/b").body(Body::empty()).unwrap();
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(ctrl.stats().rejected_overloaded, 2);
        assert_eq!(ctrl.stats().max_wait_in_queue_ms, 100);
    }
}
