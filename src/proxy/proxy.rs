// ────────────────────────────────
// src/proxy/proxy.rs
// Entry point for one frontend: admission, dispatch, response rendering
// ────────────────────────────────

use hyper::{Body, Request, Response, StatusCode};
use std::sync::Arc;
use tracing::{debug, warn, Instrument};

use super::frontend::Frontend;
use crate::metrics::{MetricsCollector, Timer};
use crate::transfer::Transport;
use crate::worker::WorkerPool;

pub struct Proxy {
    frontend: Arc<Frontend>,
    workers: Arc<WorkerPool>,
    transport: Arc<dyn Transport>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl Proxy {
    pub fn new(
        frontend: Arc<Frontend>,
        workers: Arc<WorkerPool>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            frontend,
            workers,
            transport,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn frontend(&self) -> &Arc<Frontend> {
        &self.frontend
    }

    /// Always produces a response; failures are rendered, never raised.
    pub async fn handle(&self, req: Request<Body>) -> Response<Body> {
        let request_id = uuid::Uuid::new_v4();
        let span = tracing::debug_span!(
            "request",
            id = %request_id,
            frontend = %self.frontend.name,
            method = %req.method(),
            path = %req.uri().path(),
        );

        let timer = Timer::new();
        let response = match self.route(req).instrument(span).await {
            Ok(response) => response,
            Err(err) => err.into(),
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_request(&self.frontend.name, response.status().as_u16(), timer.elapsed());
            metrics.update_idle_workers(self.workers.idle_count());
        }
        response
    }

    async fn route(&self, req: Request<Body>) -> Result<Response<Body>, ProxyError> {
        if !self.frontend.matches(req.uri().path()) {
            return Err(ProxyError::RouteNotFound);
        }

        let worker = self.workers.acquire().ok_or(ProxyError::WorkersExhausted)?;
        if let Some(metrics) = &self.metrics {
            metrics.update_idle_workers(self.workers.idle_count());
        }

        let receiver = worker.dispatch(req, self.frontend.clone(), self.transport.clone());
        let envelope = receiver.await.map_err(|_| ProxyError::DispatchLost)?;

        debug!(
            worker = worker.id(),
            backend = envelope.backend_id(),
            status = envelope.status.as_u16(),
            upgraded = envelope.upgraded,
            "request dispatched"
        );

        if let (Some(metrics), Some(backend)) = (&self.metrics, &envelope.backend) {
            metrics.update_backend_score(&self.frontend.name, &backend.id, backend.score());
        }

        Ok(envelope.into_response())
    }
}

/// Refusals made before or around dispatch.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("no route matches the request path")]
    RouteNotFound,

    #[error("all workers are busy")]
    WorkersExhausted,

    #[error("dispatch task ended without a result")]
    DispatchLost,
}

impl From<ProxyError> for Response<Body> {
    fn from(err: ProxyError) -> Self {
        let (status, message) = match err {
            ProxyError::RouteNotFound => (StatusCode::NOT_FOUND, "Not Found"),
            ProxyError::WorkersExhausted => (StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable"),
            ProxyError::DispatchLost => {
                warn!("dispatch task ended without a result");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Error")
            }
        };

        let mut response = Response::new(Body::from(message));
        *response.status_mut() = status;
        response
    }
}
