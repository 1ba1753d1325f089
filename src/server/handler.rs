// src/server/handler.rs
use futures::future::BoxFuture;
use hyper::{Body, Request, Response};
use std::convert::Infallible;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::Service;

use crate::proxy::Proxy;

/// Per-connection service handed to hyper. Every request becomes a
/// response, so the error type is uninhabited.
#[derive(Clone)]
pub struct RequestHandler {
    proxy: Arc<Proxy>,
}

impl RequestHandler {
    pub fn new(proxy: Arc<Proxy>) -> Self {
        Self { proxy }
    }
}

impl Service<Request<Body>> for RequestHandler {
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Response<Body>, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
        // admission happens in the worker pool, not here
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let proxy = Arc::clone(&self.proxy);
        Box::pin(async move { Ok(proxy.handle(req).await) })
    }
}
