// ────────────────────────────────
// src/server/builder.rs
// ────────────────────────────────
use crate::server::listener::bind_tcp;
use anyhow::{Context, Result};
use hyper::{server::conn::Http, Body, Request, Response};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tower::Service;

/// Builder pattern so `main.rs` can inject a handler per frontend.
pub struct ServerBuilder<H>
where
    H: Service<Request<Body>, Response = Response<Body>> + Send + Clone + 'static,
    H::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    H::Future: Send + 'static,
{
    addr: String,
    handler: Option<H>,
    shutdown: Option<watch::Receiver<bool>>,
}

impl<H> ServerBuilder<H>
where
    H: Service<Request<Body>, Response = Response<Body>> + Send + Clone + 'static,
    H::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    H::Future: Send + 'static,
{
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            handler: None,
            shutdown: None,
        }
    }

    /// Inject your request handler (usually wraps `proxy::Proxy`).
    pub fn with_handler(mut self, handler: H) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Stop accepting once the receiver observes `true`.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Binds the listener without serving yet, so callers can learn the
    /// local address (useful with port 0).
    pub async fn bind(self) -> Result<BoundServer<H>> {
        let handler = self
            .handler
            .context("handler must be set via with_handler()")?;
        let listener = bind_tcp(&self.addr).await?;

        Ok(BoundServer {
            listener,
            handler,
            shutdown: self.shutdown,
        })
    }
}

pub struct BoundServer<H> {
    listener: TcpListener,
    handler: H,
    shutdown: Option<watch::Receiver<bool>>,
}

impl<H> BoundServer<H>
where
    H: Service<Request<Body>, Response = Response<Body>> + Send + Clone + 'static,
    H::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    H::Future: Send + 'static,
{
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts until shutdown, then waits for the open connections to
    /// finish their in-flight requests.
    pub async fn serve(self) -> Result<()> {
        let local = self.local_addr()?;
        tracing::info!("HTTP server listening on {}", local);

        let mut shutdown = self.shutdown;
        let mut connections = JoinSet::new();
        loop {
            let accepted = match shutdown.as_mut() {
                Some(rx) => tokio::select! {
                    accepted = self.listener.accept() => accepted,
                    _ = wait_for_shutdown(rx) => break,
                },
                None => self.listener.accept().await,
            };
            while connections.try_join_next().is_some() {}

            let (stream, peer) = match accepted {
                Ok(pair) => pair,
                Err(err) => {
                    tracing::warn!(%err, "accept failed");
                    continue;
                }
            };
            let svc = self.handler.clone();
            let mut stop = shutdown.clone();

            // One Tokio task per connection; upgrades let tunnels take the socket over.
            connections.spawn(async move {
                let conn = Http::new().serve_connection(stream, svc).with_upgrades();
                tokio::pin!(conn);

                let result = match stop.as_mut() {
                    Some(rx) => tokio::select! {
                        result = conn.as_mut() => result,
                        _ = wait_for_shutdown(rx) => {
                            conn.as_mut().graceful_shutdown();
                            conn.await
                        }
                    },
                    None => conn.await,
                };
                if let Err(err) = result {
                    tracing::debug!(%peer, %err, "connection error");
                }
            });
        }

        tracing::info!(
            open = connections.len(),
            "HTTP server on {} stopped accepting, draining connections",
            local
        );
        while connections.join_next().await.is_some() {}
        tracing::info!("HTTP server on {} stopped", local);
        Ok(())
    }
}

async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            // sender gone: nobody can ask us to stop any more
            std::future::pending::<()>().await;
        }
    }
}
