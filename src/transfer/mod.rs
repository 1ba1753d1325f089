// src/transfer/mod.rs
mod http;
mod tunnel;
mod upgrade;

pub use http::{build_client, forward, HttpClient};
pub use tunnel::{open as open_tunnel, splice, TunnelSettings, CHUNK_SIZE};
pub use upgrade::is_websocket_upgrade;

use async_trait::async_trait;
use hyper::{Body, Request};
use std::sync::Arc;
use std::time::Duration;

use crate::config::GeneralConfig;
use crate::metrics::MetricsCollector;
use crate::proxy::Backend;
use crate::worker::Envelope;

/// Moves a request's data to the backend a worker picked.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Buffered request/response round trip.
    async fn forward(&self, backend: Arc<Backend>, req: Request<Body>) -> Envelope;

    /// WebSocket handshake followed by a raw byte tunnel.
    async fn tunnel(&self, backend: Arc<Backend>, req: Request<Body>) -> Envelope;
}

#[derive(Debug, Clone)]
pub struct TransferSettings {
    pub connect_timeout: Duration,
    pub request_timeout: Option<Duration>,
    pub tunnel_idle_timeout: Option<Duration>,
}

impl TransferSettings {
    pub fn from_config(general: &GeneralConfig) -> Self {
        Self {
            connect_timeout: general.connect_timeout(),
            request_timeout: general.request_timeout(),
            tunnel_idle_timeout: general.tunnel_idle_timeout(),
        }
    }

    fn tunnel(&self) -> TunnelSettings {
        TunnelSettings {
            connect_timeout: self.connect_timeout,
            handshake_timeout: self.request_timeout.unwrap_or(self.connect_timeout),
            idle_timeout: self.tunnel_idle_timeout,
        }
    }
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self::from_config(&GeneralConfig::default())
    }
}

/// The production transport: pooled hyper client for plain requests and a
/// dedicated connection per tunnel.
pub struct HyperTransport {
    client: HttpClient,
    settings: TransferSettings,
    metrics: Option<Arc<MetricsCollector>>,
}

impl HyperTransport {
    pub fn new(settings: TransferSettings) -> Self {
        Self {
            client: build_client(settings.connect_timeout),
            settings,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

#[async_trait]
impl Transport for HyperTransport {
    async fn forward(&self, backend: Arc<Backend>, req: Request<Body>) -> Envelope {
        http::forward(&self.client, backend, req, self.settings.request_timeout).await
    }

    async fn tunnel(&self, backend: Arc<Backend>, req: Request<Body>) -> Envelope {
        tunnel::open(backend, req, &self.settings.tunnel(), self.metrics.clone()).await
    }
}
