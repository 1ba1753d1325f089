// src/app.rs
// Wires configuration into frontends, the worker pool and the listeners.
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::metrics::{start_metrics_server, MetricsCollector, MetricsRegistry};
use crate::proxy::{Frontend, Proxy};
use crate::rpc::StatusService;
use crate::server::{listener::bind_tcp, RequestHandler, ServerBuilder};
use crate::transfer::{HyperTransport, TransferSettings, Transport};
use crate::worker::WorkerPool;

pub struct Balancer {
    config: Config,
    frontends: Vec<Arc<Frontend>>,
    workers: Arc<WorkerPool>,
    transport: Arc<dyn Transport>,
    metrics: Option<MetricsRegistry>,
}

impl Balancer {
    pub fn new(config: Config) -> Result<Self> {
        let frontends = config
            .frontends
            .iter()
            .map(|fc| {
                Frontend::from_config(fc)
                    .map(Arc::new)
                    .with_context(|| format!("Invalid backend in frontend {}", fc.name))
            })
            .collect::<Result<Vec<_>>>()?;

        for frontend in &frontends {
            if frontend.backends().is_empty() {
                warn!(frontend = %frontend.name, "frontend has no backends; every request will get 503");
            }
        }

        let metrics = if config.metrics.enabled {
            Some(MetricsRegistry::new()?)
        } else {
            None
        };

        let mut transport = HyperTransport::new(TransferSettings::from_config(&config.general));
        if let Some(registry) = &metrics {
            transport = transport.with_metrics(registry.collector());
        }

        let workers = Arc::new(WorkerPool::new(config.general.max_workers));

        Ok(Self {
            config,
            frontends,
            workers,
            transport: Arc::new(transport),
            metrics,
        })
    }

    pub fn frontends(&self) -> &[Arc<Frontend>] {
        &self.frontends
    }

    pub fn workers(&self) -> &Arc<WorkerPool> {
        &self.workers
    }

    pub fn status(&self) -> StatusService {
        StatusService::new(self.workers.clone(), self.frontends.clone())
    }

    /// Starts every listener and runs until `shutdown` flips to `true`.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let collector: Option<Arc<MetricsCollector>> =
            self.metrics.as_ref().map(MetricsRegistry::collector);
        if let Some(metrics) = &collector {
            metrics.update_idle_workers(self.workers.idle_count());
        }

        let mut servers = Vec::with_capacity(self.frontends.len());
        for (frontend, fc) in self.frontends.iter().zip(&self.config.frontends) {
            let mut proxy = Proxy::new(frontend.clone(), self.workers.clone(), self.transport.clone());
            if let Some(metrics) = &collector {
                proxy = proxy.with_metrics(metrics.clone());
            }

            let server = ServerBuilder::new(fc.listen_address())
                .with_handler(RequestHandler::new(Arc::new(proxy)))
                .with_shutdown(shutdown.clone())
                .bind()
                .await
                .with_context(|| format!("Failed to start frontend {}", frontend.name))?;

            info!(
                frontend = %frontend.name,
                route = %frontend.route,
                backends = frontend.backends().len(),
                "frontend ready"
            );
            servers.push(tokio::spawn(server.serve()));
        }

        let rpc_address = self.config.general.rpc_address();
        let rpc_listener = bind_tcp(&rpc_address)
            .await
            .context("Failed to start status RPC")?;
        tokio::spawn(self.status().serve(rpc_listener, shutdown.clone()));

        if let Some(registry) = self.metrics {
            let metrics = &self.config.metrics;
            let addr: SocketAddr = format!("{}:{}", metrics.host, metrics.port)
                .parse()
                .context("Invalid metrics listen address")?;
            start_metrics_server(addr, registry, metrics.path.clone(), shutdown.clone()).await?;
        }

        for server in servers {
            match server.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => error!("Frontend server failed: {:#}", err),
                Err(err) => error!("Frontend server task failed: {}", err),
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(json: &str) -> Config {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn builds_one_frontend_per_entry() {
        let balancer = Balancer::new(config(
            r#"{
                "general": { "max_workers": 3 },
                "frontends": [
                    { "name": "api", "port": 8080,
                      "backends": [ { "address": "127.0.0.1:9000" }, { "address": "127.0.0.1:9001" } ] },
                    { "name": "idle", "port": 8081, "backends": [] }
                ]
            }"#,
        ))
        .unwrap();

        assert_eq!(balancer.frontends().len(), 2);
        assert_eq!(balancer.frontends()[0].backends().len(), 2);
        assert!(balancer.frontends()[1].backends().is_empty());
        assert_eq!(balancer.workers().idle_count(), 3);

        let backends = balancer.status().backends();
        assert_eq!(backends.len(), 2);
        assert!(backends.iter().all(|b| b.frontend == "api" && b.score == 0));
    }

    #[test]
    fn bad_backend_address_names_the_frontend() {
        let err = Balancer::new(config(
            r#"{ "frontends": [ { "name": "broken", "port": 8080,
                 "backends": [ { "address": "http://[::1" } ] } ] }"#,
        ))
        .err()
        .unwrap();
        assert!(format!("{:#}", err).contains("broken"));
    }
}
