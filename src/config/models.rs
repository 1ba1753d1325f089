// src/config/models.rs
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use url::Url;

pub const DEFAULT_RPC_PORT: u16 = 42586;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("at least one frontend must be configured")]
    NoFrontends,

    #[error("duplicate frontend name: {0}")]
    DuplicateFrontend(String),

    #[error("frontends {first} and {second} both listen on {addr}")]
    DuplicateListener {
        first: String,
        second: String,
        addr: String,
    },

    #[error("frontend {frontend}: route {route:?} must start with '/'")]
    InvalidRoute { frontend: String, route: String },

    #[error("frontend {frontend}: invalid backend address {address:?}: {reason}")]
    InvalidBackend {
        frontend: String,
        address: String,
        reason: String,
    },

    #[error("{0} must be greater than zero")]
    ZeroTimeout(&'static str),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    pub frontends: Vec<FrontendConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_rpc_host")]
    pub rpc_host: String,
    #[serde(default = "default_rpc_port")]
    pub rpc_port: u16,
    /// Upper bound on concurrently busy workers. 0 grows the pool on demand.
    #[serde(default)]
    pub max_workers: usize,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default)]
    pub tunnel_idle_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_listen_host")]
    pub host: String,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FrontendConfig {
    pub name: String,
    #[serde(default = "default_listen_host")]
    pub host: String,
    pub port: u16,
    #[serde(default = "default_route")]
    pub route: String,
    #[serde(default)]
    pub backends: Vec<BackendConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    pub address: String,
}

fn default_rpc_host() -> String {
    "127.0.0.1".to_string()
}

fn default_rpc_port() -> u16 {
    DEFAULT_RPC_PORT
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_listen_host() -> String {
    "0.0.0.0".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

fn default_route() -> String {
    "/".to_string()
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            rpc_host: default_rpc_host(),
            rpc_port: default_rpc_port(),
            max_workers: 0,
            request_timeout_secs: None,
            connect_timeout_secs: default_connect_timeout(),
            tunnel_idle_timeout_secs: None,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_listen_host(),
            port: default_metrics_port(),
            path: default_metrics_path(),
        }
    }
}

impl GeneralConfig {
    pub fn rpc_address(&self) -> String {
        format!("{}:{}", self.rpc_host, self.rpc_port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    pub fn tunnel_idle_timeout(&self) -> Option<Duration> {
        self.tunnel_idle_timeout_secs.map(Duration::from_secs)
    }
}

impl FrontendConfig {
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl BackendConfig {
    /// Parses the address, accepting bare `host:port` as plain HTTP.
    pub fn url(&self) -> Result<Url, url::ParseError> {
        parse_backend_address(&self.address)
    }
}

pub fn parse_backend_address(address: &str) -> Result<Url, url::ParseError> {
    let address = address.trim();
    if address.contains("://") {
        Url::parse(address)
    } else {
        Url::parse(&format!("http://{}", address))
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frontends.is_empty() {
            return Err(ConfigError::NoFrontends);
        }

        if self.general.connect_timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout("general.connect_timeout_secs"));
        }
        if self.general.request_timeout_secs == Some(0) {
            return Err(ConfigError::ZeroTimeout("general.request_timeout_secs"));
        }
        if self.general.tunnel_idle_timeout_secs == Some(0) {
            return Err(ConfigError::ZeroTimeout("general.tunnel_idle_timeout_secs"));
        }

        let mut names = HashSet::new();
        let mut listeners: Vec<(String, &str)> = Vec::new();

        for frontend in &self.frontends {
            if !names.insert(frontend.name.as_str()) {
                return Err(ConfigError::DuplicateFrontend(frontend.name.clone()));
            }

            let addr = frontend.listen_address();
            if let Some((_, first)) = listeners.iter().find(|(a, _)| *a == addr) {
                return Err(ConfigError::DuplicateListener {
                    first: first.to_string(),
                    second: frontend.name.clone(),
                    addr,
                });
            }
            listeners.push((addr, frontend.name.as_str()));

            if !frontend.route.starts_with('/') {
                return Err(ConfigError::InvalidRoute {
                    frontend: frontend.name.clone(),
                    route: frontend.route.clone(),
                });
            }

            for backend in &frontend.backends {
                let url = backend.url().map_err(|e| ConfigError::InvalidBackend {
                    frontend: frontend.name.clone(),
                    address: backend.address.clone(),
                    reason: e.to_string(),
                })?;
                if url.host_str().is_none() {
                    return Err(ConfigError::InvalidBackend {
                        frontend: frontend.name.clone(),
                        address: backend.address.clone(),
                        reason: "missing host".to_string(),
                    });
                }
            }
        }

        Ok(())
    }
}
