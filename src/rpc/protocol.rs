// src/rpc/protocol.rs
// One JSON object per line in each direction.
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tabled::Tabled;

pub const GET_IDLE: &str = "ServerStatus.GetIdle";
pub const GET_BACKENDS: &str = "ServerStatus.GetBackends";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub id: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: Value,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl RpcResponse {
    pub fn ok(id: Value, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: Value, error: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub idle_worker_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Tabled)]
pub struct BackendStatus {
    #[tabled(rename = "Frontend")]
    pub frontend: String,
    #[tabled(rename = "Backend")]
    pub address: String,
    #[tabled(rename = "Score")]
    pub score: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed message: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("server closed the connection")]
    Closed,

    #[error("server error: {0}")]
    Remote(String),

    #[error("response carried neither a result nor an error")]
    EmptyResponse,
}
