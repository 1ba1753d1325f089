// src/rpc/client.rs
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tabled::{Table, Tabled};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use super::protocol::{
    BackendStatus, RpcError, RpcRequest, RpcResponse, StatusResponse, GET_BACKENDS, GET_IDLE,
};

pub struct StatusClient {
    lines: Lines<BufReader<OwnedReadHalf>>,
    write: OwnedWriteHalf,
    next_id: u64,
}

impl StatusClient {
    pub async fn connect(addr: &str) -> Result<Self, RpcError> {
        let stream = TcpStream::connect(addr).await?;
        let (read, write) = stream.into_split();

        Ok(Self {
            lines: BufReader::new(read).lines(),
            write,
            next_id: 0,
        })
    }

    pub async fn call<T: DeserializeOwned>(&mut self, method: &str, params: Value) -> Result<T, RpcError> {
        let request = RpcRequest {
            method: method.to_string(),
            params,
            id: json!(self.next_id),
        };
        self.next_id += 1;

        let mut encoded = serde_json::to_vec(&request)?;
        encoded.push(b'\n');
        self.write.write_all(&encoded).await?;

        let line = self.lines.next_line().await?.ok_or(RpcError::Closed)?;
        let response: RpcResponse = serde_json::from_str(&line)?;

        if let Some(error) = response.error {
            return Err(RpcError::Remote(error));
        }
        let result = response.result.ok_or(RpcError::EmptyResponse)?;
        Ok(serde_json::from_value(result)?)
    }

    pub async fn get_idle(&mut self) -> Result<StatusResponse, RpcError> {
        self.call(GET_IDLE, json!([0])).await
    }

    pub async fn get_backends(&mut self) -> Result<Vec<BackendStatus>, RpcError> {
        self.call(GET_BACKENDS, json!([])).await
    }
}

#[derive(Debug, Clone, Tabled)]
struct IdleRow {
    #[tabled(rename = "Workers Idle")]
    idle_worker_count: usize,
}

pub fn idle_table(status: &StatusResponse) -> String {
    Table::new([IdleRow {
        idle_worker_count: status.idle_worker_count,
    }])
    .to_string()
}

pub fn backends_table(backends: &[BackendStatus]) -> String {
    Table::new(backends).to_string()
}
