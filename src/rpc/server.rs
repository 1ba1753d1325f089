// src/rpc/server.rs
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::protocol::{
    BackendStatus, RpcError, RpcRequest, RpcResponse, StatusResponse, GET_BACKENDS, GET_IDLE,
};
use crate::proxy::Frontend;
use crate::worker::WorkerPool;

/// Longest request line a status session accepts, newline included.
pub const MAX_LINE_BYTES: u64 = 64 * 1024;

/// Answers status queries from live pool and backend state. Reads never
/// block dispatch beyond a backend's own score lock.
#[derive(Clone)]
pub struct StatusService {
    workers: Arc<WorkerPool>,
    frontends: Vec<Arc<Frontend>>,
}

impl StatusService {
    pub fn new(workers: Arc<WorkerPool>, frontends: Vec<Arc<Frontend>>) -> Self {
        Self { workers, frontends }
    }

    pub fn idle(&self) -> StatusResponse {
        StatusResponse {
            idle_worker_count: self.workers.idle_count(),
        }
    }

    pub fn backends(&self) -> Vec<BackendStatus> {
        self.frontends
            .iter()
            .flat_map(|frontend| {
                frontend.backends().iter().map(move |backend| BackendStatus {
                    frontend: frontend.name.clone(),
                    address: backend.url.to_string(),
                    score: backend.score(),
                })
            })
            .collect()
    }

    pub fn call(&self, request: RpcRequest) -> RpcResponse {
        let result = match request.method.as_str() {
            GET_IDLE => serde_json::to_value(self.idle()),
            GET_BACKENDS => serde_json::to_value(self.backends()),
            other => return RpcResponse::err(request.id, format!("unknown method {}", other)),
        };

        match result {
            Ok(value) => RpcResponse::ok(request.id, value),
            Err(err) => RpcResponse::err(request.id, err.to_string()),
        }
    }

    /// Handles one raw line; malformed input yields an error response.
    pub fn call_line(&self, line: &str) -> RpcResponse {
        match serde_json::from_str::<RpcRequest>(line) {
            Ok(request) => self.call(request),
            Err(err) => RpcResponse::err(Value::Null, format!("invalid request: {}", err)),
        }
    }

    pub async fn serve(self, listener: TcpListener, mut shutdown: watch::Receiver<bool>) {
        match listener.local_addr() {
            Ok(addr) => info!("Status RPC listening on {}", addr),
            Err(err) => warn!(%err, "status RPC listener has no local address"),
        }

        loop {
            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            };

            match accepted {
                Ok((stream, peer)) => {
                    let service = self.clone();
                    tokio::spawn(async move {
                        if let Err(err) = service.session(stream).await {
                            debug!(%peer, %err, "status session ended");
                        }
                    });
                }
                Err(err) => warn!(%err, "status RPC accept failed"),
            }
        }

        info!("Status RPC stopped");
    }

    async fn session(&self, stream: TcpStream) -> Result<(), RpcError> {
        let (read, mut write) = stream.into_split();
        let mut reader = BufReader::new(read);
        let mut line = Vec::new();

        loop {
            line.clear();
            let n = (&mut reader)
                .take(MAX_LINE_BYTES)
                .read_until(b'\n', &mut line)
                .await?;
            if n == 0 {
                return Ok(());
            }

            if !line.ends_with(b"\n") && n as u64 == MAX_LINE_BYTES {
                let response = RpcResponse::err(
                    Value::Null,
                    format!("invalid request: line exceeds {} bytes", MAX_LINE_BYTES),
                );
                reply(&mut write, &response).await?;
                // no way to find the next request boundary
                return Ok(());
            }

            let response = match std::str::from_utf8(&line) {
                Ok(text) if text.trim().is_empty() => continue,
                Ok(text) => self.call_line(text.trim_end()),
                Err(err) => RpcResponse::err(Value::Null, format!("invalid request: {}", err)),
            };
            reply(&mut write, &response).await?;
        }
    }
}

async fn reply(write: &mut OwnedWriteHalf, response: &RpcResponse) -> Result<(), RpcError> {
    let mut encoded = serde_json::to_vec(response)?;
    encoded.push(b'\n');
    write.write_all(&encoded).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::Backend;
    use serde_json::json;

    fn service() -> StatusService {
        let workers = Arc::new(WorkerPool::new(3));
        let frontend = Arc::new(Frontend::new(
            "api",
            "/",
            vec![
                Backend::parse("127.0.0.1:9000").unwrap(),
                Backend::parse("127.0.0.1:9001").unwrap(),
            ],
        ));
        frontend.backends()[1].increment_score();
        StatusService::new(workers, vec![frontend])
    }

    #[test]
    fn get_idle_counts_idle_workers() {
        let service = service();
        let busy = service.workers.acquire().unwrap();

        let response = service.call_line(r#"{"method":"ServerStatus.GetIdle","params":[0],"id":7}"#);
        assert_eq!(response.id, json!(7));
        assert_eq!(response.result, Some(json!({ "idle_worker_count": 2 })));
        assert!(response.error.is_none());

        busy.release();
        assert_eq!(service.idle().idle_worker_count, 3);
    }

    #[test]
    fn get_backends_reports_live_scores() {
        let response = service().call(RpcRequest {
            method: GET_BACKENDS.to_string(),
            params: Value::Null,
            id: json!(1),
        });
        let backends: Vec<BackendStatus> =
            serde_json::from_value(response.result.unwrap()).unwrap();

        assert_eq!(backends.len(), 2);
        assert_eq!(backends[0].frontend, "api");
        assert_eq!(backends[0].score, 0);
        assert_eq!(backends[1].score, 1);
    }

    #[test]
    fn unknown_method_and_garbage_are_errors() {
        let service = service();

        let response = service.call_line(r#"{"method":"ServerStatus.Reboot","id":"x"}"#);
        assert_eq!(response.id, json!("x"));
        assert_eq!(response.error.as_deref(), Some("unknown method ServerStatus.Reboot"));

        let response = service.call_line("not json");
        assert_eq!(response.id, Value::Null);
        assert!(response.error.unwrap().starts_with("invalid request"));
    }

    async fn start(service: StatusService) -> (std::net::SocketAddr, watch::Sender<bool>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(service.serve(listener, shutdown_rx));
        (addr, shutdown_tx)
    }

    #[tokio::test]
    async fn non_utf8_line_gets_an_error_and_the_session_survives() {
        let (addr, _shutdown) = start(service()).await;
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();

        write.write_all(b"\xff\xfe garbage\n").await.unwrap();
        write
            .write_all(b"{\"method\":\"ServerStatus.GetIdle\",\"params\":[0],\"id\":2}\n")
            .await
            .unwrap();

        let first: RpcResponse =
            serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(first.id, Value::Null);
        assert!(first.error.unwrap().starts_with("invalid request"));

        let second: RpcResponse =
            serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(second.id, json!(2));
        assert_eq!(second.result, Some(json!({ "idle_worker_count": 3 })));
    }

    #[tokio::test]
    async fn overlong_line_is_refused_and_closed() {
        let (addr, _shutdown) = start(service()).await;
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();

        write
            .write_all(&vec![b'a'; MAX_LINE_BYTES as usize])
            .await
            .unwrap();

        let reply: RpcResponse =
            serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(reply.id, Value::Null);
        assert!(reply.error.unwrap().contains("exceeds"));
        assert!(lines.next_line().await.unwrap().is_none());
    }
}
