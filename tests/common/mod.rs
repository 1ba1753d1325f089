//! Shared helpers for the integration tests.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use sds_load_balancer::proxy::{Backend, Frontend, Proxy};
use sds_load_balancer::server::{RequestHandler, ServerBuilder};
use sds_load_balancer::transfer::{HyperTransport, TransferSettings};
use sds_load_balancer::worker::WorkerPool;

pub fn frontend(addresses: &[String]) -> Arc<Frontend> {
    let backends = addresses
        .iter()
        .map(|a| Backend::parse(a).unwrap())
        .collect();
    Arc::new(Frontend::new("test", "/", backends))
}

/// Starts a balancer for one frontend on an ephemeral port.
pub async fn start_balancer(
    frontend: Arc<Frontend>,
    workers: Arc<WorkerPool>,
) -> (SocketAddr, watch::Sender<bool>) {
    let (addr, shutdown, _server) = serve_balancer(frontend, workers).await;
    (addr, shutdown)
}

/// Like `start_balancer`, also handing back the serving task.
pub async fn serve_balancer(
    frontend: Arc<Frontend>,
    workers: Arc<WorkerPool>,
) -> (SocketAddr, watch::Sender<bool>, JoinHandle<anyhow::Result<()>>) {
    let transport = Arc::new(HyperTransport::new(TransferSettings::default()));
    let proxy = Arc::new(Proxy::new(frontend, workers, transport));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let server = ServerBuilder::new("127.0.0.1:0")
        .with_handler(RequestHandler::new(proxy))
        .with_shutdown(shutdown_rx)
        .bind()
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    let handle = tokio::spawn(server.serve());

    (addr, shutdown_tx, handle)
}

/// An address nothing listens on.
pub async fn closed_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr.to_string()
}

/// Reads up to and including the blank line ending an HTTP head.
pub async fn read_head<R: AsyncRead + Unpin>(reader: &mut R) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        let n = reader.read(&mut byte).await.unwrap();
        if n == 0 {
            break;
        }
        head.push(byte[0]);
    }
    String::from_utf8(head).unwrap()
}

pub struct WsBackend {
    pub addr: SocketAddr,
    /// The handshake as the backend received it.
    pub handshake: oneshot::Receiver<String>,
    /// Fires when the backend reads EOF from the balancer.
    pub closed: oneshot::Receiver<()>,
}

/// Accepts one connection, answers the upgrade with 101 and echoes every
/// byte back upper-cased.
pub async fn start_ws_backend() -> WsBackend {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (handshake_tx, handshake) = oneshot::channel();
    let (closed_tx, closed) = oneshot::channel();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let head = read_head(&mut socket).await;
        let _ = handshake_tx.send(head);

        socket
            .write_all(
                b"HTTP/1.1 101 Switching Protocols\r\n\
                  Connection: Upgrade\r\n\
                  Upgrade: websocket\r\n\
                  Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n\r\n",
            )
            .await
            .unwrap();

        let mut buf = [0u8; 1024];
        loop {
            match socket.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let upper = buf[..n].to_ascii_uppercase();
                    if socket.write_all(&upper).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = closed_tx.send(());
    });

    WsBackend {
        addr,
        handshake,
        closed,
    }
}
