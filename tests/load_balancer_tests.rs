// tests/load_balancer_tests.rs
mod common;

use hyper::{Body, Client, Request, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::timeout;

use sds_load_balancer::rpc::{RpcError, StatusClient, StatusService};
use sds_load_balancer::worker::WorkerPool;

use common::{
    closed_address, frontend, read_head, serve_balancer, start_balancer, start_ws_backend,
};

async fn get(addr: std::net::SocketAddr, path: &str) -> (StatusCode, String) {
    let uri = format!("http://{}{}", addr, path);
    let response = Client::new().get(uri.parse().unwrap()).await.unwrap();
    let status = response.status();
    let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

#[tokio::test]
async fn test_least_score_distribution() {
    let mut b0 = mockito::Server::new_async().await;
    let mut b1 = mockito::Server::new_async().await;
    let _m0 = b0
        .mock("GET", "/who").with_body("b0").expect(2).create_async().await;
    let _m1 = b1
        .mock("GET", "/who").with_body("b1").expect(1).create_async().await;

    let frontend = frontend(&[b0.url(), b1.url()]);
    let (addr, _shutdown) = start_balancer(frontend.clone(), Arc::new(WorkerPool::unbounded())).await;

    // ties go to the first backend, then the lower score wins
    assert_eq!(get(addr, "/who").await, (StatusCode::OK, "b0".to_string()));
    assert_eq!(get(addr, "/who").await, (StatusCode::OK, "b1".to_string()));
    assert_eq!(get(addr, "/who").await, (StatusCode::OK, "b0".to_string()));

    assert_eq!(frontend.backends()[0].score(), 2);
    assert_eq!(frontend.backends()[1].score(), 1);
}

#[tokio::test]
async fn test_unreachable_backend_returns_408() {
    let frontend = frontend(&[closed_address().await]);
    let (addr, _shutdown) = start_balancer(frontend.clone(), Arc::new(WorkerPool::unbounded())).await;

    let (status, body) = get(addr, "/").await;
    assert_eq!(status, StatusCode::REQUEST_TIMEOUT);
    assert_eq!(body, "No backend available");
    assert_eq!(frontend.backends()[0].score(), 1);
}

#[tokio::test]
async fn test_empty_frontend_returns_503_for_plain_and_upgrade() {
    let (addr, _shutdown) = start_balancer(frontend(&[]), Arc::new(WorkerPool::unbounded())).await;

    assert_eq!(
        get(addr, "/").await,
        (StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable".to_string())
    );

    let request = Request::get(format!("http://{}/ws", addr))
        .header("Connection", "Upgrade")
        .header("Upgrade", "websocket")
        .body(Body::empty())
        .unwrap();
    let response = Client::new().request(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_websocket_tunnel_round_trip() {
    let mut backend = start_ws_backend().await;
    let workers = Arc::new(WorkerPool::unbounded());
    let (addr, _shutdown) =
        start_balancer(frontend(&[backend.addr.to_string()]), workers.clone()).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    client
        .write_all(
            b"GET /chat?room=1 HTTP/1.1\r\n\
              Host: balancer.test\r\n\
              Connection: Upgrade\r\n\
              Upgrade: websocket\r\n\
              Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
              Sec-WebSocket-Version: 13\r\n\r\n",
        )
        .await
        .unwrap();

    let head = timeout(Duration::from_secs(2), read_head(&mut client))
        .await
        .expect("no handshake response");
    assert!(head.starts_with("HTTP/1.1 101"), "{head}");
    assert!(head.to_ascii_lowercase().contains("sec-websocket-accept"));

    let forwarded = (&mut backend.handshake).await.unwrap();
    assert!(forwarded.starts_with("GET /chat?room=1 HTTP/1.1\r\n"), "{forwarded}");
    assert!(forwarded.to_ascii_lowercase().contains("sec-websocket-key: dghlihnhbxbszsbub25jzq=="));

    client.write_all(b"ping").await.unwrap();
    let mut echoed = [0u8; 4];
    timeout(Duration::from_secs(2), client.read_exact(&mut echoed))
        .await
        .expect("no echo")
        .unwrap();
    assert_eq!(&echoed, b"PING");

    // the tunnel does not keep a worker busy
    assert_eq!(workers.idle_count(), workers.len());

    drop(client);
    timeout(Duration::from_secs(2), backend.closed)
        .await
        .expect("backend connection stayed open")
        .unwrap();
}

#[tokio::test]
async fn test_status_rpc_round_trip() {
    let workers = Arc::new(WorkerPool::new(4));
    let _busy = workers.acquire().unwrap();
    let frontend = frontend(&["127.0.0.1:9000".to_string(), "127.0.0.1:9001".to_string()]);
    frontend.reserve().await.unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = tokio::spawn(StatusService::new(workers, vec![frontend]).serve(listener, shutdown_rx));

    let mut client = StatusClient::connect(&addr.to_string()).await.unwrap();
    assert_eq!(client.get_idle().await.unwrap().idle_worker_count, 3);

    let backends = client.get_backends().await.unwrap();
    let scores: Vec<u64> = backends.iter().map(|b| b.score).collect();
    assert_eq!(scores, [1, 0]);

    let err = client
        .call::<serde_json::Value>("ServerStatus.Nope", serde_json::json!([]))
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::Remote(_)));

    shutdown_tx.send(true).unwrap();
    timeout(Duration::from_secs(1), server)
        .await
        .expect("status server ignored shutdown")
        .unwrap();
}

#[tokio::test]
async fn test_shutdown_lets_in_flight_requests_finish() {
    let backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend_addr = backend.local_addr().unwrap();
    let (accepted_tx, accepted) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        let (mut socket, _) = backend.accept().await.unwrap();
        read_head(&mut socket).await;
        let _ = accepted_tx.send(());
        tokio::time::sleep(Duration::from_millis(300)).await;
        socket
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 4\r\n\r\nslow")
            .await
            .unwrap();
    });

    let (addr, shutdown, server) = serve_balancer(
        frontend(&[backend_addr.to_string()]),
        Arc::new(WorkerPool::unbounded()),
    )
    .await;

    let request = tokio::spawn(get(addr, "/slow"));
    accepted.await.unwrap();
    shutdown.send(true).unwrap();

    assert_eq!(request.await.unwrap(), (StatusCode::OK, "slow".to_string()));
    timeout(Duration::from_secs(2), server)
        .await
        .expect("server did not finish draining")
        .unwrap()
        .unwrap();
    assert!(TcpStream::connect(addr).await.is_err());
}
