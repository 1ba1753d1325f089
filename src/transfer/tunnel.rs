// ────────────────────────────────
// src/transfer/tunnel.rs
// WebSocket pass-through: handshake with the backend over a fresh TCP
// connection, then splice raw bytes between client and backend.
// ────────────────────────────────
use hyper::client::conn;
use hyper::upgrade::OnUpgrade;
use hyper::{Body, Request, StatusCode, Version};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::metrics::MetricsCollector;
use crate::proxy::Backend;
use crate::worker::{DispatchError, Envelope};

/// Bytes moved per read in each direction.
pub const CHUNK_SIZE: usize = 40 * 1024;

#[derive(Debug, Clone)]
pub struct TunnelSettings {
    pub connect_timeout: Duration,
    /// Bounds the upgrade exchange once connected, including a declined reply's body.
    pub handshake_timeout: Duration,
    pub idle_timeout: Option<Duration>,
}

/// Performs the upgrade handshake with `backend` on behalf of `req`.
///
/// On `101 Switching Protocols` the splice is started on its own task and
/// an upgraded envelope carrying the backend's handshake head is returned;
/// the serving layer must send that head for the client side to upgrade.
/// Any other backend answer is buffered and returned as is.
pub async fn open(
    backend: Arc<Backend>,
    mut req: Request<Body>,
    settings: &TunnelSettings,
    metrics: Option<Arc<MetricsCollector>>,
) -> Envelope {
    let client_side = match req.extensions_mut().remove::<OnUpgrade>() {
        Some(upgrade) => upgrade,
        None => {
            warn!(backend = %backend.id, "client connection cannot be taken over");
            return DispatchError::HijackUnsupported.into_envelope(Some(backend));
        }
    };

    let stream = match timeout(settings.connect_timeout, TcpStream::connect(backend.authority())).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(err)) => return failed(backend, DispatchError::TunnelDial(err.to_string())),
        Err(_) => {
            return failed(
                backend,
                DispatchError::TunnelDial(format!("connect timed out after {:?}", settings.connect_timeout)),
            )
        }
    };

    let handshake = match handshake_request(req) {
        Ok(handshake) => handshake,
        Err(err) => return failed(backend, err),
    };

    let exchange = async {
        let (mut sender, connection) = conn::handshake(stream)
            .await
            .map_err(|e| DispatchError::TunnelWrite(e.to_string()))?;
        let backend_id = backend.id.clone();
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                debug!(backend = %backend_id, %err, "backend handshake connection failed");
            }
        });

        sender
            .send_request(handshake)
            .await
            .map_err(|e| DispatchError::TunnelWrite(e.to_string()))
    };

    let limit = settings.handshake_timeout;
    let mut response = match timeout(limit, exchange).await {
        Ok(Ok(response)) => response,
        Ok(Err(err)) => return failed(backend, err),
        Err(_) => {
            return failed(
                backend,
                DispatchError::TunnelWrite(format!("no handshake reply within {:?}", limit)),
            )
        }
    };

    if response.status() != StatusCode::SWITCHING_PROTOCOLS {
        debug!(backend = %backend.id, status = %response.status(), "backend declined the upgrade");
        let (parts, body) = response.into_parts();
        let body = match timeout(limit, hyper::body::to_bytes(body)).await {
            Ok(Ok(body)) => body,
            Ok(Err(err)) => {
                return Envelope::reply(
                    backend,
                    StatusCode::INTERNAL_SERVER_ERROR,
                    parts.headers,
                    err.to_string().into(),
                )
            }
            Err(_) => {
                return failed(
                    backend,
                    DispatchError::TunnelWrite(format!("declined upgrade body not read within {:?}", limit)),
                )
            }
        };
        return Envelope::reply(backend, parts.status, parts.headers, body);
    }

    let backend_side = hyper::upgrade::on(&mut response);
    let (parts, _) = response.into_parts();

    tokio::spawn(run(
        client_side,
        backend_side,
        backend.clone(),
        settings.idle_timeout,
        metrics,
    ));

    Envelope::upgraded(backend, parts.status, parts.headers)
}

fn failed(backend: Arc<Backend>, err: DispatchError) -> Envelope {
    warn!(backend = %backend.id, %err, "tunnel setup failed");
    err.into_envelope(Some(backend))
}

/// The client's upgrade request, re-targeted to origin form, headers intact.
fn handshake_request(req: Request<Body>) -> Result<Request<Body>, DispatchError> {
    let (parts, _) = req.into_parts();
    let target = parts
        .uri
        .path_and_query()
        .map(|p| p.as_str())
        .unwrap_or("/");

    let mut handshake = Request::builder()
        .method(parts.method)
        .uri(target)
        .version(Version::HTTP_11)
        .body(Body::empty())
        .map_err(|e| DispatchError::TunnelWrite(e.to_string()))?;
    *handshake.headers_mut() = parts.headers;
    Ok(handshake)
}

async fn run(
    client_side: OnUpgrade,
    backend_side: OnUpgrade,
    backend: Arc<Backend>,
    idle_timeout: Option<Duration>,
    metrics: Option<Arc<MetricsCollector>>,
) {
    let (client, upstream) = match tokio::try_join!(client_side, backend_side) {
        Ok(pair) => pair,
        Err(err) => {
            warn!(backend = %backend.id, %err, "connection upgrade did not complete");
            return;
        }
    };

    if let Some(metrics) = &metrics {
        metrics.active_tunnels.inc();
    }
    debug!(backend = %backend.id, "tunnel established");

    let (sent, received) = splice(client, upstream, idle_timeout).await;

    if let Some(metrics) = &metrics {
        metrics.active_tunnels.dec();
    }
    debug!(backend = %backend.id, sent, received, "tunnel closed");
}

/// Copies bytes both ways until either side stops, then closes both.
///
/// Returns `(client → backend, backend → client)` byte counts. Only returns
/// once both directions have finished.
pub async fn splice<C, B>(client: C, backend: B, idle_timeout: Option<Duration>) -> (u64, u64)
where
    C: AsyncRead + AsyncWrite,
    B: AsyncRead + AsyncWrite,
{
    let (client_read, client_write) = tokio::io::split(client);
    let (backend_read, backend_write) = tokio::io::split(backend);

    let (closed, _) = watch::channel(false);
    let upstream = pump(client_read, backend_write, idle_timeout, &closed, closed.subscribe());
    let downstream = pump(backend_read, client_write, idle_timeout, &closed, closed.subscribe());

    tokio::join!(upstream, downstream)
}

async fn pump<R, W>(
    mut src: R,
    mut dst: W,
    idle_timeout: Option<Duration>,
    closed: &watch::Sender<bool>,
    mut peer_closed: watch::Receiver<bool>,
) -> u64
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut copied = 0u64;

    loop {
        let read = tokio::select! {
            read = read_chunk(&mut src, &mut buf, idle_timeout) => read,
            _ = peer_closed.changed() => break,
        };

        let n = match read {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) => {
                trace!(%err, "tunnel read stopped");
                break;
            }
        };

        if let Err(err) = write_chunk(&mut dst, &buf[..n]).await {
            trace!(%err, "tunnel write stopped");
            break;
        }
        copied += n as u64;
    }

    let _ = dst.shutdown().await;
    closed.send_replace(true);
    copied
}

async fn read_chunk<R>(src: &mut R, buf: &mut [u8], idle_timeout: Option<Duration>) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    match idle_timeout {
        Some(limit) => match timeout(limit, src.read(buf)).await {
            Ok(read) => read,
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "tunnel idle")),
        },
        None => src.read(buf).await,
    }
}

async fn write_chunk<W>(dst: &mut W, chunk: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    dst.write_all(chunk).await?;
    dst.flush().await
}
