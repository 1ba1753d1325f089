// src/transfer/http.rs
// Buffered request/response forwarding to a single backend.
use hyper::body::Bytes;
use hyper::client::HttpConnector;
use hyper::header::{CONTENT_LENGTH, HOST};
use hyper::{Body, Client, HeaderMap, Request, StatusCode, Uri};
use hyper_tls::HttpsConnector;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::proxy::Backend;
use crate::worker::{DispatchError, Envelope};

pub type HttpClient = Client<HttpsConnector<HttpConnector>, Body>;

pub fn build_client(connect_timeout: Duration) -> HttpClient {
    let mut http = HttpConnector::new();
    http.set_connect_timeout(Some(connect_timeout));
    http.enforce_http(false);

    Client::builder().build(HttpsConnector::new_with_connector(http))
}

/// Sends `req` to `backend` and buffers the whole answer.
///
/// The inbound body is streamed upstream as it arrives. `deadline` bounds
/// the round trip including the response body.
pub async fn forward(
    client: &HttpClient,
    backend: Arc<Backend>,
    req: Request<Body>,
    deadline: Option<Duration>,
) -> Envelope {
    let upstream = match upstream_request(&backend, req) {
        Ok(upstream) => upstream,
        Err(err) => {
            warn!(backend = %backend.id, %err, "could not build backend request");
            return err.into_envelope(Some(backend));
        }
    };

    debug!(backend = %backend.id, method = %upstream.method(), uri = %upstream.uri(), "forwarding");

    let exchange = round_trip(client, backend.clone(), upstream);
    let result = match deadline {
        Some(limit) => match tokio::time::timeout(limit, exchange).await {
            Ok(result) => result,
            Err(_) => Err(DispatchError::BackendUnreachable(format!(
                "no response within {:?}",
                limit
            ))),
        },
        None => exchange.await,
    };

    match result {
        Ok(envelope) => envelope,
        Err(err) => {
            warn!(backend = %backend.id, %err, "backend request failed");
            err.into_envelope(Some(backend))
        }
    }
}

async fn round_trip(
    client: &HttpClient,
    backend: Arc<Backend>,
    upstream: Request<Body>,
) -> Result<Envelope, DispatchError> {
    let response = client.request(upstream).await.map_err(classify)?;
    let (parts, body) = response.into_parts();

    match hyper::body::to_bytes(body).await {
        Ok(bytes) => Ok(Envelope::reply(backend, parts.status, parts.headers, bytes)),
        Err(err) => {
            warn!(backend = %backend.id, %err, "failed to read backend response body");
            let mut headers = parts.headers;
            headers.remove(CONTENT_LENGTH);
            Ok(Envelope::reply(
                backend,
                StatusCode::INTERNAL_SERVER_ERROR,
                headers,
                Bytes::from(err.to_string()),
            ))
        }
    }
}

fn classify(err: hyper::Error) -> DispatchError {
    if err.is_incomplete_message() {
        DispatchError::BackendEmptyResponse
    } else {
        DispatchError::BackendUnreachable(err.to_string())
    }
}

/// Rebuilds the inbound request against the backend's base address.
pub(crate) fn upstream_request(
    backend: &Backend,
    req: Request<Body>,
) -> Result<Request<Body>, DispatchError> {
    let (parts, body) = req.into_parts();
    let path = parts
        .uri
        .path_and_query()
        .map(|p| p.as_str())
        .unwrap_or("/");

    let uri: Uri = format!("{}{}", backend.base_address(), path)
        .parse()
        .map_err(|e: hyper::http::uri::InvalidUri| {
            DispatchError::BackendRequestBuild(e.to_string())
        })?;

    let mut upstream = Request::builder()
        .method(parts.method)
        .uri(uri)
        .body(body)
        .map_err(|e| DispatchError::BackendRequestBuild(e.to_string()))?;

    copy_headers(&parts.headers, upstream.headers_mut());
    Ok(upstream)
}

/// Copies every header value, keeping repeated headers repeated. `Host` is
/// left for the client to fill in from the backend URI.
pub(crate) fn copy_headers(from: &HeaderMap, to: &mut HeaderMap) {
    for (name, value) in from.iter() {
        if name == HOST {
            continue;
        }
        to.append(name.clone(), value.clone());
    }
}
