// src/worker/envelope.rs
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Body, HeaderMap, Response, StatusCode};
use std::sync::Arc;

use crate::proxy::Backend;

/// Failures detected while dispatching a request. None of these escape to
/// the serving layer; each one becomes an [`Envelope`].
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("no backend available")]
    NoBackendAvailable,

    #[error("failed to build backend request: {0}")]
    BackendRequestBuild(String),

    #[error("backend unreachable: {0}")]
    BackendUnreachable(String),

    #[error("backend closed the connection without a response")]
    BackendEmptyResponse,

    #[error("client connection cannot be upgraded")]
    HijackUnsupported,

    #[error("failed to connect to backend: {0}")]
    TunnelDial(String),

    #[error("failed to send upgrade request to backend: {0}")]
    TunnelWrite(String),
}

impl DispatchError {
    pub fn status(&self) -> StatusCode {
        match self {
            DispatchError::NoBackendAvailable => StatusCode::SERVICE_UNAVAILABLE,
            DispatchError::BackendRequestBuild(_) | DispatchError::BackendUnreachable(_) => {
                StatusCode::REQUEST_TIMEOUT
            }
            DispatchError::BackendEmptyResponse => StatusCode::BAD_GATEWAY,
            DispatchError::HijackUnsupported => StatusCode::INTERNAL_SERVER_ERROR,
            DispatchError::TunnelDial(_) | DispatchError::TunnelWrite(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        }
    }

    /// Body shown to the client. Internal detail stays in the logs.
    pub fn public_message(&self) -> &'static str {
        match self {
            DispatchError::NoBackendAvailable => "Service Unavailable",
            DispatchError::BackendRequestBuild(_) | DispatchError::BackendUnreachable(_) => {
                "No backend available"
            }
            DispatchError::BackendEmptyResponse => "Method Not Supported By SDS Load Balancer",
            DispatchError::HijackUnsupported
            | DispatchError::TunnelDial(_)
            | DispatchError::TunnelWrite(_) => "Internal Error",
        }
    }

    pub fn into_envelope(self, backend: Option<Arc<Backend>>) -> Envelope {
        let mut envelope = Envelope::error(self.status(), self.public_message());
        envelope.backend = backend;
        envelope
    }
}

/// Outcome of one dispatch.
///
/// `upgraded` envelopes carry the backend's `101 Switching Protocols` head
/// and never a body; the bytes flow through the tunnel instead.
#[derive(Debug)]
pub struct Envelope {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub upgraded: bool,
    pub backend: Option<Arc<Backend>>,
}

impl Envelope {
    pub fn error(status: StatusCode, message: &'static str) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );

        Self {
            status,
            headers,
            body: Bytes::from_static(message.as_bytes()),
            upgraded: false,
            backend: None,
        }
    }

    pub fn reply(backend: Arc<Backend>, status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
            upgraded: false,
            backend: Some(backend),
        }
    }

    pub fn upgraded(backend: Arc<Backend>, status: StatusCode, headers: HeaderMap) -> Self {
        Self {
            status,
            headers,
            body: Bytes::new(),
            upgraded: true,
            backend: Some(backend),
        }
    }

    pub fn backend_id(&self) -> &str {
        self.backend.as_ref().map(|b| b.id.as_str()).unwrap_or("none")
    }

    pub fn into_response(self) -> Response<Body> {
        let body = if self.upgraded {
            Body::empty()
        } else {
            Body::from(self.body)
        };

        let mut response = Response::new(body);
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

impl From<DispatchError> for Envelope {
    fn from(err: DispatchError) -> Self {
        err.into_envelope(None)
    }
}
