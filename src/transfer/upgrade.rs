// src/transfer/upgrade.rs
use hyper::header::{CONNECTION, UPGRADE};
use hyper::HeaderMap;

/// True when the request asks to switch to the WebSocket protocol.
///
/// Only the first `Connection` and the first `Upgrade` header are looked at.
/// The `Connection` token must be spelled `upgrade` or `Upgrade`; the
/// `Upgrade` value is compared without regard to ASCII case.
pub fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    let connection = match headers.get(CONNECTION).and_then(|v| v.to_str().ok()) {
        Some(value) => value,
        None => return false,
    };

    let wants_upgrade = connection
        .split(',')
        .map(str::trim)
        .any(|token| token == "upgrade" || token == "Upgrade");
    if !wants_upgrade {
        return false;
    }

    headers
        .get(UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|protocol| protocol.trim().eq_ignore_ascii_case("websocket"))
        .unwrap_or(false)
}
