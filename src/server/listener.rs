// ────────────────────────────────
// src/server/listener.rs
// Name resolution and bind for frontend and status listeners.
// ────────────────────────────────
use anyhow::{Context, Result};
use tokio::net::{lookup_host, TcpListener};

/// Binds the first address `addr` resolves to. Accepts `host:port` names.
pub async fn bind_tcp(addr: &str) -> Result<TcpListener> {
    let resolved = lookup_host(addr)
        .await
        .with_context(|| format!("Failed to resolve {}", addr))?
        .next()
        .with_context(|| format!("{} did not resolve to any address", addr))?;

    let listener = TcpListener::bind(resolved)
        .await
        .with_context(|| format!("Failed to bind {}", resolved))?;
    Ok(listener)
}
