// src/proxy/backend.rs
use std::sync::{PoisonError, RwLock};
use url::Url;

use crate::config::{parse_backend_address, BackendConfig};

/// A single upstream target and its live load score.
///
/// The score only grows; it is bumped once per request routed here and is
/// reset by a process restart.
#[derive(Debug)]
pub struct Backend {
    pub id: String,
    pub url: Url,
    score: RwLock<u64>,
}

impl Backend {
    pub fn new(url: Url) -> Self {
        let id = format!(
            "{}:{}",
            url.host_str().unwrap_or("unknown"),
            url.port_or_known_default().unwrap_or(80)
        );

        Self {
            id,
            url,
            score: RwLock::new(0),
        }
    }

    pub fn from_config(config: &BackendConfig) -> Result<Self, url::ParseError> {
        Ok(Self::new(config.url()?))
    }

    pub fn parse(address: &str) -> Result<Self, url::ParseError> {
        Ok(Self::new(parse_backend_address(address)?))
    }

    pub fn score(&self) -> u64 {
        *self.score.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bumps the score and returns the new value.
    pub fn increment_score(&self) -> u64 {
        let mut score = self.score.write().unwrap_or_else(PoisonError::into_inner);
        *score += 1;
        *score
    }

    /// `host:port` for opening raw connections.
    pub fn authority(&self) -> String {
        self.id.clone()
    }

    /// Base used to build outbound request URIs, without a trailing slash.
    pub fn base_address(&self) -> &str {
        self.url.as_str().trim_end_matches('/')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_uses_known_default_port() {
        let backend = Backend::parse("http://example.com").unwrap();
        assert_eq!(backend.id, "example.com:80");
        assert_eq!(backend.authority(), "example.com:80");

        let backend = Backend::parse("https://example.com").unwrap();
        assert_eq!(backend.id, "example.com:443");
    }

    #[test]
    fn base_address_strips_trailing_slash() {
        let backend = Backend::parse("127.0.0.1:9001").unwrap();
        assert_eq!(backend.base_address(), "http://127.0.0.1:9001");

        let backend = Backend::parse("http://127.0.0.1:9001/api/").unwrap();
        assert_eq!(backend.base_address(), "http://127.0.0.1:9001/api");
    }

    #[test]
    fn score_is_monotonic() {
        let backend = Backend::parse("127.0.0.1:9001").unwrap();
        assert_eq!(backend.score(), 0);
        for expected in 1..=5 {
            assert_eq!(backend.increment_score(), expected);
        }
        assert_eq!(backend.score(), 5);
    }
}
