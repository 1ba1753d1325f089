// src/proxy/frontend.rs
use super::backend::Backend;
use crate::config::FrontendConfig;
use crate::load_balancer::{LeastScore, Selector};
use std::sync::Arc;
use tokio::sync::Mutex;

/// A named entry point and the ordered set of backends it balances over.
///
/// Backends are owned by exactly one frontend. Selection and the score bump
/// that follows it happen under `selection`, so two requests on the same
/// frontend never pick a backend from the same snapshot of scores.
pub struct Frontend {
    pub name: String,
    pub route: String,
    backends: Vec<Arc<Backend>>,
    selector: Box<dyn Selector>,
    selection: Mutex<()>,
}

impl Frontend {
    pub fn new(name: impl Into<String>, route: impl Into<String>, backends: Vec<Backend>) -> Self {
        Self::with_selector(name, route, backends, Box::new(LeastScore::new()))
    }

    pub fn with_selector(
        name: impl Into<String>,
        route: impl Into<String>,
        backends: Vec<Backend>,
        selector: Box<dyn Selector>,
    ) -> Self {
        Self {
            name: name.into(),
            route: route.into(),
            backends: backends.into_iter().map(Arc::new).collect(),
            selector,
            selection: Mutex::new(()),
        }
    }

    pub fn from_config(config: &FrontendConfig) -> Result<Self, url::ParseError> {
        let backends = config
            .backends
            .iter()
            .map(Backend::from_config)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::new(config.name.clone(), config.route.clone(), backends))
    }

    pub fn backends(&self) -> &[Arc<Backend>] {
        &self.backends
    }

    pub fn matches(&self, path: &str) -> bool {
        path.starts_with(&self.route)
    }

    /// Selects the least loaded backend and charges the request to it.
    ///
    /// Returns `None` when the frontend has no backends.
    pub async fn reserve(&self) -> Option<Arc<Backend>> {
        let _guard = self.selection.lock().await;

        let backend = self.selector.select(&self.backends)?;
        let score = backend.increment_score();

        tracing::trace!(
            frontend = %self.name,
            backend = %backend.id,
            score,
            selector = self.selector.name(),
            "backend reserved"
        );
        Some(backend)
    }
}

impl std::fmt::Debug for Frontend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frontend")
            .field("name", &self.name)
            .field("route", &self.route)
            .field("backends", &self.backends)
            .field("selector", &self.selector.name())
            .finish()
    }
}
