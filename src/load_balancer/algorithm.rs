// src/load_balancer/algorithm.rs
use crate::proxy::Backend;
use std::sync::Arc;

/// Picks the backend a request should go to.
///
/// Implementations must not mutate backend state; the caller bumps the
/// chosen backend's score inside the same critical section.
pub trait Selector: Send + Sync {
    fn select(&self, backends: &[Arc<Backend>]) -> Option<Arc<Backend>>;

    fn name(&self) -> &'static str;
}
