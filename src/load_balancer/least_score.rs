// src/load_balancer/least_score.rs
use crate::load_balancer::Selector;
use crate::proxy::Backend;
use std::sync::Arc;

/// Chooses the backend with the lowest score. Ties go to the backend that
/// was registered first.
#[derive(Debug, Default, Clone, Copy)]
pub struct LeastScore;

impl LeastScore {
    pub fn new() -> Self {
        Self
    }
}

impl Selector for LeastScore {
    fn select(&self, backends: &[Arc<Backend>]) -> Option<Arc<Backend>> {
        let mut best: Option<(&Arc<Backend>, u64)> = None;

        for backend in backends {
            let score = backend.score();
            match best {
                // strict `<` keeps the earliest backend on ties
                Some((_, min)) if score >= min => {}
                _ => best = Some((backend, score)),
            }
        }

        best.map(|(backend, _)| backend.clone())
    }

    fn name(&self) -> &'static str {
        "least_score"
    }
}
