// src/worker/pool.rs
use std::sync::{Arc, PoisonError, RwLock};

use super::worker::Worker;

/// Reusable workers plus the idle count the status interface reports.
///
/// A bounded pool is created full and refuses work once every worker is
/// busy. An unbounded pool (`capacity == 0`) adds a worker whenever none is
/// idle, so it never refuses.
#[derive(Debug)]
pub struct WorkerPool {
    workers: RwLock<Vec<Arc<Worker>>>,
    capacity: usize,
}

impl WorkerPool {
    pub fn new(capacity: usize) -> Self {
        let workers = (0..capacity).map(|id| Arc::new(Worker::new(id))).collect();

        Self {
            workers: RwLock::new(workers),
            capacity,
        }
    }

    pub fn unbounded() -> Self {
        Self::new(0)
    }

    pub fn is_bounded(&self) -> bool {
        self.capacity > 0
    }

    /// Claims an idle worker, growing the pool if allowed. The returned
    /// worker is already marked busy.
    pub fn acquire(&self) -> Option<Arc<Worker>> {
        {
            let workers = self.workers.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(worker) = workers.iter().find(|w| w.try_claim()) {
                return Some(worker.clone());
            }
        }

        if self.is_bounded() {
            return None;
        }

        let mut workers = self.workers.write().unwrap_or_else(PoisonError::into_inner);
        // another request may have released a worker while we waited
        if let Some(worker) = workers.iter().find(|w| w.try_claim()) {
            return Some(worker.clone());
        }

        let worker = Arc::new(Worker::new(workers.len()));
        worker.try_claim();
        workers.push(worker.clone());
        tracing::debug!(worker = worker.id(), total = workers.len(), "worker added to pool");
        Some(worker)
    }

    /// Number of workers not currently running a pipeline.
    pub fn idle_count(&self) -> usize {
        self.workers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|w| w.is_idle())
            .count()
    }

    pub fn len(&self) -> usize {
        self.workers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
