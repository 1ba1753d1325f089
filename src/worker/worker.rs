// src/worker/worker.rs
use futures::FutureExt;
use hyper::{Body, Request};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, error};

use super::envelope::{DispatchError, Envelope};
use crate::proxy::Frontend;
use crate::transfer::{is_websocket_upgrade, Transport};

/// Runs one request's dispatch pipeline at a time and exposes whether it is
/// currently busy.
#[derive(Debug)]
pub struct Worker {
    id: usize,
    idle: AtomicBool,
}

impl Worker {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            idle: AtomicBool::new(true),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn is_idle(&self) -> bool {
        self.idle.load(Ordering::Acquire)
    }

    /// Flips the worker from idle to busy. Fails if it was already busy.
    pub fn try_claim(&self) -> bool {
        self.idle
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn release(&self) {
        self.idle.store(true, Ordering::Release);
    }

    /// Starts the pipeline for `req` and returns the channel its result
    /// arrives on.
    ///
    /// The worker is marked busy before this returns and goes idle again
    /// once the pipeline has produced a result or panicked. Dropping the
    /// receiver is allowed.
    pub fn dispatch(
        self: &Arc<Self>,
        req: Request<Body>,
        frontend: Arc<Frontend>,
        transport: Arc<dyn Transport>,
    ) -> oneshot::Receiver<Envelope> {
        self.idle.store(false, Ordering::Release);

        let (tx, rx) = oneshot::channel();
        let worker = self.clone();

        tokio::spawn(async move {
            let outcome = {
                let _idle = IdleOnDrop(worker.as_ref());
                AssertUnwindSafe(run_pipeline(req, &frontend, transport.as_ref()))
                    .catch_unwind()
                    .await
            };

            match outcome {
                Ok(envelope) => {
                    if let Err(envelope) = tx.send(envelope) {
                        debug!(
                            worker = worker.id,
                            frontend = %frontend.name,
                            status = envelope.status.as_u16(),
                            "result receiver dropped before delivery"
                        );
                    }
                }
                Err(panic) => {
                    error!(
                        worker = worker.id,
                        frontend = %frontend.name,
                        panic = panic_message(panic.as_ref()),
                        "dispatch task panicked"
                    );
                }
            }
        });

        rx
    }
}

struct IdleOnDrop<'a>(&'a Worker);

impl Drop for IdleOnDrop<'_> {
    fn drop(&mut self) {
        self.0.release();
    }
}

async fn run_pipeline(req: Request<Body>, frontend: &Frontend, transport: &dyn Transport) -> Envelope {
    let backend = match frontend.reserve().await {
        Some(backend) => backend,
        None => {
            debug!(frontend = %frontend.name, "no backend to route to");
            return DispatchError::NoBackendAvailable.into();
        }
    };

    if is_websocket_upgrade(req.headers()) {
        transport.tunnel(backend, req).await
    } else {
        transport.forward(backend, req).await
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
