// src/worker/mod.rs
mod envelope;
mod pool;
mod worker;

pub use envelope::{DispatchError, Envelope};
pub use pool::WorkerPool;
pub use worker::Worker;
