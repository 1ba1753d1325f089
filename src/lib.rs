// src/lib.rs
pub mod app;
pub mod cli;
pub mod config;
pub mod load_balancer;
pub mod metrics;
pub mod proxy;
pub mod rpc;
pub mod server;
pub mod transfer;
pub mod worker;
