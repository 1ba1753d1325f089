// src/rpc/mod.rs
mod client;
mod protocol;
mod server;

pub use client::{backends_table, idle_table, StatusClient};
pub use protocol::{
    BackendStatus, RpcError, RpcRequest, RpcResponse, StatusResponse, GET_BACKENDS, GET_IDLE,
};
pub use server::StatusService;
