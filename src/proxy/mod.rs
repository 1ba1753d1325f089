//
// src/proxy/mod.rs
//
mod backend;
mod frontend;
mod proxy;

pub use backend::Backend;
pub use frontend::Frontend;
pub use proxy::{Proxy, ProxyError};
