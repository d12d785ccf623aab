//
// src/proxy/mod.rs
//
mod backend;
mod limiter;
mod pool;

pub use backend::{Backend, ConnectionGuard};
pub use limiter::TokenBucket;
pub use pool::{ProxyError, ServerPool};
