// src/load_balancer/algorithm.rs
use crate::proxy::Backend;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;

/// Per-request client data the algorithms may key on.
#[derive(Debug, Default, Clone)]
pub struct ClientInfo {
    pub remote_addr: Option<SocketAddr>,
    /// Value of the configured ip-hash header, when present on the request.
    pub hash_header: Option<String>,
}

impl ClientInfo {
    pub fn from_addr(addr: SocketAddr) -> Self {
        Self {
            remote_addr: Some(addr),
            hash_header: None,
        }
    }
}

#[async_trait]
pub trait LoadBalancer: Send + Sync {
    async fn select_backend(
        &self,
        backends: &[Arc<Backend>],
        client: &ClientInfo,
    ) -> Option<Arc<Backend>>;

    fn name(&self) -> &'static str;
}
