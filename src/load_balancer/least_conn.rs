// src/load_balancer/least_conn.rs
use crate::load_balancer::{ClientInfo, LoadBalancer};
use crate::proxy::Backend;
use async_trait::async_trait;
use std::sync::Arc;

/// Picks the alive backend with the fewest active connections. Counter reads
/// are unsynchronized snapshots: staleness under concurrent load is fine,
/// the count is only a load signal. Ties go to the first backend in
/// sequence order (strict less-than comparison).
pub struct LeastConnBalancer;

impl LeastConnBalancer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LeastConnBalancer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LoadBalancer for LeastConnBalancer {
    async fn select_backend(
        &self,
        backends: &[Arc<Backend>],
        _client: &ClientInfo,
    ) -> Option<Arc<Backend>> {
        let mut chosen: Option<(&Arc<Backend>, i64)> = None;

        for backend in backends {
            if !backend.is_alive().await {
                continue;
            }
            let count = backend.active_connections();
            match chosen {
                Some((_, min)) if count >= min => {}
                _ => chosen = Some((backend, count)),
            }
        }

        chosen.map(|(backend, _)| backend.clone())
    }

    fn name(&self) -> &'static str {
        "least_conn"
    }
}
