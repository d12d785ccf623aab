// src/load_balancer/random.rs
use crate::load_balancer::{ClientInfo, LoadBalancer};
use crate::proxy::Backend;
use async_trait::async_trait;
use rand::seq::SliceRandom;
use std::sync::Arc;

/// Uniform choice among currently alive backends.
pub struct RandomBalancer;

impl RandomBalancer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RandomBalancer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LoadBalancer for RandomBalancer {
    async fn select_backend(
        &self,
        backends: &[Arc<Backend>],
        _client: &ClientInfo,
    ) -> Option<Arc<Backend>> {
        let mut alive = Vec::with_capacity(backends.len());
        for backend in backends {
            if backend.is_alive().await {
                alive.push(backend);
            }
        }

        alive.choose(&mut rand::thread_rng()).map(|b| (*b).clone())
    }

    fn name(&self) -> &'static str {
        "random"
    }
}
