// src/load_balancer/round_robin.rs
use crate::load_balancer::{ClientInfo, LoadBalancer};
use crate::proxy::Backend;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Rotating cursor over the backend sequence. Each selection advances the
/// cursor once (fetch-and-add, so every position is issued to exactly one
/// caller) and scans forward for the first alive backend, wrapping modulo
/// the pool size. When the scan lands past the starting point the cursor is
/// stored at the found index so the next call continues from there.
pub struct RoundRobinBalancer {
    cursor: AtomicUsize,
}

impl RoundRobinBalancer {
    pub fn new() -> Self {
        Self {
            cursor: AtomicUsize::new(0),
        }
    }
}

impl Default for RoundRobinBalancer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LoadBalancer for RoundRobinBalancer {
    async fn select_backend(
        &self,
        backends: &[Arc<Backend>],
        _client: &ClientInfo,
    ) -> Option<Arc<Backend>> {
        if backends.is_empty() {
            return None;
        }

        let len = backends.len();
        let start = self.cursor.fetch_add(1, Ordering::Relaxed).wrapping_add(1) % len;

        for offset in 0..len {
            let idx = (start + offset) % len;
            if backends[idx].is_alive().await {
                if offset != 0 {
                    self.cursor.store(idx, Ordering::Relaxed);
                }
                return Some(backends[idx].clone());
            }
        }

        None
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }
}
