// src/load_balancer/ip_hash.rs
use crate::load_balancer::{ClientInfo, LoadBalancer, RoundRobinBalancer};
use crate::proxy::Backend;
use async_trait::async_trait;
use std::sync::Arc;

/// Session-affine selection: hash a per-client key (configured header value,
/// else remote address) to a starting index, then scan forward for the
/// first alive backend. The same key maps to the same backend as long as
/// pool membership is unchanged. Requests without any usable key fall back
/// to round-robin rotation.
pub struct IpHashBalancer {
    fallback: RoundRobinBalancer,
}

impl IpHashBalancer {
    pub fn new() -> Self {
        Self {
            fallback: RoundRobinBalancer::new(),
        }
    }
}

impl Default for IpHashBalancer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LoadBalancer for IpHashBalancer {
    async fn select_backend(
        &self,
        backends: &[Arc<Backend>],
        client: &ClientInfo,
    ) -> Option<Arc<Backend>> {
        if backends.is_empty() {
            return None;
        }

        let raw = match &client.hash_header {
            Some(value) if !value.is_empty() => value.clone(),
            _ => match client.remote_addr {
                Some(addr) => addr.to_string(),
                None => String::new(),
            },
        };

        if raw.is_empty() {
            return self.fallback.select_backend(backends, client).await;
        }

        let key = normalize_key(&raw);
        let start = fnv1a(key.as_bytes()) as usize % backends.len();

        for offset in 0..backends.len() {
            let idx = (start + offset) % backends.len();
            if backends[idx].is_alive().await {
                return Some(backends[idx].clone());
            }
        }

        None
    }

    fn name(&self) -> &'static str {
        "ip_hash"
    }
}

/// Multi-value forwarded-for headers keep only the first hop; a trailing
/// `:port` is stripped so the same client hashes identically across ports.
fn normalize_key(raw: &str) -> String {
    let first = match raw.find(',') {
        Some(comma) => raw[..comma].trim(),
        None => raw,
    };
    match first.rfind(':') {
        Some(colon) => first[..colon].to_string(),
        None => first.to_string(),
    }
}

/// 32-bit FNV-1a.
fn fnv1a(bytes: &[u8]) -> u32 {
    const OFFSET_BASIS: u32 = 0x811c_9dc5;
    const PRIME: u32 = 16_777_619;

    let mut hash = OFFSET_BASIS;
    for &byte in bytes {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}
