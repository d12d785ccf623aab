// src/load_balancer/mod.rs
mod algorithm;
mod ip_hash;
mod least_conn;
mod random;
mod round_robin;

pub use algorithm::{ClientInfo, LoadBalancer};
pub use ip_hash::IpHashBalancer;
pub use least_conn::LeastConnBalancer;
pub use random::RandomBalancer;
pub use round_robin::RoundRobinBalancer;

pub use crate::config::Algorithm;

use std::sync::Arc;

pub fn create_load_balancer(algorithm: Algorithm) -> Arc<dyn LoadBalancer> {
    match algorithm {
        Algorithm::RoundRobin => Arc::new(RoundRobinBalancer::new()),
        Algorithm::LeastConn => Arc::new(LeastConnBalancer::new()),
        Algorithm::Random => Arc::new(RandomBalancer::new()),
        Algorithm::IpHash => Arc::new(IpHashBalancer::new()),
    }
}
