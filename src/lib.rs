// src/lib.rs
pub mod config;
pub mod server;
pub mod proxy;
pub mod load_balancer;
pub mod health;
pub mod stats;
