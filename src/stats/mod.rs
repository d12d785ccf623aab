// src/stats/mod.rs
mod registry;

pub use registry::{BackendSnapshot, StatsRegistry};
