// src/stats/registry.rs
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Process-wide statistics aggregator, constructed once by the entry point
/// and shared by reference with the pool and health checker.
///
/// Locking is two-level: the map guards only identity→entry insertion and
/// lookup, each entry's fields are guarded by that entry's own mutex. Updates
/// for different backends never contend.
#[derive(Debug, Default)]
pub struct StatsRegistry {
    entries: DashMap<String, Mutex<BackendEntry>>,
}

#[derive(Debug)]
struct BackendEntry {
    requests: u64,
    total_latency: Duration,
    status_counts: HashMap<u16, u64>,
    port_counts: HashMap<String, u64>,
    created_at: Instant,
    last_check: Option<Instant>,
    up_duration: Duration,
    alive: bool,
}

impl BackendEntry {
    fn new() -> Self {
        Self {
            requests: 0,
            total_latency: Duration::ZERO,
            status_counts: HashMap::new(),
            port_counts: HashMap::new(),
            created_at: Instant::now(),
            last_check: None,
            up_duration: Duration::ZERO,
            alive: false,
        }
    }
}

/// Point-in-time view of a single backend's counters, ready for JSON.
#[derive(Debug, Clone, Serialize)]
pub struct BackendSnapshot {
    pub url: String,
    pub requests: u64,
    pub avg_latency_ms: f64,
    pub status_counts: HashMap<u16, u64>,
    pub failure_rate_pct: f64,
    pub uptime_pct: f64,
    pub most_famous_port: String,
}

impl StatsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent entry creation.
    pub fn register(&self, identity: &str) {
        self.entries
            .entry(identity.to_string())
            .or_insert_with(|| Mutex::new(BackendEntry::new()));
    }

    /// Record a completed request. Missing entries are created lazily.
    pub fn record_request(&self, identity: &str, duration: Duration, status: u16) {
        self.register(identity);
        if let Some(entry) = self.entries.get(identity) {
            let mut entry = entry.lock().unwrap_or_else(|e| e.into_inner());
            entry.requests += 1;
            entry.total_latency += duration;
            *entry.status_counts.entry(status).or_insert(0) += 1;
            let port = extract_port(identity);
            *entry.port_counts.entry(port).or_insert(0) += 1;
        }
    }

    /// Record a health-check result. The first call for an entry only seeds
    /// the checkpoint and flag: time before the first probe is neither up nor
    /// down. Later calls attribute the elapsed interval to uptime iff the
    /// backend was alive for the whole previous interval.
    pub fn record_health(&self, identity: &str, alive: bool) {
        self.register(identity);
        if let Some(entry) = self.entries.get(identity) {
            let mut entry = entry.lock().unwrap_or_else(|e| e.into_inner());
            let now = Instant::now();
            if let Some(last) = entry.last_check {
                if entry.alive {
                    entry.up_duration += now.duration_since(last);
                }
            }
            entry.last_check = Some(now);
            entry.alive = alive;
        }
    }

    /// Consistent per-entry copy of all counters. Entries inserted while the
    /// iteration is in flight may or may not be included; no single entry is
    /// ever observed torn because its mutex is held while copying.
    pub fn snapshot(&self) -> HashMap<String, BackendSnapshot> {
        let now = Instant::now();
        let mut out = HashMap::with_capacity(self.entries.len());

        for item in self.entries.iter() {
            let entry = item.value().lock().unwrap_or_else(|e| e.into_inner());

            let avg_latency_ms = if entry.requests > 0 {
                entry.total_latency.as_secs_f64() * 1000.0 / entry.requests as f64
            } else {
                0.0
            };

            let failures: u64 = entry
                .status_counts
                .iter()
                .filter(|(status, _)| **status >= 400)
                .map(|(_, count)| count)
                .sum();
            let failure_rate_pct = if entry.requests > 0 {
                failures as f64 / entry.requests as f64 * 100.0
            } else {
                0.0
            };

            let mut up = entry.up_duration;
            if entry.alive {
                if let Some(last) = entry.last_check {
                    up += now.duration_since(last);
                }
            }
            let total = now.duration_since(entry.created_at);
            let uptime_pct = if total > Duration::ZERO {
                (up.as_secs_f64() / total.as_secs_f64() * 100.0).clamp(0.0, 100.0)
            } else {
                0.0
            };

            out.insert(
                item.key().clone(),
                BackendSnapshot {
                    url: item.key().clone(),
                    requests: entry.requests,
                    avg_latency_ms,
                    status_counts: entry.status_counts.clone(),
                    failure_rate_pct,
                    uptime_pct,
                    most_famous_port: most_famous_port(&entry.port_counts),
                },
            );
        }

        out
    }
}

/// Port token of an identity string: the substring after the last `:`,
/// truncated at any following `/`. "default" when there is no port, e.g.
/// `http://example.com/` where the last colon belongs to the scheme.
fn extract_port(identity: &str) -> String {
    let token = identity
        .rfind(':')
        .map(|i| &identity[i + 1..])
        .map(|rest| match rest.find('/') {
            Some(slash) => &rest[..slash],
            None => rest,
        })
        .unwrap_or("");

    if token.is_empty() {
        "default".to_string()
    } else {
        token.to_string()
    }
}

/// Histogram argmax with deterministic (sorted) tie-breaking.
fn most_famous_port(counts: &HashMap<String, u64>) -> String {
    let mut ports: Vec<&String> = counts.keys().collect();
    ports.sort();

    let mut best = "";
    let mut max = 0;
    for port in ports {
        let count = counts[port];
        if count > max {
            max = count;
            best = port;
        }
    }
    best.to_string()
}
