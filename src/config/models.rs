// src/config/models.rs
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Top-level configuration. Every field has a serde default so a minimal
/// (or empty) config file still produces a runnable proxy.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    #[serde(default)]
    pub backends: Vec<BackendConfig>,

    #[serde(default)]
    pub algorithm: Algorithm,

    /// Header used as the hash-key source for ip_hash (e.g. X-Forwarded-For).
    /// When absent the client's remote address is used instead.
    #[serde(default)]
    pub ip_hash_header: Option<String>,

    /// Global rate limit applied to backends that don't declare their own.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub health_check: HealthCheckConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    pub url: String,

    /// Per-backend override; falls back to the global `rate_limit`.
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
}

/// Token-bucket parameters. `rps == 0` disables limiting entirely.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default)]
    pub rps: u32,
    #[serde(default = "default_burst")]
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            rps: 0,
            burst: default_burst(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct HealthCheckConfig {
    #[serde(default = "default_health_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_health_timeout_secs")]
    pub timeout_secs: u64,
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_health_interval_secs(),
            timeout_secs: default_health_timeout_secs(),
        }
    }
}

/// Peer-selection algorithm. Parsing is case-insensitive and never fails:
/// unrecognized names fall back to round-robin with a warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Algorithm {
    #[default]
    RoundRobin,
    LeastConn,
    Random,
    IpHash,
}

impl FromStr for Algorithm {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "round_robin" => Algorithm::RoundRobin,
            "least_conn" => Algorithm::LeastConn,
            "random" => Algorithm::Random,
            "ip_hash" => Algorithm::IpHash,
            other => {
                tracing::warn!(
                    "Unknown load balancing algorithm {:?}, falling back to round robin",
                    other
                );
                Algorithm::RoundRobin
            }
        })
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Algorithm::RoundRobin => "round_robin",
            Algorithm::LeastConn => "least_conn",
            Algorithm::Random => "random",
            Algorithm::IpHash => "ip_hash",
        };
        f.write_str(name)
    }
}

impl<'de> Deserialize<'de> for Algorithm {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(s.parse().unwrap_or_default())
    }
}

fn default_listen_port() -> u16 {
    8080
}

fn default_burst() -> u32 {
    1
}

fn default_health_interval_secs() -> u64 {
    20
}

fn default_health_timeout_secs() -> u64 {
    2
}
