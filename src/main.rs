// src/main.rs
use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use url::Url;

use gyre::{
    config::{self, Config},
    health::HealthChecker,
    proxy::{Backend, ServerPool},
    server::{RequestHandler, ServerBuilder},
    stats::StatsRegistry,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("gyre=debug".parse()?)
                .add_directive("hyper=info".parse()?),
        )
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.yaml".to_string());

    info!("Loading configuration from: {}", config_path);
    let config = config::load_config(&config_path).await?;

    // Stats registry is built once here and handed by reference to the pool
    // and health checker.
    let stats = Arc::new(StatsRegistry::new());

    let pool = Arc::new(build_pool(&config, stats));
    if pool.backends().is_empty() {
        warn!("No backends configured; the proxy will answer 503 for every request");
    } else {
        info!("Backends: {:?}", pool.backend_urls());
    }

    // Start the health checker; its first tick fires immediately so initial
    // liveness is known before much traffic arrives.
    let checker = Arc::new(HealthChecker::new(config.health_check, pool.clone()));
    tokio::spawn(checker.clone().start());

    let handler = RequestHandler::new(pool);

    let addr: SocketAddr = ([0, 0, 0, 0], config.listen_port).into();
    info!("Starting load balancer on {}", addr);

    tokio::select! {
        result = ServerBuilder::new(addr).with_handler(handler).serve() => result?,
        _ = shutdown_signal() => {
            checker.shutdown();
        }
    }

    Ok(())
}

/// Assemble the pool from config. Malformed URLs are skipped with a warning,
/// never fatal; each backend gets its own rate limit or the global default.
fn build_pool(config: &Config, stats: Arc<StatsRegistry>) -> ServerPool {
    let mut pool = ServerPool::new(config.algorithm, config.ip_hash_header.clone(), stats);

    for backend_config in &config.backends {
        let url = match Url::parse(&backend_config.url) {
            Ok(url) => url,
            Err(err) => {
                warn!(url = %backend_config.url, %err, "skipping malformed backend URL");
                continue;
            }
        };

        let rate_limit = backend_config.rate_limit.unwrap_or(config.rate_limit);
        pool.add_backend(Arc::new(Backend::new(url, rate_limit.rps, rate_limit.burst)));
    }

    pool
}

// Graceful shutdown handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
