// src/health/checker.rs
use crate::config::HealthCheckConfig;
use crate::proxy::ServerPool;
use reqwest::Client;
use std::sync::Arc;
use tokio::time::interval;
use tracing::{debug, info, warn};

/// Periodically probes every backend in pool order and flips liveness
/// flags. Probes within one pass run sequentially; a slow backend delays
/// only the remainder of that pass, never request handling, which runs on
/// its own tasks.
pub struct HealthChecker {
    config: HealthCheckConfig,
    pool: Arc<ServerPool>,
    client: Client,
    shutdown_tx: tokio::sync::watch::Sender<bool>,
    shutdown_rx: tokio::sync::watch::Receiver<bool>,
}

impl HealthChecker {
    pub fn new(config: HealthCheckConfig, pool: Arc<ServerPool>) -> Self {
        // Redirects stay unfollowed so a 3xx counts as alive on its own
        // merits rather than by whatever it redirects to.
        let client = Client::builder()
            .timeout(config.timeout())
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("Failed to create HTTP client");

        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

        Self {
            config,
            pool,
            client,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// One full pass over the pool: probe, update liveness, report to stats.
    pub async fn run_once(&self) {
        for backend in self.pool.backends() {
            let was_alive = backend.is_alive().await;
            let alive = backend.check_health(&self.client).await;
            backend.set_alive(alive).await;
            self.pool
                .stats()
                .record_health(backend.url.as_str(), alive);

            if alive != was_alive {
                if alive {
                    info!(backend = %backend.url, "backend is back up");
                } else {
                    warn!(backend = %backend.url, "backend is down");
                }
            } else {
                debug!(backend = %backend.url, alive, "health check");
            }
        }
    }

    /// Repeat `run_once` on the configured interval until `shutdown` fires.
    /// The first tick completes immediately, giving an initial sweep.
    pub async fn start(self: Arc<Self>) {
        let mut ticker = interval(self.config.interval());
        let mut shutdown_rx = self.shutdown_rx.clone();

        info!(
            "Starting health checker with interval: {:?}",
            self.config.interval()
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_once().await;
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Health checker shutting down");
                        break;
                    }
                }
            }
        }
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Algorithm;
    use crate::proxy::Backend;
    use crate::stats::StatsRegistry;
    use url::Url;

    fn pool_for(url: &str) -> Arc<ServerPool> {
        let mut pool = ServerPool::new(Algorithm::RoundRobin, None, Arc::new(StatsRegistry::new()));
        pool.add_backend(Arc::new(Backend::new(Url::parse(url).unwrap(), 0, 1)));
        Arc::new(pool)
    }

    fn checker_for(pool: Arc<ServerPool>) -> HealthChecker {
        HealthChecker::new(
            HealthCheckConfig {
                interval_secs: 1,
                timeout_secs: 2,
            },
            pool,
        )
    }

    #[tokio::test]
    async fn probe_marks_responsive_backend_alive() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server.mock("GET", "/").with_status(200).create_async().await;

        let pool = pool_for(&server.url());
        pool.backends()[0].set_alive(false).await;

        checker_for(pool.clone()).run_once().await;
        assert!(pool.backends()[0].is_alive().await);
    }

    #[tokio::test]
    async fn probe_treats_redirect_as_alive() {
        // Liveness, not correctness: any status below 400 counts.
        let mut server = mockito::Server::new_async().await;
        let _mock = server.mock("GET", "/").with_status(301).create_async().await;

        let pool = pool_for(&server.url());
        pool.backends()[0].set_alive(false).await;

        checker_for(pool.clone()).run_once().await;
        assert!(pool.backends()[0].is_alive().await);
    }

    #[tokio::test]
    async fn probe_marks_erroring_backend_dead() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server.mock("GET", "/").with_status(500).create_async().await;

        let pool = pool_for(&server.url());
        checker_for(pool.clone()).run_once().await;
        assert!(!pool.backends()[0].is_alive().await);
    }

    #[tokio::test]
    async fn probe_marks_unreachable_backend_dead() {
        let pool = pool_for("http://127.0.0.1:1");
        checker_for(pool.clone()).run_once().await;
        assert!(!pool.backends()[0].is_alive().await);
    }

    #[tokio::test]
    async fn run_once_reports_into_stats() {
        let pool = pool_for("http://127.0.0.1:1");
        let checker = checker_for(pool.clone());
        checker.run_once().await;
        checker.run_once().await;
        let snap = pool.stats().snapshot();
        assert_eq!(snap["http://127.0.0.1:1/"].uptime_pct, 0.0);
    }

    #[tokio::test]
    async fn shutdown_stops_the_loop() {
        let pool = pool_for("http://127.0.0.1:1");
        let checker = Arc::new(checker_for(pool));
        let handle = tokio::spawn(checker.clone().start());
        checker.shutdown();
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .expect("health checker did not stop")
            .unwrap();
    }
}
