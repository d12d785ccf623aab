// src/proxy/backend.rs
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use hyper::client::HttpConnector;
use hyper::header::{HeaderValue, HOST};
use hyper::{Body, Client, Request, Response, StatusCode, Uri};
use tokio::sync::RwLock;
use url::Url;

use super::limiter::TokenBucket;

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// A single upstream target: parsed base URL, liveness flag, active
/// connection counter, optional admission limiter and a forwarding client.
///
/// Backends are created once at startup and live for the process lifetime;
/// they are only ever marked dead/alive, never removed.
#[derive(Debug)]
pub struct Backend {
    pub url: Url,
    authority: String,
    alive: RwLock<bool>,
    active_connections: AtomicI64,
    limiter: Option<TokenBucket>,
    client: Client<HttpConnector>,
}

impl Backend {
    /// `rps > 0` attaches a token bucket with the given burst; `rps == 0`
    /// means unlimited. URL validation is the caller's responsibility.
    pub fn new(url: Url, rps: u32, burst: u32) -> Self {
        let authority = match url.port() {
            Some(port) => format!("{}:{}", url.host_str().unwrap_or("localhost"), port),
            None => url.host_str().unwrap_or("localhost").to_string(),
        };

        let limiter = if rps > 0 {
            Some(TokenBucket::new(rps, burst))
        } else {
            None
        };

        Self {
            url,
            authority,
            alive: RwLock::new(true),
            active_connections: AtomicI64::new(0),
            limiter,
            client: Client::new(),
        }
    }

    pub async fn set_alive(&self, alive: bool) {
        *self.alive.write().await = alive;
    }

    pub async fn is_alive(&self) -> bool {
        *self.alive.read().await
    }

    pub fn active_connections(&self) -> i64 {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Non-blocking admission check. `true` when no limiter is configured.
    pub fn try_admit(&self) -> bool {
        match &self.limiter {
            Some(limiter) => limiter.try_acquire(),
            None => true,
        }
    }

    /// RAII increment of the active-connection counter; the matching
    /// decrement fires exactly once when the guard drops.
    pub fn track_connection(self: &Arc<Self>) -> ConnectionGuard {
        self.active_connections.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            backend: self.clone(),
        }
    }

    /// Liveness probe: GET on the base URL with the client's timeout.
    /// Any status in [200, 400) counts as alive — a backend that 404s on `/`
    /// is still reachable, but 4xx/5xx and transport errors are not.
    pub async fn check_health(&self, client: &reqwest::Client) -> bool {
        match client.get(self.url.as_str()).send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                (200..400).contains(&status)
            }
            Err(_) => false,
        }
    }

    /// Forward a request to this backend, rewriting the target URI and Host
    /// header and appending X-Forwarded-For. A transport failure never
    /// propagates: it is converted to a synthesized 503. The `alive` flag is
    /// not touched here; only the health checker owns it.
    pub async fn forward(
        &self,
        mut req: Request<Body>,
        client_addr: Option<SocketAddr>,
    ) -> Response<Body> {
        let path_and_query = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");

        let target = format!("{}://{}{}", self.url.scheme(), self.authority, path_and_query);
        let uri: Uri = match target.parse() {
            Ok(uri) => uri,
            Err(err) => {
                tracing::warn!(backend = %self.url, %err, "failed to build upstream URI");
                return unavailable_response();
            }
        };
        *req.uri_mut() = uri;

        if let Ok(host) = HeaderValue::from_str(&self.authority) {
            req.headers_mut().insert(HOST, host);
        }

        if let Some(addr) = client_addr {
            let ip = addr.ip().to_string();
            let forwarded = match req.headers().get(X_FORWARDED_FOR) {
                Some(existing) => match existing.to_str() {
                    Ok(prior) => format!("{}, {}", prior, ip),
                    Err(_) => ip,
                },
                None => ip,
            };
            if let Ok(value) = HeaderValue::from_str(&forwarded) {
                req.headers_mut().insert(X_FORWARDED_FOR, value);
            }
        }

        match self.client.request(req).await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(backend = %self.url, %err, "backend unreachable");
                unavailable_response()
            }
        }
    }
}

/// Decrements the owning backend's active-connection counter on drop.
pub struct ConnectionGuard {
    backend: Arc<Backend>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.backend
            .active_connections
            .fetch_sub(1, Ordering::SeqCst);
    }
}

fn unavailable_response() -> Response<Body> {
    Response::builder()
        .status(StatusCode::SERVICE_UNAVAILABLE)
        .body(Body::from("Backend unavailable"))
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(url: &str) -> Arc<Backend> {
        Arc::new(Backend::new(Url::parse(url).unwrap(), 0, 1))
    }

    #[tokio::test]
    async fn starts_alive_and_flips() {
        let b = backend("http://localhost:9001");
        assert!(b.is_alive().await);
        b.set_alive(false).await;
        assert!(!b.is_alive().await);
        b.set_alive(true).await;
        assert!(b.is_alive().await);
    }

    #[test]
    fn connection_guard_balances_counter() {
        let b = backend("http://localhost:9001");
        {
            let _one = b.track_connection();
            let _two = b.track_connection();
            assert_eq!(b.active_connections(), 2);
        }
        assert_eq!(b.active_connections(), 0);
    }

    #[test]
    fn no_limiter_always_admits() {
        let b = backend("http://localhost:9001");
        for _ in 0..100 {
            assert!(b.try_admit());
        }
    }

    #[test]
    fn limiter_denies_past_burst() {
        let b = Arc::new(Backend::new(
            Url::parse("http://localhost:9001").unwrap(),
            1,
            2,
        ));
        assert!(b.try_admit());
        assert!(b.try_admit());
        assert!(!b.try_admit());
    }

    #[tokio::test]
    async fn forward_synthesizes_503_when_unreachable() {
        // Port 1 is essentially guaranteed to refuse connections.
        let b = backend("http://127.0.0.1:1");
        let req = Request::builder()
            .uri("http://proxy/anything?q=1")
            .body(Body::empty())
            .unwrap();
        let response = b.forward(req, None).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        // The failure path must not mark the backend dead.
        assert!(b.is_alive().await);
    }
}
