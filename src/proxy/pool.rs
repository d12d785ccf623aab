//
// src/proxy/pool.rs
//

use super::backend::{Backend, ConnectionGuard};
use crate::load_balancer::{create_load_balancer, Algorithm, ClientInfo, LoadBalancer};
use crate::stats::StatsRegistry;
use futures::Stream;
use hyper::body::Bytes;
use hyper::{Body, Request, Response, StatusCode};
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

/// The registry of backends plus the configured selection strategy.
///
/// The backend sequence is append-only and fully built before serving
/// starts, so request handlers iterate it without locking. Insertion order
/// defines round-robin rotation order and ip_hash index stability.
pub struct ServerPool {
    backends: Vec<Arc<Backend>>,
    balancer: Arc<dyn LoadBalancer>,
    ip_hash_header: Option<String>,
    stats: Arc<StatsRegistry>,
}

/// Expected request-path outcomes that terminate handling early. These are
/// control flow, not faults: the handler converts them straight to responses.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("no alive backend available")]
    NoAvailableBackend,

    #[error("backend rate limit exceeded")]
    RateLimited,
}

impl From<ProxyError> for Response<Body> {
    fn from(err: ProxyError) -> Self {
        let (status, message) = match err {
            ProxyError::NoAvailableBackend => {
                (StatusCode::SERVICE_UNAVAILABLE, "Service unavailable")
            }
            ProxyError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, "Too Many Requests"),
        };

        Response::builder()
            .status(status)
            .body(Body::from(message))
            .unwrap()
    }
}

impl ServerPool {
    pub fn new(
        algorithm: Algorithm,
        ip_hash_header: Option<String>,
        stats: Arc<StatsRegistry>,
    ) -> Self {
        let balancer = create_load_balancer(algorithm);
        tracing::info!(algorithm = balancer.name(), "selection strategy configured");

        Self {
            backends: Vec::new(),
            balancer,
            ip_hash_header,
            stats,
        }
    }

    /// Append a backend and register its identity with the stats registry.
    /// The two stay in sync: every pool member has exactly one stats entry.
    pub fn add_backend(&mut self, backend: Arc<Backend>) {
        self.stats.register(backend.url.as_str());
        self.backends.push(backend);
    }

    pub fn backends(&self) -> &[Arc<Backend>] {
        &self.backends
    }

    pub fn backend_urls(&self) -> Vec<String> {
        self.backends
            .iter()
            .map(|b| b.url.as_str().to_string())
            .collect()
    }

    pub fn stats(&self) -> &Arc<StatsRegistry> {
        &self.stats
    }

    /// Run the configured selection algorithm over the current pool.
    pub async fn select_peer(&self, client: &ClientInfo) -> Option<Arc<Backend>> {
        self.balancer.select_backend(&self.backends, client).await
    }

    /// Full request path: select a peer, enforce its rate limit, forward,
    /// and record the outcome. Admission happens before the connection
    /// counter increments, so denied requests never touch the counter.
    pub async fn handle(
        &self,
        req: Request<Body>,
        remote_addr: Option<SocketAddr>,
    ) -> Result<Response<Body>, ProxyError> {
        let request_id = Uuid::new_v4();
        let span = tracing::debug_span!("request", id = %request_id);

        async {
            let client = self.client_info(&req, remote_addr);
            let peer = self
                .select_peer(&client)
                .await
                .ok_or(ProxyError::NoAvailableBackend)?;

            if !peer.try_admit() {
                tracing::debug!(backend = %peer.url, "rate limit exceeded");
                return Err(ProxyError::RateLimited);
            }

            let connection = peer.track_connection();
            let start = Instant::now();
            let response = peer.forward(req, remote_addr).await;

            let status = response.status().as_u16();
            tracing::debug!(backend = %peer.url, status, "response headers received");

            // The response body may still be streaming from the backend when
            // `forward` returns; the counter decrement and the stats record
            // are deferred to body completion (or mid-stream drop) by tying
            // them to the body's lifetime.
            let tracker = RequestTracker {
                stats: self.stats.clone(),
                identity: peer.url.as_str().to_string(),
                status,
                start,
                _connection: connection,
            };
            let (parts, body) = response.into_parts();
            let body = Body::wrap_stream(TrackedBody {
                inner: body,
                _tracker: tracker,
            });

            Ok(Response::from_parts(parts, body))
        }
        .instrument(span)
        .await
    }

    fn client_info(&self, req: &Request<Body>, remote_addr: Option<SocketAddr>) -> ClientInfo {
        let hash_header = self.ip_hash_header.as_ref().and_then(|name| {
            req.headers()
                .get(name.as_str())
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        });

        ClientInfo {
            remote_addr,
            hash_header,
        }
    }
}

/// Holds one request's accounting until the response finishes. Dropping the
/// tracker records duration and status exactly once and releases the
/// connection slot, whether the body ended normally or the client went away
/// mid-transfer.
struct RequestTracker {
    stats: Arc<StatsRegistry>,
    identity: String,
    status: u16,
    start: Instant,
    _connection: ConnectionGuard,
}

impl Drop for RequestTracker {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        self.stats
            .record_request(&self.identity, duration, self.status);
        tracing::debug!(
            backend = %self.identity,
            status = self.status,
            elapsed_ms = duration.as_millis() as u64,
            "request completed"
        );
    }
}

/// Upstream body that carries the request's tracker alongside the data.
struct TrackedBody {
    inner: Body,
    _tracker: RequestTracker,
}

impl Stream for TrackedBody {
    type Item = Result<Bytes, hyper::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn pool_with(algorithm: Algorithm, urls: &[&str]) -> ServerPool {
        let mut pool = ServerPool::new(algorithm, None, Arc::new(StatsRegistry::new()));
        for url in urls {
            pool.add_backend(Arc::new(Backend::new(Url::parse(url).unwrap(), 0, 1)));
        }
        pool
    }

    #[tokio::test]
    async fn empty_pool_selects_nothing() {
        for algorithm in [
            Algorithm::RoundRobin,
            Algorithm::LeastConn,
            Algorithm::Random,
            Algorithm::IpHash,
        ] {
            let pool = pool_with(algorithm, &[]);
            assert!(pool.select_peer(&ClientInfo::default()).await.is_none());
        }
    }

    #[tokio::test]
    async fn add_backend_registers_stats_entry() {
        let pool = pool_with(Algorithm::RoundRobin, &["http://localhost:9001"]);
        // Url normalizes the identity with a trailing slash.
        let snap = pool.stats().snapshot();
        assert!(snap.contains_key("http://localhost:9001/"));
    }

    #[tokio::test]
    async fn no_peer_maps_to_503() {
        let pool = pool_with(Algorithm::RoundRobin, &[]);
        let req = Request::builder().body(Body::empty()).unwrap();
        let err = pool.handle(req, None).await.unwrap_err();
        let response = Response::from(err);
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn rate_limited_maps_to_429() {
        let mut pool = ServerPool::new(Algorithm::RoundRobin, None, Arc::new(StatsRegistry::new()));
        pool.add_backend(Arc::new(Backend::new(
            Url::parse("http://127.0.0.1:1").unwrap(),
            1,
            1,
        )));

        // First request spends the single burst token; it fails with a
        // synthesized 503 because nothing listens on port 1, but it is
        // admitted. The second is denied by the limiter.
        let first = pool
            .handle(Request::builder().body(Body::empty()).unwrap(), None)
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::SERVICE_UNAVAILABLE);

        let second = pool
            .handle(Request::builder().body(Body::empty()).unwrap(), None)
            .await;
        assert!(matches!(second, Err(ProxyError::RateLimited)));
    }

    #[tokio::test]
    async fn connection_counter_balances_after_failed_forward() {
        let pool = pool_with(Algorithm::RoundRobin, &["http://127.0.0.1:1"]);
        let response = pool
            .handle(Request::builder().body(Body::empty()).unwrap(), None)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        // Accounting is tied to the body, so the slot is held until the
        // synthesized response is consumed.
        assert_eq!(pool.backends()[0].active_connections(), 1);
        hyper::body::to_bytes(response.into_body()).await.unwrap();
        assert_eq!(pool.backends()[0].active_connections(), 0);

        // The synthesized failure is still recorded against the backend.
        let snap = pool.stats().snapshot();
        assert_eq!(snap["http://127.0.0.1:1/"].requests, 1);
    }
}
