// src/server/handler.rs
use hyper::header::CONTENT_TYPE;
use hyper::{Body, Method, Request, Response, StatusCode};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::Service;

use crate::proxy::ServerPool;

/// Per-connection service: routes `GET /stats` to the statistics snapshot
/// and everything else through the pool's proxy path. Each accepted
/// connection gets a clone carrying that connection's remote address.
#[derive(Clone)]
pub struct RequestHandler {
    pool: Arc<ServerPool>,
    remote_addr: Option<SocketAddr>,
}

impl RequestHandler {
    pub fn new(pool: Arc<ServerPool>) -> Self {
        Self {
            pool,
            remote_addr: None,
        }
    }

    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }
}

impl Service<Request<Body>> for RequestHandler {
    type Response = Response<Body>;
    type Error = Box<dyn std::error::Error + Send + Sync>;
    type Future = futures::future::BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let pool = self.pool.clone();
        let remote_addr = self.remote_addr;

        Box::pin(async move {
            if req.method() == Method::GET && req.uri().path() == "/stats" {
                return Ok(stats_response(&pool));
            }

            // Expected early exits (no peer, rate limited) become responses
            // here; the service itself never fails.
            match pool.handle(req, remote_addr).await {
                Ok(response) => Ok(response),
                Err(err) => Ok(err.into()),
            }
        })
    }
}

fn stats_response(pool: &ServerPool) -> Response<Body> {
    match serde_json::to_vec(&pool.stats().snapshot()) {
        Ok(body) => Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap(),
        Err(err) => {
            tracing::error!(%err, "failed to serialize stats snapshot");
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Body::from("stats unavailable"))
                .unwrap()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Algorithm;
    use crate::proxy::{Backend, ServerPool};
    use crate::stats::StatsRegistry;
    use std::time::Duration;
    use url::Url;

    fn handler_for(urls: &[&str]) -> RequestHandler {
        let mut pool = ServerPool::new(Algorithm::RoundRobin, None, Arc::new(StatsRegistry::new()));
        for url in urls {
            pool.add_backend(Arc::new(Backend::new(Url::parse(url).unwrap(), 0, 1)));
        }
        RequestHandler::new(Arc::new(pool))
    }

    #[tokio::test]
    async fn stats_endpoint_serves_json_snapshot() {
        let mut handler = handler_for(&["http://localhost:9001"]);
        handler
            .pool
            .stats()
            .record_request("http://localhost:9001/", Duration::from_millis(4), 500);

        let req = Request::builder()
            .method(Method::GET)
            .uri("/stats")
            .body(Body::empty())
            .unwrap();
        let response = handler.call(req).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");

        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        let entry = &json["http://localhost:9001/"];
        assert_eq!(entry["url"], "http://localhost:9001/");
        assert_eq!(entry["requests"], 1);
        assert_eq!(entry["status_counts"]["500"], 1);
        assert_eq!(entry["failure_rate_pct"], 100.0);
        assert!(entry["avg_latency_ms"].is_number());
        assert!(entry["uptime_pct"].is_number());
        assert!(entry["most_famous_port"].is_string());
    }

    #[tokio::test]
    async fn non_stats_paths_go_through_the_proxy() {
        // Empty pool: the proxy path answers 503, proving /other is not
        // treated as a stats request.
        let mut handler = handler_for(&[]);
        let req = Request::builder()
            .method(Method::GET)
            .uri("/other")
            .body(Body::empty())
            .unwrap();
        let response = handler.call(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn post_to_stats_path_is_proxied_not_served() {
        let mut handler = handler_for(&[]);
        let req = Request::builder()
            .method(Method::POST)
            .uri("/stats")
            .body(Body::empty())
            .unwrap();
        let response = handler.call(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}

