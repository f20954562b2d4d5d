//! Per-request entry point.
//!
//! Decides whether a request is a health probe, a proxied request, or
//! unroutable, then runs matcher -> cluster lookup -> balancer -> forwarder.
//! Every failure is rendered as a response here; the handler itself is
//! infallible so the server loop never sees an error it cannot answer.

use std::convert::Infallible;
use std::sync::Arc;

use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Body, Method, Request, Response, StatusCode, Version};
use tracing::{error, warn};

use crate::balancer::{Balancer, RoundRobinBalancer};
use crate::client::UpstreamClient;
use crate::config::ProxyConfig;
use crate::forwarder;
use crate::routing::{self, RouteMatch, RouteMatcher};

/// Shared per-process state handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ProxyConfig>,
    pub matcher: Arc<RouteMatcher>,
    pub balancer: Arc<dyn Balancer>,
    pub client: UpstreamClient,
}

impl AppState {
    pub fn new(config: Arc<ProxyConfig>) -> Self {
        let matcher = Arc::new(RouteMatcher::new(config.routes.clone()));
        Self {
            config,
            matcher,
            balancer: Arc::new(RoundRobinBalancer::new()),
            client: UpstreamClient::new(),
        }
    }
}

/// Handle one inbound request.
pub async fn handle(state: AppState, req: Request<Body>) -> Result<Response<Body>, Infallible> {
    let path = req.uri().path();

    // Health endpoints are served locally, never proxied. Readiness is
    // unconditional once the listener is up.
    if req.method() == Method::GET {
        if path == "/health/live" {
            return Ok(health_response("live"));
        }
        if path == "/health/ready" {
            return Ok(health_response("ready"));
        }
    }

    let matched = match classify(&state, &req) {
        Some(matched) => matched,
        None => {
            warn!("No matching route for {} {}", req.method(), path);
            return Ok(text_response(StatusCode::NOT_FOUND, "No matching route"));
        }
    };

    let cluster = match state.config.cluster(&matched.route.cluster_id) {
        Some(cluster) => cluster,
        None => {
            error!(
                "Route '{}' resolved to missing cluster '{}'",
                matched.route.prefix, matched.route.cluster_id
            );
            return Ok(text_response(StatusCode::BAD_GATEWAY, "Cluster unavailable"));
        }
    };

    let destination = match state.balancer.pick(cluster, &req) {
        Ok(destination) => destination,
        Err(e) => {
            error!("Destination selection failed: {}", e);
            return Ok(text_response(StatusCode::BAD_GATEWAY, "Cluster unavailable"));
        }
    };

    match forwarder::forward(&state.client, &matched, &destination, req).await {
        Ok(response) => Ok(response),
        Err(e) => {
            error!("Forwarding failed: {}", e);
            Ok(text_response(StatusCode::BAD_GATEWAY, "Bad Gateway"))
        }
    }
}

/// Match the request against the route table, applying the gRPC fallback.
///
/// An HTTP/2 `application/grpc` request whose path is not already under the
/// gRPC route's prefix is matched as if that prefix were prepended, so gRPC
/// clients can address the proxy as the service itself.
fn classify(state: &AppState, req: &Request<Body>) -> Option<RouteMatch> {
    let path = req.uri().path();
    if wants_grpc_fallback(state, req) {
        return state.matcher.grpc_fallback(path);
    }
    state.matcher.find(path)
}

fn wants_grpc_fallback(state: &AppState, req: &Request<Body>) -> bool {
    if req.version() != Version::HTTP_2 {
        return false;
    }
    let is_grpc = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("application/grpc"))
        .unwrap_or(false);
    if !is_grpc {
        return false;
    }
    match state.matcher.grpc_route() {
        Some(route) => routing::prefix_remainder(req.uri().path(), &route.prefix).is_none(),
        None => false,
    }
}

fn health_response(status: &str) -> Response<Body> {
    let body = serde_json::json!({ "status": status }).to_string();
    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
        .body(Body::from(body))
        .unwrap()
}

fn text_response(status: StatusCode, message: &str) -> Response<Body> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, HeaderValue::from_static("text/plain"))
        .body(Body::from(message.to_string()))
        .unwrap()
}
