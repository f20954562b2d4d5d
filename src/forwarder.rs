//! Per-request forwarding: translate the inbound exchange into an outbound
//! one, stream the result back, and keep header hygiene in both directions.
//!
//! Bodies are never buffered: the inbound request body is handed to the
//! upstream client as-is, and the upstream response body is handed to the
//! inbound response as-is. Response trailers ride on the body's trailer
//! frames, so passing the body through propagates `grpc-status` and friends
//! after the last data frame with no extra bookkeeping. A client disconnect
//! drops the whole forwarding future, which aborts the outbound exchange.

use hyper::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH, HOST, TRANSFER_ENCODING};
use hyper::{Body, Method, Request, Response, Uri};
use tracing::{debug, error};

use crate::client::UpstreamClient;
use crate::config::Destination;
use crate::error::{Error, Result};
use crate::routing::RouteMatch;

/// Headers scoped to a single transport hop, stripped in both directions.
const HOP_BY_HOP_HEADERS: [&str; 9] = [
    "connection",
    "proxy-connection",
    "keep-alive",
    "transfer-encoding",
    "upgrade",
    "proxy-authenticate",
    "proxy-authorization",
    "trailer",
    "host",
];

fn is_hop_by_hop(name: &HeaderName) -> bool {
    // HeaderName::as_str is guaranteed lowercase
    HOP_BY_HOP_HEADERS.contains(&name.as_str())
}

/// Execute the outbound exchange for one matched request.
pub async fn forward(
    client: &UpstreamClient,
    route_match: &RouteMatch,
    destination: &Destination,
    req: Request<Body>,
) -> Result<Response<Body>> {
    let target = target_uri(
        &destination.base_url,
        &route_match.downstream_path,
        req.uri().query(),
    )?;
    debug!("Forwarding {} {} to {}", req.method(), req.uri().path(), target);

    let outbound = build_outbound(req, &target)?;

    let response = client
        .request(route_match.route.kind, outbound)
        .await
        .map_err(|e| {
            error!("Upstream request to '{}' failed: {}", destination.id, e);
            Error::upstream(&destination.id, e.to_string())
        })?;

    Ok(relay_response(response))
}

/// Combine a destination base URL with the downstream path and query.
///
/// The base path is forced to end with `/`, the downstream path loses its
/// leading `/`, and a query carried by the base is joined to the inbound
/// query with `&`.
pub(crate) fn target_uri(
    base_url: &str,
    downstream_path: &str,
    inbound_query: Option<&str>,
) -> Result<Uri> {
    let base: Uri = base_url
        .parse()
        .map_err(|e| Error::config(format!("invalid destination URL '{}': {}", base_url, e)))?;
    let scheme = base.scheme_str().unwrap_or("http");
    let authority = base
        .authority()
        .ok_or_else(|| Error::config(format!("destination URL '{}' has no authority", base_url)))?;

    let base_path = base.path();
    let mut path = String::with_capacity(base_path.len() + downstream_path.len() + 1);
    path.push_str(base_path);
    if !path.ends_with('/') {
        path.push('/');
    }
    path.push_str(downstream_path.trim_start_matches('/'));

    let query = match (
        base.query().filter(|q| !q.is_empty()),
        inbound_query.filter(|q| !q.is_empty()),
    ) {
        (Some(base_q), Some(inbound_q)) => Some(format!("{}&{}", base_q, inbound_q)),
        (Some(base_q), None) => Some(base_q.to_string()),
        (None, Some(inbound_q)) => Some(inbound_q.to_string()),
        (None, None) => None,
    };

    let uri = match query {
        Some(q) => format!("{}://{}{}?{}", scheme, authority, path, q),
        None => format!("{}://{}{}", scheme, authority, path),
    };
    uri.parse()
        .map_err(|e| Error::internal(format!("failed to build upstream URI '{}': {}", uri, e)))
}

/// Rebuild the inbound request as an outbound one aimed at `target`.
fn build_outbound(req: Request<Body>, target: &Uri) -> Result<Request<Body>> {
    let (parts, body) = req.into_parts();

    let mut builder = Request::builder()
        .method(parts.method.clone())
        .uri(target.clone());

    // Iterating a HeaderMap yields one entry per value, so appending
    // preserves every value of multi-valued headers.
    let headers = builder.headers_mut().unwrap();
    for (name, value) in parts.headers.iter() {
        if !is_hop_by_hop(name) {
            headers.append(name.clone(), value.clone());
        }
    }

    // The backend sees the destination authority, never the client host.
    if let Some(authority) = target.authority() {
        if let Ok(value) = HeaderValue::from_str(authority.as_str()) {
            headers.insert(HOST, value);
        }
    }

    let body = if request_has_body(&parts.method, &parts.headers) {
        body
    } else {
        Body::empty()
    };
    builder.body(body).map_err(Error::from)
}

/// Whether the inbound request carries a body worth streaming upstream.
fn request_has_body(method: &Method, headers: &HeaderMap) -> bool {
    let declared_len = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);
    declared_len > 0
        || headers.contains_key(TRANSFER_ENCODING)
        || matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}

/// Pass the upstream response through, minus hop-by-hop headers.
///
/// The body (and the trailers it carries) is untouched; the outbound
/// transport re-frames, so a leaked `Transfer-Encoding` must not survive.
fn relay_response(response: Response<Body>) -> Response<Body> {
    let (mut parts, body) = response.into_parts();
    let doomed: Vec<HeaderName> = parts
        .headers
        .keys()
        .filter(|&name| is_hop_by_hop(name))
        .cloned()
        .collect();
    for name in doomed {
        parts.headers.remove(name);
    }
    Response::from_parts(parts, body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_uri_joins_paths_with_single_slash() {
        let uri = target_uri("http://backend:7001", "/api/hello", None).unwrap();
        assert_eq!(uri.to_string(), "http://backend:7001/api/hello");

        let uri = target_uri("http://backend:7001/base", "/api/hello", None).unwrap();
        assert_eq!(uri.to_string(), "http://backend:7001/base/api/hello");

        let uri = target_uri("http://backend:7001/base/", "api/hello", None).unwrap();
        assert_eq!(uri.to_string(), "http://backend:7001/base/api/hello");
    }

    #[test]
    fn test_target_uri_merges_queries() {
        let uri = target_uri("http://b:1", "/p", Some("a=1")).unwrap();
        assert_eq!(uri.to_string(), "http://b:1/p?a=1");

        let uri = target_uri("http://b:1/base?fixed=x", "/p", Some("a=1")).unwrap();
        assert_eq!(uri.to_string(), "http://b:1/base/p?fixed=x&a=1");

        let uri = target_uri("http://b:1/base?fixed=x", "/p", None).unwrap();
        assert_eq!(uri.to_string(), "http://b:1/base/p?fixed=x");

        let uri = target_uri("http://b:1", "/p", Some("")).unwrap();
        assert_eq!(uri.to_string(), "http://b:1/p");
    }

    #[test]
    fn test_target_uri_rejects_authorityless_base() {
        assert!(target_uri("/just/a/path", "/p", None).is_err());
    }

    #[test]
    fn test_outbound_strips_hop_by_hop_and_rewrites_host() {
        let req = Request::builder()
            .method(Method::GET)
            .uri("/api/hello")
            .header("host", "proxy.example")
            .header("connection", "x-foo")
            .header("keep-alive", "timeout=5")
            .header("transfer-encoding", "chunked")
            .header("proxy-authorization", "Basic abc")
            .header("x-custom", "v1")
            .header("x-custom", "v2")
            .header("accept", "application/json")
            .body(Body::empty())
            .unwrap();

        let target: Uri = "http://backend:7001/api/hello".parse().unwrap();
        let outbound = build_outbound(req, &target).unwrap();

        assert!(outbound.headers().get("connection").is_none());
        assert!(outbound.headers().get("keep-alive").is_none());
        assert!(outbound.headers().get("transfer-encoding").is_none());
        assert!(outbound.headers().get("proxy-authorization").is_none());
        assert_eq!(outbound.headers().get("host").unwrap(), "backend:7001");
        assert_eq!(outbound.headers().get("accept").unwrap(), "application/json");

        let customs: Vec<_> = outbound.headers().get_all("x-custom").iter().collect();
        assert_eq!(customs, vec!["v1", "v2"]);
    }

    #[test]
    fn test_request_has_body_rules() {
        let empty = HeaderMap::new();
        assert!(!request_has_body(&Method::GET, &empty));
        assert!(!request_has_body(&Method::DELETE, &empty));
        assert!(request_has_body(&Method::POST, &empty));
        assert!(request_has_body(&Method::PUT, &empty));
        assert!(request_has_body(&Method::PATCH, &empty));

        let mut with_len = HeaderMap::new();
        with_len.insert(CONTENT_LENGTH, HeaderValue::from_static("10"));
        assert!(request_has_body(&Method::GET, &with_len));

        let mut zero_len = HeaderMap::new();
        zero_len.insert(CONTENT_LENGTH, HeaderValue::from_static("0"));
        assert!(!request_has_body(&Method::GET, &zero_len));

        let mut chunked = HeaderMap::new();
        chunked.insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        assert!(request_has_body(&Method::GET, &chunked));
    }

    #[test]
    fn test_relay_response_strips_hop_by_hop() {
        let response = Response::builder()
            .status(200)
            .header("transfer-encoding", "chunked")
            .header("connection", "keep-alive")
            .header("content-type", "application/grpc")
            .header("x-backend", "a")
            .body(Body::empty())
            .unwrap();

        let relayed = relay_response(response);
        assert_eq!(relayed.status(), 200);
        assert!(relayed.headers().get("transfer-encoding").is_none());
        assert!(relayed.headers().get("connection").is_none());
        assert_eq!(
            relayed.headers().get("content-type").unwrap(),
            "application/grpc"
        );
        assert_eq!(relayed.headers().get("x-backend").unwrap(), "a");
    }
}
