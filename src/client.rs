//! The shared upstream HTTP client.
//!
//! hyper negotiates the HTTP version per connection, not per request, so the
//! "one client, per-request version policy" contract is carried by a pair of
//! pooled clients behind one handle: a general ALPN client for everything
//! that may downgrade, and a prior-knowledge HTTP/2 client for cleartext
//! gRPC destinations where HTTP/2 must not be negotiated away.
//!
//! Neither pool applies a request timeout, follows redirects, keeps cookies,
//! or decompresses bodies: the caller must see exactly what the backend sent,
//! and cancellation is driven by the inbound connection.

use hyper::client::HttpConnector;
use hyper::{Body, Client, Request, Response};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use std::time::Duration;

use crate::config::RouteKind;

#[derive(Debug, Clone)]
pub struct UpstreamClient {
    /// `http` and `https` destinations, HTTP/1.1 or ALPN-negotiated HTTP/2
    general: Client<HttpsConnector<HttpConnector>, Body>,
    /// Prior-knowledge HTTP/2 over cleartext, for plaintext gRPC backends
    h2_prior: Client<HttpConnector, Body>,
}

impl UpstreamClient {
    pub fn new() -> Self {
        let https_connector = HttpsConnectorBuilder::new()
            .with_native_roots()
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .build();

        let general = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(100)
            .http2_adaptive_window(true)
            .http2_keep_alive_interval(Duration::from_secs(30))
            .build(https_connector);

        let mut plain_connector = HttpConnector::new();
        plain_connector.set_nodelay(true);

        let h2_prior = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(100)
            .http2_only(true)
            .http2_adaptive_window(true)
            .http2_keep_alive_interval(Duration::from_secs(30))
            .build(plain_connector);

        Self { general, h2_prior }
    }

    /// Dispatch `req` on the pool matching the route's version policy.
    ///
    /// gRPC routes force HTTP/2: prior knowledge on cleartext, ALPN on TLS.
    /// HTTP routes use the general pool, which permits downgrade to the
    /// version the destination actually speaks.
    pub async fn request(
        &self,
        kind: RouteKind,
        req: Request<Body>,
    ) -> hyper::Result<Response<Body>> {
        let cleartext = req.uri().scheme_str() != Some("https");
        match kind {
            RouteKind::Grpc if cleartext => self.h2_prior.request(req).await,
            _ => self.general.request(req).await,
        }
    }
}

impl Default for UpstreamClient {
    fn default() -> Self {
        Self::new()
    }
}
