//! Static proxy configuration: routes, clusters, and destinations.
//!
//! The configuration is an immutable snapshot built once at startup from the
//! environment. Every request handler reads the same snapshot; nothing in
//! here is mutated after boot.

use anyhow::{bail, Context, Result};
use hyper::Uri;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Environment variable holding the listening port.
pub const ENV_PORT: &str = "PROXY_PORT";
/// Environment variable holding the single HTTP backend URL.
pub const ENV_HTTP_BACKEND: &str = "PROXY_HTTP_BACKEND";
/// Environment variable holding `;`-separated gRPC backend URLs.
pub const ENV_GRPC_BACKENDS: &str = "PROXY_GRPC_BACKENDS";
/// Environment variable toggling TLS termination.
pub const ENV_ENABLE_TLS: &str = "PROXY_ENABLE_TLS";
/// Environment variable holding the server certificate path (PEM).
pub const ENV_TLS_CERT: &str = "PROXY_TLS_CERT";
/// Environment variable holding the server private key path (PEM).
pub const ENV_TLS_KEY: &str = "PROXY_TLS_KEY";

pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_HTTP_BACKEND: &str = "http://localhost:7001";
pub const DEFAULT_GRPC_BACKENDS: &str = "http://localhost:7002;http://localhost:7003";

/// One concrete backend within a cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Destination {
    /// Identifier, unique within the cluster
    pub id: String,
    /// Absolute base URL (scheme, authority, optional base path)
    pub base_url: String,
}

impl Destination {
    pub fn new<S: Into<String>, T: Into<String>>(id: S, base_url: T) -> Self {
        Self {
            id: id.into(),
            base_url: base_url.into(),
        }
    }
}

/// Named, ordered group of equivalent backends.
///
/// Order is significant: it is the rotation order for round-robin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub id: String,
    pub destinations: Vec<Destination>,
}

impl Cluster {
    pub fn new<S: Into<String>>(id: S, destinations: Vec<Destination>) -> Self {
        Self {
            id: id.into(),
            destinations,
        }
    }
}

/// Protocol class of a route, deciding the upstream HTTP version policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteKind {
    /// Plain HTTP: mirror the inbound version, downgrade permitted
    Http,
    /// gRPC: force HTTP/2 upstream
    Grpc,
}

/// Mapping from a path prefix to a cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    /// Normalized path prefix: starts with `/`, no trailing `/` unless it is
    /// exactly `/`
    pub prefix: String,
    /// Identifier of the cluster requests are forwarded to
    pub cluster_id: String,
    pub kind: RouteKind,
    /// Forward only the remainder after the prefix instead of the full path
    pub strip_prefix: bool,
}

impl Route {
    /// Create a route, normalizing the prefix.
    pub fn new<S: Into<String>, T: Into<String>>(
        prefix: S,
        cluster_id: T,
        kind: RouteKind,
        strip_prefix: bool,
    ) -> Self {
        let mut prefix = prefix.into();
        if !prefix.starts_with('/') {
            prefix.insert(0, '/');
        }
        while prefix.len() > 1 && prefix.ends_with('/') {
            prefix.pop();
        }
        Self {
            prefix,
            cluster_id: cluster_id.into(),
            kind,
            strip_prefix,
        }
    }
}

/// The active configuration snapshot shared by all request handlers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub port: u16,
    pub enable_tls: bool,
    pub tls_cert_path: Option<String>,
    pub tls_key_path: Option<String>,
    /// Ordered route table; the matcher uses first-match
    pub routes: Vec<Route>,
    /// Cluster map keyed by lowercased identifier
    clusters: HashMap<String, Cluster>,
}

impl ProxyConfig {
    /// Build a plaintext configuration from explicit routes and clusters.
    pub fn new(routes: Vec<Route>, clusters: Vec<Cluster>) -> Result<Self> {
        let mut map = HashMap::with_capacity(clusters.len());
        for cluster in clusters {
            let key = cluster.id.to_ascii_lowercase();
            if map.insert(key, cluster).is_some() {
                bail!("duplicate cluster identifier");
            }
        }
        let config = Self {
            port: DEFAULT_PORT,
            enable_tls: false,
            tls_cert_path: None,
            tls_key_path: None,
            routes,
            clusters: map,
        };
        config.validate()?;
        Ok(config)
    }

    /// Build the configuration snapshot from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key/value source.
    ///
    /// Split out from [`ProxyConfig::from_env`] so tests never have to
    /// mutate the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let port = match lookup(ENV_PORT) {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .with_context(|| format!("invalid {} value '{}'", ENV_PORT, raw))?,
            None => DEFAULT_PORT,
        };

        let enable_tls = match lookup(ENV_ENABLE_TLS) {
            Some(raw) => parse_bool(&raw)
                .with_context(|| format!("invalid {} value '{}'", ENV_ENABLE_TLS, raw))?,
            None => true,
        };

        let http_backend =
            lookup(ENV_HTTP_BACKEND).unwrap_or_else(|| DEFAULT_HTTP_BACKEND.to_string());
        let grpc_backends =
            lookup(ENV_GRPC_BACKENDS).unwrap_or_else(|| DEFAULT_GRPC_BACKENDS.to_string());

        let api_cluster = Cluster::new("api", vec![Destination::new("api-0", http_backend)]);
        let grpc_destinations: Vec<Destination> = grpc_backends
            .split(';')
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .enumerate()
            .map(|(i, url)| Destination::new(format!("grpc-{}", i), url))
            .collect();
        let grpc_cluster = Cluster::new("grpc", grpc_destinations);

        // The built-in route table. Order matters: first match wins.
        let routes = vec![
            Route::new("/api/", "api", RouteKind::Http, false),
            Route::new("/grpc/", "grpc", RouteKind::Grpc, true),
        ];

        let mut config = Self::new(routes, vec![api_cluster, grpc_cluster])?;
        config.port = port;
        config.enable_tls = enable_tls;
        config.tls_cert_path = lookup(ENV_TLS_CERT);
        config.tls_key_path = lookup(ENV_TLS_KEY);
        config.validate()?;
        Ok(config)
    }

    /// Look up a cluster by identifier, case-insensitively.
    pub fn cluster(&self, id: &str) -> Option<&Cluster> {
        self.clusters.get(&id.to_ascii_lowercase())
    }

    /// Validate the snapshot, failing boot on anything unroutable.
    ///
    /// An empty destination list is deliberately NOT rejected here: it is
    /// answered with a 502 per request so an externally mutated cluster
    /// cannot keep the process from starting.
    pub fn validate(&self) -> Result<()> {
        for route in &self.routes {
            if self.cluster(&route.cluster_id).is_none() {
                bail!(
                    "route '{}' references unknown cluster '{}'",
                    route.prefix,
                    route.cluster_id
                );
            }
        }
        for cluster in self.clusters.values() {
            for destination in &cluster.destinations {
                let uri: Uri = destination.base_url.parse().with_context(|| {
                    format!(
                        "destination '{}' in cluster '{}' has malformed URL '{}'",
                        destination.id, cluster.id, destination.base_url
                    )
                })?;
                if uri.authority().is_none() {
                    bail!(
                        "destination '{}' in cluster '{}' URL '{}' has no authority",
                        destination.id,
                        cluster.id,
                        destination.base_url
                    );
                }
                match uri.scheme_str() {
                    Some("http") | Some("https") => {}
                    other => bail!(
                        "destination '{}' in cluster '{}' has unsupported scheme {:?}",
                        destination.id,
                        cluster.id,
                        other
                    ),
                }
            }
        }
        if self.enable_tls && (self.tls_cert_path.is_none() || self.tls_key_path.is_none()) {
            bail!(
                "TLS is enabled but {} / {} are not both set",
                ENV_TLS_CERT,
                ENV_TLS_KEY
            );
        }
        Ok(())
    }
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => bail!("expected a boolean, got '{}'", other),
    }
}
