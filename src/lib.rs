//! quay-gateway: an in-process reverse proxy for HTTP/1.1 exchanges and
//! gRPC-over-HTTP/2 calls, with first-match prefix routing and round-robin
//! load balancing across statically configured clusters.

pub mod balancer;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod forwarder;
pub mod routing;
pub mod server;

pub use balancer::{Balancer, RoundRobinBalancer};
pub use config::{Cluster, Destination, ProxyConfig, Route, RouteKind};
pub use dispatch::AppState;
pub use error::{Error, Result};

/// Crate version, surfaced in startup logs.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
