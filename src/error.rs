//! Error types and result handling for quay-gateway.

use std::fmt;

/// Errors produced on the request path.
///
/// Boot-time problems (bad environment values, unreadable TLS material)
/// are reported through `anyhow` instead and abort startup; this type only
/// covers conditions that must be mapped to a response status.
#[derive(Debug, Clone)]
pub enum Error {
    /// The cluster has no destinations to pick from
    ClusterUnavailable { cluster: String },
    /// The upstream exchange failed before response headers arrived
    Upstream {
        destination: String,
        message: String,
    },
    /// A destination base URL could not be combined into a target URL
    Config { message: String },
    /// Request composition failed inside the forwarder
    Internal { message: String },
}

impl Error {
    /// Create a cluster-unavailable error
    pub fn cluster_unavailable<S: Into<String>>(cluster: S) -> Self {
        Self::ClusterUnavailable {
            cluster: cluster.into(),
        }
    }

    /// Create an upstream transport error
    pub fn upstream<S: Into<String>, T: Into<String>>(destination: S, message: T) -> Self {
        Self::Upstream {
            destination: destination.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Check if this is an upstream transport error
    pub fn is_upstream(&self) -> bool {
        matches!(self, Self::Upstream { .. })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClusterUnavailable { cluster } => {
                write!(f, "Cluster '{}' has no destinations", cluster)
            }
            Self::Upstream {
                destination,
                message,
            } => {
                write!(f, "Upstream request to '{}' failed: {}", destination, message)
            }
            Self::Config { message } => {
                write!(f, "Configuration error: {}", message)
            }
            Self::Internal { message } => {
                write!(f, "Internal error: {}", message)
            }
        }
    }
}

impl std::error::Error for Error {}

impl From<hyper::http::Error> for Error {
    fn from(err: hyper::http::Error) -> Self {
        Self::internal(err.to_string())
    }
}

/// Result type alias for request-path operations.
pub type Result<T> = std::result::Result<T, Error>;
