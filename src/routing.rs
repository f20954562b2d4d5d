//! Route matching: an ordered prefix table with first-match semantics.
//!
//! Matching is a linear scan over a small configured list, which keeps the
//! first-match rule obvious. Comparison is case-insensitive and
//! segment-bounded: `/api` matches `/api` and `/api/x` but never `/apix`.

use crate::config::{Route, RouteKind};

/// Outcome of a successful match.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub route: Route,
    /// Path portion strictly after the prefix, normalized to `/` when empty
    pub remainder: String,
    /// What the forwarder appends to the destination base: the remainder
    /// when the route strips its prefix, the original path otherwise
    pub downstream_path: String,
}

/// First-match prefix matcher over the configured route table.
#[derive(Debug, Clone)]
pub struct RouteMatcher {
    routes: Vec<Route>,
}

impl RouteMatcher {
    pub fn new(routes: Vec<Route>) -> Self {
        Self { routes }
    }

    /// Return the first route whose prefix segment-matches `path`.
    ///
    /// Absence of a match is an expected outcome, not an error.
    pub fn find(&self, path: &str) -> Option<RouteMatch> {
        for route in &self.routes {
            if let Some(rest) = prefix_remainder(path, &route.prefix) {
                let remainder = if rest.is_empty() {
                    "/".to_string()
                } else {
                    rest.to_string()
                };
                let downstream_path = if route.strip_prefix {
                    remainder.clone()
                } else {
                    path.to_string()
                };
                return Some(RouteMatch {
                    route: route.clone(),
                    remainder,
                    downstream_path,
                });
            }
        }
        None
    }

    /// Synthetic match against the gRPC route, treating the request path as
    /// the downstream path.
    ///
    /// Used when an `application/grpc` request arrives without the gRPC
    /// route's prefix: the caller addressed the proxy as if it were the
    /// backend service itself.
    pub fn grpc_fallback(&self, path: &str) -> Option<RouteMatch> {
        let route = self.grpc_route()?;
        Some(RouteMatch {
            route: route.clone(),
            remainder: path.to_string(),
            downstream_path: path.to_string(),
        })
    }

    /// The first configured gRPC route, if any.
    pub fn grpc_route(&self) -> Option<&Route> {
        self.routes.iter().find(|r| r.kind == RouteKind::Grpc)
    }
}

/// Check whether `prefix` segment-matches `path`, returning the remainder.
///
/// Returns `Some("")` for an exact match, `Some("/rest")` when the prefix is
/// followed by a path separator, and `None` otherwise.
pub(crate) fn prefix_remainder<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    let head = path.get(..prefix.len())?;
    if !head.eq_ignore_ascii_case(prefix) {
        return None;
    }
    let rest = &path[prefix.len()..];
    if rest.is_empty() || rest.starts_with('/') {
        Some(rest)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher() -> RouteMatcher {
        RouteMatcher::new(vec![
            Route::new("/api/", "api", RouteKind::Http, false),
            Route::new("/grpc/", "grpc", RouteKind::Grpc, true),
        ])
    }

    #[test]
    fn test_prefix_match_is_segment_bounded() {
        let m = matcher();
        assert!(m.find("/api").is_some());
        assert!(m.find("/api/hello").is_some());
        assert!(m.find("/apix").is_none());
        assert!(m.find("/apix/hello").is_none());
        assert!(m.find("/ap").is_none());
    }

    #[test]
    fn test_matching_is_case_insensitive() {
        let m = matcher();
        let matched = m.find("/API/Hello").unwrap();
        assert_eq!(matched.route.cluster_id, "api");
        assert_eq!(matched.remainder, "/Hello");
    }

    #[test]
    fn test_first_match_wins() {
        let m = RouteMatcher::new(vec![
            Route::new("/a", "outer", RouteKind::Http, false),
            Route::new("/a/b", "inner", RouteKind::Http, false),
        ]);
        assert_eq!(m.find("/a/b/x").unwrap().route.cluster_id, "outer");

        let m = RouteMatcher::new(vec![
            Route::new("/a/b", "inner", RouteKind::Http, false),
            Route::new("/a", "outer", RouteKind::Http, false),
        ]);
        assert_eq!(m.find("/a/b/x").unwrap().route.cluster_id, "inner");
    }

    #[test]
    fn test_empty_remainder_normalizes_to_slash() {
        let m = matcher();
        let matched = m.find("/grpc").unwrap();
        assert_eq!(matched.remainder, "/");
        assert_eq!(matched.downstream_path, "/");
    }

    #[test]
    fn test_strip_prefix_controls_downstream_path() {
        let m = matcher();

        // HTTP route keeps the full path
        let matched = m.find("/api/hello").unwrap();
        assert_eq!(matched.remainder, "/hello");
        assert_eq!(matched.downstream_path, "/api/hello");

        // gRPC route forwards only the remainder
        let matched = m.find("/grpc/greeter.Greeter/SayHello").unwrap();
        assert_eq!(matched.remainder, "/greeter.Greeter/SayHello");
        assert_eq!(matched.downstream_path, "/greeter.Greeter/SayHello");
    }

    #[test]
    fn test_no_match_returns_none() {
        assert!(matcher().find("/nope").is_none());
        assert!(matcher().find("/").is_none());
    }

    #[test]
    fn test_grpc_fallback_uses_request_path_downstream() {
        let m = matcher();
        let matched = m.grpc_fallback("/greeter.Greeter/SayHello").unwrap();
        assert_eq!(matched.route.cluster_id, "grpc");
        assert_eq!(matched.downstream_path, "/greeter.Greeter/SayHello");
    }

    #[test]
    fn test_grpc_fallback_absent_without_grpc_route() {
        let m = RouteMatcher::new(vec![Route::new("/api/", "api", RouteKind::Http, false)]);
        assert!(m.grpc_fallback("/x").is_none());
        assert!(m.grpc_route().is_none());
    }
}
