//! Destination selection.
//!
//! Round-robin is the only shipped strategy. The trait seam exists so a
//! sticky-by-header or weighted strategy can slot in without touching the
//! dispatcher, which is also why `pick` receives the request even though
//! round-robin ignores it.

use dashmap::DashMap;
use hyper::{Body, Request};
use std::sync::atomic::{AtomicI64, Ordering};

use crate::config::{Cluster, Destination};
use crate::error::{Error, Result};

/// Picks one destination from a cluster per call.
pub trait Balancer: Send + Sync {
    fn pick(&self, cluster: &Cluster, req: &Request<Body>) -> Result<Destination>;
}

/// Cycles through a cluster's destinations in configuration order.
///
/// One atomic counter per cluster identifier, created lazily on first pick.
/// Safe for concurrent use: `fetch_add` hands every caller a distinct ticket.
#[derive(Debug, Default)]
pub struct RoundRobinBalancer {
    counters: DashMap<String, AtomicI64>,
}

impl RoundRobinBalancer {
    pub fn new() -> Self {
        Self {
            counters: DashMap::new(),
        }
    }
}

impl Balancer for RoundRobinBalancer {
    fn pick(&self, cluster: &Cluster, _req: &Request<Body>) -> Result<Destination> {
        // The destination count is read per pick, so a snapshot with a
        // different cluster size takes effect on the next selection.
        let len = cluster.destinations.len();
        if len == 0 {
            return Err(Error::cluster_unavailable(&cluster.id));
        }
        let counter = self
            .counters
            .entry(cluster.id.clone())
            .or_insert_with(|| AtomicI64::new(0));
        let ticket = counter.fetch_add(1, Ordering::Relaxed);
        // rem_euclid keeps the index in [0, len) after the counter wraps
        // past i64::MAX into negative territory.
        let index = ticket.rem_euclid(len as i64) as usize;
        Ok(cluster.destinations[index].clone())
    }
}
