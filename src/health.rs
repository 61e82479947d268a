use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout};
use tracing::{debug, info, warn};

use crate::entry::now_ms;
use crate::error::{Error, ErrorReporter};
use crate::node::{CacheNode, NodeRegistry};
use crate::ring::ConsistentHashRing;

/// Periodic health sweep. Pings every registered node concurrently and
/// keeps ring membership in sync with the outcome: failing nodes leave
/// the ring, recovered nodes rejoin with their original weight. One
/// node's failure never aborts the sweep for the others.
pub struct HealthChecker {
    check_interval: Duration,
    ping_timeout: Duration,
    registry: Arc<NodeRegistry>,
    ring: Arc<ConsistentHashRing>,
    reporter: Arc<dyn ErrorReporter>,
    shutdown: Arc<AtomicBool>,
}

impl HealthChecker {
    pub fn new(
        check_interval: Duration,
        ping_timeout: Duration,
        registry: Arc<NodeRegistry>,
        ring: Arc<ConsistentHashRing>,
        reporter: Arc<dyn ErrorReporter>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            check_interval,
            ping_timeout,
            registry,
            ring,
            reporter,
            shutdown,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(self) {
        // The first tick completes immediately, so a fresh cache gets a
        // startup sweep before the first full interval elapses.
        let mut ticker = interval(self.check_interval);
        loop {
            ticker.tick().await;
            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }
            self.check_all().await;
        }
        debug!("health checker stopped");
    }

    /// One full sweep; exposed so tests can drive checks without the
    /// timer.
    pub async fn check_all(&self) {
        let nodes = self.registry.all();
        join_all(nodes.iter().map(|node| self.check_node(node))).await;
    }

    async fn check_node(&self, node: &Arc<CacheNode>) {
        let healthy_now = match timeout(self.ping_timeout, node.backend().ping()).await {
            Ok(Ok(alive)) => alive,
            Ok(Err(err)) => {
                self.reporter.report(&err, "health_check", Some(node.id()));
                false
            }
            Err(_) => {
                self.reporter.report(
                    &Error::Timeout(self.ping_timeout),
                    "health_check",
                    Some(node.id()),
                );
                false
            }
        };
        node.mark_checked(now_ms());

        if healthy_now == node.is_healthy() {
            return;
        }
        node.set_healthy(healthy_now);
        if healthy_now {
            self.ring.add_node(node.id(), node.weight());
            info!(node = node.id(), "node recovered, rejoining ring");
        } else {
            self.ring.remove_node(node.id());
            warn!(node = node.id(), "node unhealthy, leaving ring");
        }
    }
}
