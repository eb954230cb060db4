// Recompute routing - maps incoming observations to the aggregate buckets they invalidate
use crate::domain::series::Series;
use crate::domain::time_bucket::{TimeBucket, TimeSpan};
use crate::domain::topology::Topology;
use serde::Serialize;

/// One aggregate bucket that has to be recomputed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecomputeRequest {
    pub target: Series,
    pub bucket: TimeBucket,
}

/// Owns a topology snapshot and the per-edge debounce state. Not shared:
/// callers serialize observations through one router.
pub struct RecomputeRouter {
    topology: Topology,
}

impl RecomputeRouter {
    pub fn new(mut topology: Topology) -> Self {
        topology.reindex_sources();
        Self { topology }
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Routes an observation of the feed at `locator` to every edge it
    /// feeds. Unknown locators produce no requests.
    pub fn on_observation(&mut self, locator: &str, phenomenon_time: TimeSpan) -> Vec<RecomputeRequest> {
        let keys = self.topology.edges_for_source(locator).to_vec();
        let mut requests = Vec::new();
        for key in keys {
            let Some(edge) = self.topology.edge_mut(&key) else {
                continue;
            };
            for bucket in edge.calculate_buckets(phenomenon_time) {
                requests.push(RecomputeRequest {
                    target: edge.target().clone(),
                    bucket,
                });
            }
        }
        if !requests.is_empty() {
            tracing::debug!(locator, count = requests.len(), "Recompute requested");
        }
        requests
    }

    /// Closes every tracker, returning the buckets that were still open.
    pub fn flush(&mut self) -> Vec<RecomputeRequest> {
        let mut requests = Vec::new();
        for group in self.topology.groups_mut() {
            for edge in group.edges_mut() {
                if let Some(bucket) = edge.flush() {
                    requests.push(RecomputeRequest {
                        target: edge.target().clone(),
                        bucket,
                    });
                }
            }
        }
        requests
    }
}
