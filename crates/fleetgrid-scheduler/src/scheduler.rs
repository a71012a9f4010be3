//! Placement policies.
//!
//! Every policy implements [`Scheduler`]: host enumeration comes for free
//! from the fleet directory, and `schedule` is the policy itself.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::capacity::has_capacity;
use crate::directory::{FleetDirectory, compute_node};
use crate::error::{SchedulerError, SchedulerResult};
use crate::load_balancer::RoundRobinBalancer;

/// Where a request was placed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub topic: String,
    pub host: String,
}

/// What a placement must satisfy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementRequest {
    /// Memory the new workload needs, checked against compute nodes.
    #[serde(default)]
    pub memory_mb: Option<u64>,
}

/// A placement policy.
pub trait Scheduler: Send + Sync {
    fn directory(&self) -> &FleetDirectory;

    /// Hosts with an up service for `topic`.
    fn live_hosts(&self, topic: &str) -> SchedulerResult<Vec<String>> {
        self.directory().live_hosts(topic)
    }

    /// Choose a host for `request` on `topic`.
    fn schedule(&self, topic: &str, request: &PlacementRequest) -> SchedulerResult<Placement>;
}

/// Spreads placements over live hosts in turn.
///
/// Hosts are sorted so the rotation is stable while membership is. With a
/// memory requirement, compute hosts without strict headroom are skipped.
pub struct RoundRobinScheduler {
    directory: FleetDirectory,
    balancer: RoundRobinBalancer,
}

impl RoundRobinScheduler {
    pub fn new(directory: FleetDirectory) -> Self {
        Self {
            directory,
            balancer: RoundRobinBalancer::new(),
        }
    }

    fn candidates(&self, topic: &str, request: &PlacementRequest) -> SchedulerResult<Vec<String>> {
        let mut hosts = self.live_hosts(topic)?;
        if let Some(memory_mb) = request.memory_mb {
            hosts.retain(|host| {
                self.directory
                    .compute_service(host)
                    .ok()
                    .and_then(|svc| compute_node(&svc).ok().map(|n| has_capacity(n, memory_mb)))
                    .unwrap_or(false)
            });
        }
        hosts.sort();
        Ok(hosts)
    }
}

impl Scheduler for RoundRobinScheduler {
    fn directory(&self) -> &FleetDirectory {
        &self.directory
    }

    fn schedule(&self, topic: &str, request: &PlacementRequest) -> SchedulerResult<Placement> {
        let hosts = self.candidates(topic, request)?;
        let host = self
            .balancer
            .pick(&hosts)
            .ok_or_else(|| SchedulerError::NoValidHost(topic.to_string()))?;
        debug!(%topic, %host, candidates = hosts.len(), "placed");
        Ok(Placement {
            topic: topic.to_string(),
            host: host.to_string(),
        })
    }
}
