//! Fleet directory — read-facing adapter over the repository.
//!
//! Every checker reads services and instances through the directory, which
//! re-reads the repository on each call. Liveness and capacity are
//! time-sensitive, so nothing is cached.

use std::sync::Arc;

use fleetgrid_state::{ComputeNode, Instance, ServiceRecord};

use crate::config::SchedulerConfig;
use crate::error::{SchedulerError, SchedulerResult};
use crate::liveness::LivenessTracker;
use crate::repository::FleetRepository;

/// Read-only view of the fleet used by the scheduler's checks.
#[derive(Clone)]
pub struct FleetDirectory {
    repo: Arc<dyn FleetRepository>,
    liveness: LivenessTracker,
    compute_topic: String,
    volume_topic: String,
}

impl FleetDirectory {
    /// Create a directory over `repo` using the configured topics and down time.
    pub fn new(repo: Arc<dyn FleetRepository>, config: &SchedulerConfig) -> Self {
        Self {
            repo,
            liveness: LivenessTracker::new(config.service_down_time),
            compute_topic: config.compute_topic.clone(),
            volume_topic: config.volume_topic.clone(),
        }
    }

    pub fn repository(&self) -> &Arc<dyn FleetRepository> {
        &self.repo
    }

    pub fn compute_topic(&self) -> &str {
        &self.compute_topic
    }

    pub fn volume_topic(&self) -> &str {
        &self.volume_topic
    }

    /// Whether a service is up according to the configured threshold.
    pub fn is_up(&self, service: &ServiceRecord) -> bool {
        self.liveness.is_up(service)
    }

    /// Every service registered under `topic`.
    pub fn services_by_topic(&self, topic: &str) -> SchedulerResult<Vec<ServiceRecord>> {
        Ok(self.repo.services_by_topic(topic)?)
    }

    /// Compute services on `host`. Fails with `NotFound` if there are none.
    pub fn compute_services_by_host(&self, host: &str) -> SchedulerResult<Vec<ServiceRecord>> {
        let services: Vec<ServiceRecord> = self
            .repo
            .get_service(&self.compute_topic, host)?
            .into_iter()
            .collect();
        if services.is_empty() {
            return Err(SchedulerError::NotFound(format!(
                "host {host} has no {} service",
                self.compute_topic
            )));
        }
        Ok(services)
    }

    /// The compute service on `host`.
    pub fn compute_service(&self, host: &str) -> SchedulerResult<ServiceRecord> {
        let mut services = self.compute_services_by_host(host)?;
        Ok(services.swap_remove(0))
    }

    /// Hosts with an up service for `topic`, in no particular order.
    pub fn live_hosts(&self, topic: &str) -> SchedulerResult<Vec<String>> {
        let hosts = self
            .services_by_topic(topic)?
            .into_iter()
            .filter(|svc| self.liveness.is_up(svc))
            .map(|svc| svc.host)
            .collect();
        Ok(hosts)
    }

    /// Load an instance. Fails with `NotFound` if it does not exist.
    pub fn instance(&self, instance_id: &str) -> SchedulerResult<Instance> {
        self.repo
            .get_instance(instance_id)?
            .ok_or_else(|| SchedulerError::NotFound(format!("instance {instance_id}")))
    }
}

/// The compute node details of a compute service.
pub fn compute_node(service: &ServiceRecord) -> SchedulerResult<&ComputeNode> {
    service.compute.as_ref().ok_or_else(|| {
        SchedulerError::NotFound(format!(
            "compute node record for {} service on {}",
            service.topic, service.host
        ))
    })
}
