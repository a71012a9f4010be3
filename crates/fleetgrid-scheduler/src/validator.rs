//! Live-migration validation.
//!
//! `validate` runs the checks a live migration needs before any data moves,
//! strictly in order, and stops at the first failure:
//!
//! ```text
//! Requested ── source check ──▶ SourceChecked
//!           ── destination check ──▶ DestChecked
//!           ── shared storage + compatibility ──▶ CommonChecked
//!           ── state batch ──▶ Transitioned
//! ```
//!
//! Source and destination checks read the repository only; agent RPCs are
//! issued only in the common phase. Nothing is written before the final
//! transition, so a failed or dropped validation leaves no trace. The
//! transition itself is refused if the instance changed while the agents
//! were being consulted.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use fleetgrid_state::{Instance, PowerState, ServiceRecord};
use tracing::{debug, info, warn};

use crate::capacity::check_capacity;
use crate::compat::CompatibilityChecker;
use crate::config::SchedulerConfig;
use crate::directory::{FleetDirectory, compute_node};
use crate::error::{SchedulerError, SchedulerResult};
use crate::repository::FleetRepository;
use crate::rpc::{AgentClient, AgentTransport};
use crate::storage_probe::SharedStorageProber;
use crate::transition::{RUNNING, WorkloadStateTransitioner};

/// How far a validation got.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MigrationPhase {
    Requested,
    SourceChecked,
    DestChecked,
    CommonChecked,
    Transitioned,
}

/// Validates live migrations and marks accepted ones as in progress.
pub struct LiveMigrationValidator {
    directory: FleetDirectory,
    prober: SharedStorageProber,
    compat: CompatibilityChecker,
    transitioner: WorkloadStateTransitioner,
    /// Instance ids with a validation currently running.
    in_flight: Mutex<HashSet<String>>,
}

impl LiveMigrationValidator {
    pub fn new(
        repo: Arc<dyn FleetRepository>,
        transport: Arc<dyn AgentTransport>,
        config: &SchedulerConfig,
    ) -> Self {
        let directory = FleetDirectory::new(repo.clone(), config);
        let compute = AgentClient::new(transport, &config.compute_topic, config.rpc_timeout);
        Self {
            prober: SharedStorageProber::new(compute.clone()),
            compat: CompatibilityChecker::new(directory.clone(), compute),
            transitioner: WorkloadStateTransitioner::new(repo),
            directory,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn directory(&self) -> &FleetDirectory {
        &self.directory
    }

    /// Validate moving `instance_id` to `dest` and, if every check passes,
    /// mark it migrating. Returns the host the instance is on now; the
    /// caller sends the actual transfer request there.
    ///
    /// A second call for an instance whose validation has not finished
    /// fails with `InProgress`.
    pub async fn validate(&self, instance_id: &str, dest: &str) -> SchedulerResult<String> {
        let _guard = self.claim(instance_id)?;
        debug!(%instance_id, %dest, phase = ?MigrationPhase::Requested, "validating live migration");

        let instance = self.directory.instance(instance_id)?;

        self.check_source(&instance)?;
        debug!(%instance_id, phase = ?MigrationPhase::SourceChecked, "source ok");

        self.check_destination(&instance, dest)?;
        debug!(%instance_id, phase = ?MigrationPhase::DestChecked, "destination ok");

        self.check_common(&instance, dest).await?;
        debug!(%instance_id, phase = ?MigrationPhase::CommonChecked, "common checks ok");

        self.transitioner.begin_migration(&instance)?;
        info!(
            %instance_id,
            source = %instance.host,
            %dest,
            phase = ?MigrationPhase::Transitioned,
            "live migration accepted"
        );
        Ok(instance.host)
    }

    fn check_source(&self, instance: &Instance) -> SchedulerResult<()> {
        if instance.power_state != PowerState::Running || instance.state_description != RUNNING {
            return Err(SchedulerError::Invalid(format!(
                "instance {} ({}) is not running",
                instance.hostname, instance.id
            )));
        }

        if !instance.volumes.is_empty() {
            let volume_topic = self.directory.volume_topic();
            let first = self.directory.services_by_topic(volume_topic)?.into_iter().next();
            match first {
                Some(svc) if self.directory.is_up(&svc) => {}
                _ => {
                    warn!(instance_id = %instance.id, "volume node down");
                    return Err(SchedulerError::Invalid(
                        "volume node is not alive (time synchronize problem?)".to_string(),
                    ));
                }
            }
        }

        self.live_compute_service(&instance.host)?;
        Ok(())
    }

    fn check_destination(&self, instance: &Instance, dest: &str) -> SchedulerResult<()> {
        let service = self.live_compute_service(dest)?;

        if dest == instance.host {
            return Err(SchedulerError::Invalid(format!(
                "{} is already running on {dest}",
                instance.hostname
            )));
        }

        check_capacity(compute_node(&service)?, dest, instance)
    }

    async fn check_common(&self, instance: &Instance, dest: &str) -> SchedulerResult<()> {
        if !self.prober.shares_storage(&instance.host, dest).await? {
            return Err(SchedulerError::Invalid(format!(
                "{} and {dest} do not share instance storage",
                instance.host
            )));
        }
        self.compat.check_compatible(&instance.launched_on, dest).await
    }

    /// The compute service on `host`, which must be registered and up.
    fn live_compute_service(&self, host: &str) -> SchedulerResult<ServiceRecord> {
        let service = self.directory.compute_service(host).map_err(|e| match e {
            SchedulerError::NotFound(_) => {
                SchedulerError::Invalid(format!("host {host} has no compute service"))
            }
            other => other,
        })?;
        if !self.directory.is_up(&service) {
            warn!(%host, "compute service down");
            return Err(SchedulerError::Invalid(format!(
                "{host} is not alive (time synchronize problem?)"
            )));
        }
        Ok(service)
    }

    fn claim(&self, instance_id: &str) -> SchedulerResult<InFlightGuard<'_>> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|p| p.into_inner());
        if !in_flight.insert(instance_id.to_string()) {
            return Err(SchedulerError::InProgress(instance_id.to_string()));
        }
        Ok(InFlightGuard {
            in_flight: &self.in_flight,
            instance_id: instance_id.to_string(),
        })
    }
}

/// Releases an instance's in-flight claim when dropped.
struct InFlightGuard<'a> {
    in_flight: &'a Mutex<HashSet<String>>,
    instance_id: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|p| p.into_inner());
        in_flight.remove(&self.instance_id);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use fleetgrid_state::*;

    use super::*;
    use crate::liveness::epoch_secs;
    use crate::transport::LocalTransport;

    fn validator(state: &StateStore) -> LiveMigrationValidator {
        let config = SchedulerConfig::new(Duration::from_secs(1));
        LiveMigrationValidator::new(
            Arc::new(state.clone()),
            Arc::new(LocalTransport::new()),
            &config,
        )
    }

    fn compute(state: &StateStore, host: &str, heartbeat: u64) {
        state
            .put_service(&ServiceRecord {
                host: host.to_string(),
                topic: COMPUTE_TOPIC.to_string(),
                created_at: 0,
                updated_at: Some(heartbeat),
                compute: Some(ComputeNode {
                    memory_mb: 4096,
                    memory_mb_used: 0,
                    hypervisor_type: "QEMU".to_string(),
                    hypervisor_version: 1,
                    cpu_info: "{}".to_string(),
                }),
            })
            .unwrap();
    }

    fn instance(state: &StateStore, power_state: PowerState, description: &str) {
        state
            .put_instance(&Instance {
                id: "1".to_string(),
                hostname: "web-1".to_string(),
                power_state,
                state_description: description.to_string(),
                host: "host-a".to_string(),
                launched_on: "host-a".to_string(),
                memory_mb: 512,
                volumes: Vec::new(),
            })
            .unwrap();
    }

    #[test]
    fn phases_are_ordered() {
        assert!(MigrationPhase::Requested < MigrationPhase::SourceChecked);
        assert!(MigrationPhase::DestChecked < MigrationPhase::CommonChecked);
        assert!(MigrationPhase::CommonChecked < MigrationPhase::Transitioned);
    }

    #[tokio::test]
    async fn missing_instance_is_not_found() {
        let state = StateStore::open_in_memory().unwrap();
        let err = validator(&state).validate("nope", "host-b").await.unwrap_err();
        assert!(matches!(err, SchedulerError::NotFound(_)));
    }

    #[tokio::test]
    async fn running_power_state_needs_running_description() {
        let state = StateStore::open_in_memory().unwrap();
        compute(&state, "host-a", epoch_secs());
        compute(&state, "host-b", epoch_secs());
        instance(&state, PowerState::Running, "rebooting");

        let err = validator(&state).validate("1", "host-b").await.unwrap_err();
        assert!(matches!(err, SchedulerError::Invalid(ref m) if m.contains("not running")));
    }

    #[tokio::test]
    async fn stale_source_host_is_invalid() {
        let state = StateStore::open_in_memory().unwrap();
        compute(&state, "host-a", epoch_secs() - 3600);
        compute(&state, "host-b", epoch_secs());
        instance(&state, PowerState::Running, RUNNING);

        let err = validator(&state).validate("1", "host-b").await.unwrap_err();
        assert!(matches!(err, SchedulerError::Invalid(ref m) if m.contains("host-a is not alive")));
    }

    #[tokio::test]
    async fn unregistered_destination_is_invalid() {
        let state = StateStore::open_in_memory().unwrap();
        compute(&state, "host-a", epoch_secs());
        instance(&state, PowerState::Running, RUNNING);

        let err = validator(&state).validate("1", "host-z").await.unwrap_err();
        assert!(matches!(err, SchedulerError::Invalid(ref m) if m.contains("host-z")));
    }

    #[tokio::test]
    async fn claim_is_released_after_failure() {
        let state = StateStore::open_in_memory().unwrap();
        let v = validator(&state);
        assert!(matches!(v.validate("1", "host-b").await, Err(SchedulerError::NotFound(_))));
        // A second attempt is not blocked by the first one's claim.
        assert!(matches!(v.validate("1", "host-b").await, Err(SchedulerError::NotFound(_))));
    }

    #[test]
    fn claim_rejects_second_holder() {
        let state = StateStore::open_in_memory().unwrap();
        let v = validator(&state);
        let guard = v.claim("1").unwrap();
        assert!(matches!(v.claim("1"), Err(SchedulerError::InProgress(_))));
        assert!(v.claim("2").is_ok());
        drop(guard);
        assert!(v.claim("1").is_ok());
    }
}
