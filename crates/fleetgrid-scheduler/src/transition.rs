//! Marks a validated instance and its volumes as migrating.

use std::sync::Arc;

use fleetgrid_state::{Instance, PowerState, VolumeId, VolumeStatus};
use tracing::info;

use crate::error::SchedulerResult;
use crate::repository::FleetRepository;

/// State description of an instance that is up and serving.
pub const RUNNING: &str = "running";
/// State description of an instance whose live migration has begun.
pub const MIGRATING: &str = "migrating";

pub struct WorkloadStateTransitioner {
    repo: Arc<dyn FleetRepository>,
}

impl WorkloadStateTransitioner {
    pub fn new(repo: Arc<dyn FleetRepository>) -> Self {
        Self { repo }
    }

    /// Pause the instance as "migrating" and flag every attached volume as
    /// migrating, in one repository batch.
    ///
    /// `validated` is the record the checks ran against. If the stored
    /// instance has since changed state, host or volumes, this fails with
    /// `Invalid`. Nothing is written on any failure.
    pub fn begin_migration(&self, validated: &Instance) -> SchedulerResult<Vec<VolumeId>> {
        let instance_id = validated.id.as_str();
        let volumes = self.repo.transition_instance(
            validated,
            PowerState::Paused,
            MIGRATING,
            VolumeStatus::Migrating,
        )?;
        info!(%instance_id, volumes = volumes.len(), "instance marked migrating");
        Ok(volumes)
    }
}
