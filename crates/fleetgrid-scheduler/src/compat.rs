//! Hypervisor and CPU compatibility between a launch host and a destination.
//!
//! Guests carry the CPU model and hypervisor ABI of the host they were first
//! launched on, so the destination is compared against that host, not the
//! one the guest happens to be running on now.

use tracing::{debug, error};

use crate::directory::{FleetDirectory, compute_node};
use crate::error::{SchedulerError, SchedulerResult};
use crate::rpc::AgentClient;

pub struct CompatibilityChecker {
    directory: FleetDirectory,
    client: AgentClient,
}

impl CompatibilityChecker {
    pub fn new(directory: FleetDirectory, client: AgentClient) -> Self {
        Self { directory, client }
    }

    /// Check that guests launched on `original_host` can run on `dest`.
    ///
    /// Hypervisor type must match, the destination must not run an older
    /// hypervisor, and the destination agent must accept the original
    /// host's CPU description.
    pub async fn check_compatible(&self, original_host: &str, dest: &str) -> SchedulerResult<()> {
        let original = self
            .directory
            .compute_services_by_host(original_host)
            .map_err(|e| match e {
                SchedulerError::NotFound(_) => SchedulerError::Invalid(format!(
                    "launch host {original_host} vanished: no compute service registered"
                )),
                other => other,
            })?
            .swap_remove(0);
        let original = compute_node(&original)?;
        let destination = self.directory.compute_service(dest)?;
        let destination = compute_node(&destination)?;

        if original.hypervisor_type != destination.hypervisor_type {
            return Err(SchedulerError::Invalid(format!(
                "hypervisor type differs: {original_host} runs {}, {dest} runs {}",
                original.hypervisor_type, destination.hypervisor_type
            )));
        }

        if original.hypervisor_version > destination.hypervisor_version {
            return Err(SchedulerError::Invalid(format!(
                "destination hypervisor is older: {dest} has {}, {original_host} has {}",
                destination.hypervisor_version, original.hypervisor_version
            )));
        }

        let compatible = self
            .client
            .compare_cpu(dest, &original.cpu_info)
            .await
            .inspect_err(|e| {
                error!(
                    %original_host,
                    %dest,
                    answered = e.is_remote_answer(),
                    error = %e,
                    "cpu comparison failed"
                );
            })?;
        if !compatible {
            return Err(SchedulerError::Invalid(format!(
                "cpu of {dest} cannot run guests launched on {original_host}"
            )));
        }

        debug!(%original_host, %dest, "hosts compatible");
        Ok(())
    }
}
