//! The fleet record repository the scheduler reads from and writes to.
//!
//! The scheduler never talks to a database directly; it goes through
//! [`FleetRepository`]. [`StateStore`] is the production implementation.

use fleetgrid_state::*;

/// Persisted fleet records: services, instances and volumes.
///
/// Implementations own their locking and transaction discipline; the
/// scheduler holds no locks over repository state between calls.
pub trait FleetRepository: Send + Sync {
    /// The service registered for `topic` on `host`, if any.
    fn get_service(&self, topic: &str, host: &str) -> StateResult<Option<ServiceRecord>>;

    /// Every service registered under `topic`.
    fn services_by_topic(&self, topic: &str) -> StateResult<Vec<ServiceRecord>>;

    fn get_instance(&self, instance_id: &str) -> StateResult<Option<Instance>>;

    fn set_instance_state(
        &self,
        instance_id: &str,
        power_state: PowerState,
        description: &str,
    ) -> StateResult<()>;

    fn set_volume_status(&self, volume_id: &str, status: VolumeStatus) -> StateResult<()>;

    /// Write an instance's state and all of its volumes' status as one
    /// all-or-nothing batch, provided the stored instance still matches
    /// `expected` (state, host, volumes). Returns the ids of the updated
    /// volumes.
    fn transition_instance(
        &self,
        expected: &Instance,
        power_state: PowerState,
        description: &str,
        volume_status: VolumeStatus,
    ) -> StateResult<Vec<VolumeId>>;
}

impl FleetRepository for StateStore {
    fn get_service(&self, topic: &str, host: &str) -> StateResult<Option<ServiceRecord>> {
        StateStore::get_service(self, topic, host)
    }

    fn services_by_topic(&self, topic: &str) -> StateResult<Vec<ServiceRecord>> {
        self.list_services_by_topic(topic)
    }

    fn get_instance(&self, instance_id: &str) -> StateResult<Option<Instance>> {
        StateStore::get_instance(self, instance_id)
    }

    fn set_instance_state(
        &self,
        instance_id: &str,
        power_state: PowerState,
        description: &str,
    ) -> StateResult<()> {
        StateStore::set_instance_state(self, instance_id, power_state, description)
    }

    fn set_volume_status(&self, volume_id: &str, status: VolumeStatus) -> StateResult<()> {
        StateStore::set_volume_status(self, volume_id, status)
    }

    fn transition_instance(
        &self,
        expected: &Instance,
        power_state: PowerState,
        description: &str,
        volume_status: VolumeStatus,
    ) -> StateResult<Vec<VolumeId>> {
        StateStore::transition_instance(self, expected, power_state, description, volume_status)
    }
}
