//! Record types for the FleetGrid state store.
//!
//! These types represent registered agent services, compute instances and
//! their attached volumes. All types are serializable to/from JSON for
//! storage in redb tables. Timestamps are Unix epoch seconds.

use serde::{Deserialize, Serialize};

/// Host identifier (the name an agent registers under).
pub type HostId = String;

/// Unique identifier for an instance.
pub type InstanceId = String;

/// Unique identifier for a volume.
pub type VolumeId = String;

/// Topic served by compute agents.
pub const COMPUTE_TOPIC: &str = "compute";

/// Topic served by volume agents.
pub const VOLUME_TOPIC: &str = "volume";

// ── Service ───────────────────────────────────────────────────────

/// A registered agent on a host, identified by its topic (role).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceRecord {
    pub host: HostId,
    /// Role of the agent: "compute", "volume", ...
    pub topic: String,
    /// Unix timestamp when the agent registered.
    pub created_at: u64,
    /// Unix timestamp of the last heartbeat, if any was received.
    pub updated_at: Option<u64>,
    /// Hypervisor and capacity details; present for compute services.
    pub compute: Option<ComputeNode>,
}

/// Hypervisor identity and memory capacity reported by a compute agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComputeNode {
    /// Total memory on the host (MB).
    pub memory_mb: u64,
    /// Memory currently consumed on the host (MB).
    pub memory_mb_used: u64,
    /// Hypervisor type, e.g. "QEMU" or "KVM".
    pub hypervisor_type: String,
    /// Hypervisor version as a single ordinal number.
    pub hypervisor_version: u64,
    /// Opaque CPU description handed to `compare_cpu` on other hosts.
    pub cpu_info: String,
}

impl ServiceRecord {
    /// Build the composite key for the services table.
    pub fn table_key(&self) -> String {
        service_key(&self.topic, &self.host)
    }

    /// Timestamp of the most recent sign of life.
    pub fn last_heartbeat(&self) -> u64 {
        self.updated_at.unwrap_or(self.created_at)
    }
}

/// Composite `{topic}/{host}` key.
pub fn service_key(topic: &str, host: &str) -> String {
    format!("{topic}/{host}")
}

// ── Instance ──────────────────────────────────────────────────────

/// Hypervisor-reported power state of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerState {
    NoState,
    Running,
    Blocked,
    Paused,
    Shutdown,
    Shutoff,
    Crashed,
    Suspended,
    Failed,
}

/// A compute instance: the unit that gets live-migrated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Instance {
    pub id: InstanceId,
    /// Human-readable name used in operator-facing messages.
    pub hostname: String,
    pub power_state: PowerState,
    /// Free-text sub-state, e.g. "running" or "migrating".
    pub state_description: String,
    /// Host the instance currently runs on.
    pub host: HostId,
    /// Host the instance was originally launched on.
    pub launched_on: HostId,
    /// Requested memory (MB).
    pub memory_mb: u64,
    /// Attached volumes, in attachment order.
    pub volumes: Vec<VolumeId>,
}

// ── Volume ────────────────────────────────────────────────────────

/// Lifecycle status of a block volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VolumeStatus {
    Creating,
    Available,
    InUse,
    Migrating,
    Deleting,
    Error,
}

/// Attached block storage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Volume {
    pub id: VolumeId,
    pub status: VolumeStatus,
    /// Instance the volume is attached to, if any.
    pub instance_id: Option<InstanceId>,
}
