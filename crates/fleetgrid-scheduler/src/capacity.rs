//! Memory headroom on a destination host.

use fleetgrid_state::{ComputeNode, Instance};

use crate::error::{SchedulerError, SchedulerResult};

/// Free memory on a compute node. Over-committed nodes report zero.
pub fn available_memory_mb(node: &ComputeNode) -> u64 {
    node.memory_mb.saturating_sub(node.memory_mb_used)
}

/// Whether `node` can take `requested_mb` more. Equality is not enough.
pub fn has_capacity(node: &ComputeNode, requested_mb: u64) -> bool {
    available_memory_mb(node) > requested_mb
}

/// Fail with `InsufficientCapacity` unless `node` on `host` can take `instance`.
pub fn check_capacity(node: &ComputeNode, host: &str, instance: &Instance) -> SchedulerResult<()> {
    let available_mb = available_memory_mb(node);
    if available_mb > instance.memory_mb {
        return Ok(());
    }
    Err(SchedulerError::InsufficientCapacity {
        instance: instance.hostname.clone(),
        host: host.to_string(),
        available_mb,
        requested_mb: instance.memory_mb,
    })
}

#[cfg(test)]
mod tests {
    use fleetgrid_state::PowerState;

    use super::*;

    fn node(total: u64, used: u64) -> ComputeNode {
        ComputeNode {
            memory_mb: total,
            memory_mb_used: used,
            hypervisor_type: "QEMU".to_string(),
            hypervisor_version: 1,
            cpu_info: String::new(),
        }
    }

    fn instance(memory_mb: u64) -> Instance {
        Instance {
            id: "1".to_string(),
            hostname: "web-1".to_string(),
            power_state: PowerState::Running,
            state_description: "running".to_string(),
            host: "host-a".to_string(),
            launched_on: "host-a".to_string(),
            memory_mb,
            volumes: Vec::new(),
        }
    }

    #[test]
    fn exact_fit_is_insufficient() {
        let n = node(2048, 1024);
        assert!(!has_capacity(&n, 1024));
        assert!(has_capacity(&n, 1023));

        let err = check_capacity(&n, "host-b", &instance(1024)).unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::InsufficientCapacity { available_mb: 1024, requested_mb: 1024, .. }
        ));
    }

    #[test]
    fn one_spare_megabyte_is_enough() {
        let n = node(2048, 1023);
        assert!(check_capacity(&n, "host-b", &instance(1024)).is_ok());
    }

    #[test]
    fn overcommitted_node_has_nothing_free() {
        let n = node(1024, 4096);
        assert_eq!(available_memory_mb(&n), 0);
        assert!(!has_capacity(&n, 0));
    }
}
