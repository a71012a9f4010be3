//! Liveness tracking from service heartbeats.
//!
//! A service is up iff the time since its last heartbeat (or its creation,
//! if it never sent one) is strictly below the configured down time.
//! Timestamps are wall-clock UTC seconds written by independently clocked
//! hosts, so skew between hosts shifts the verdict. Elapsed time is measured
//! in whole seconds; a fractional down time behaves like the next whole
//! second, which is why configuration only accepts whole seconds.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fleetgrid_state::ServiceRecord;

/// Derives service liveness from heartbeat recency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessTracker {
    down_time: Duration,
}

impl LivenessTracker {
    /// Create a tracker with the given down-time threshold.
    pub fn new(down_time: Duration) -> Self {
        Self { down_time }
    }

    /// Whether `service` is up right now.
    pub fn is_up(&self, service: &ServiceRecord) -> bool {
        self.is_up_at(service, epoch_secs())
    }

    /// Whether `service` is up at the given Unix time.
    ///
    /// A heartbeat stamped in the future counts as zero elapsed time.
    pub fn is_up_at(&self, service: &ServiceRecord, now: u64) -> bool {
        let elapsed = Duration::from_secs(now.saturating_sub(service.last_heartbeat()));
        elapsed < self.down_time
    }
}

/// Current Unix epoch in seconds.
pub(crate) fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(created_at: u64, updated_at: Option<u64>) -> ServiceRecord {
        ServiceRecord {
            host: "host-a".to_string(),
            topic: "compute".to_string(),
            created_at,
            updated_at,
            compute: None,
        }
    }

    #[test]
    fn up_strictly_below_threshold() {
        let tracker = LivenessTracker::new(Duration::from_secs(60));
        let svc = service(1000, Some(2000));

        assert!(tracker.is_up_at(&svc, 2000));
        assert!(tracker.is_up_at(&svc, 2059));
        // Boundary: age == threshold is down.
        assert!(!tracker.is_up_at(&svc, 2060));
        assert!(!tracker.is_up_at(&svc, 5000));
    }

    #[test]
    fn boundary_holds_for_any_threshold() {
        for threshold in [1u64, 5, 60, 3600] {
            let tracker = LivenessTracker::new(Duration::from_secs(threshold));
            let svc = service(0, Some(10_000));
            for age in 0..=threshold + 1 {
                assert_eq!(
                    tracker.is_up_at(&svc, 10_000 + age),
                    age < threshold,
                    "threshold {threshold}, age {age}"
                );
            }
        }
    }

    #[test]
    fn created_at_used_without_heartbeat() {
        let tracker = LivenessTracker::new(Duration::from_secs(60));
        let svc = service(1000, None);

        assert!(tracker.is_up_at(&svc, 1030));
        assert!(!tracker.is_up_at(&svc, 1060));
    }

    #[test]
    fn updated_at_wins_over_created_at() {
        let tracker = LivenessTracker::new(Duration::from_secs(60));
        // Registered long ago, but heartbeating recently.
        let svc = service(10, Some(1000));
        assert!(tracker.is_up_at(&svc, 1010));
    }

    #[test]
    fn future_heartbeat_counts_as_up() {
        let tracker = LivenessTracker::new(Duration::from_secs(60));
        let svc = service(1000, Some(5000));
        assert!(tracker.is_up_at(&svc, 4000));
    }

    #[test]
    fn zero_threshold_is_never_up() {
        let tracker = LivenessTracker::new(Duration::ZERO);
        let svc = service(1000, Some(1000));
        assert!(!tracker.is_up_at(&svc, 1000));
    }

    #[test]
    fn fresh_service_is_up_now() {
        let tracker = LivenessTracker::new(Duration::from_secs(60));
        let svc = service(epoch_secs(), None);
        assert!(tracker.is_up(&svc));
    }
}
