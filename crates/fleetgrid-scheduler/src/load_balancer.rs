//! Round-robin host selection.
//!
//! Lock-free: an atomic counter picks the next position in whatever host
//! list the caller currently sees, so the list may grow or shrink between
//! calls.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Cycles through host lists using an atomic counter.
#[derive(Debug, Default)]
pub struct RoundRobinBalancer {
    counter: AtomicUsize,
}

impl RoundRobinBalancer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next index into a list of `count` entries, or `None` when empty.
    pub fn next(&self, count: usize) -> Option<usize> {
        if count == 0 {
            return None;
        }
        let idx = self.counter.fetch_add(1, Ordering::Relaxed);
        Some(idx % count)
    }

    /// Pick the next host from `hosts`.
    pub fn pick<'a>(&self, hosts: &'a [String]) -> Option<&'a str> {
        self.next(hosts.len()).map(|i| hosts[i].as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hosts(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn cycles_and_wraps() {
        let lb = RoundRobinBalancer::new();
        let pool = hosts(&["a", "b", "c"]);
        let picked: Vec<_> = (0..4).map(|_| lb.pick(&pool).unwrap()).collect();
        assert_eq!(picked, vec!["a", "b", "c", "a"]);
    }

    #[test]
    fn empty_pool_yields_nothing() {
        let lb = RoundRobinBalancer::new();
        assert_eq!(lb.next(0), None);
        assert_eq!(lb.pick(&[]), None);
    }

    #[test]
    fn follows_changing_pool_size() {
        let lb = RoundRobinBalancer::new();
        assert_eq!(lb.next(2), Some(0));
        assert_eq!(lb.next(2), Some(1));
        assert_eq!(lb.next(4), Some(2));
        assert_eq!(lb.next(4), Some(3));
        assert_eq!(lb.next(2), Some(0));
    }

    #[test]
    fn concurrent_picks_are_balanced() {
        use std::sync::Arc;
        use std::thread;

        let lb = Arc::new(RoundRobinBalancer::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let lb = lb.clone();
                thread::spawn(move || (0..100).map(|_| lb.next(4).unwrap()).collect::<Vec<_>>())
            })
            .collect();

        let mut counts = [0usize; 4];
        for h in handles {
            for idx in h.join().unwrap() {
                counts[idx] += 1;
            }
        }
        assert_eq!(counts, [100, 100, 100, 100]);
    }
}
