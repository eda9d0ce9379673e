//! Cross-job priority coordination.
//!
//! `PriorityCoordinator` counts priority files that are still pending across
//! every running job. Jobs consult it before starting a large transfer so
//! that bulk data yields to priority files anywhere in the process.
//!
//! A job's contribution is held in a `PriorityLease`. The lease gives back
//! whatever it still holds when dropped, so the counter returns to its
//! pre-run value on every exit path: normal completion, cancellation, an
//! error, or a panic unwinding through the worker.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::control::CancellationToken;

/// Process-wide count of pending priority files.
#[derive(Debug, Default)]
pub struct PriorityCoordinator {
    pending: AtomicUsize,
}

impl PriorityCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current number of pending priority files.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Add `count` pending files and return a lease for them.
    pub fn register(&self, count: usize) -> PriorityLease<'_> {
        self.pending.fetch_add(count, Ordering::SeqCst);
        PriorityLease {
            coordinator: self,
            remaining: count,
        }
    }

    fn release(&self, count: usize) {
        if count == 0 {
            return;
        }
        // Saturate rather than wrap; the counter must never go negative.
        let _ = self
            .pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                Some(current.saturating_sub(count))
            });
    }

    /// Block until no priority file is pending anywhere.
    ///
    /// Polls every `poll`. Returns `true` if `cancel` fired first.
    pub fn wait_until_clear(&self, cancel: &CancellationToken, poll: Duration) -> bool {
        while self.pending() > 0 {
            if cancel.sleep(poll) {
                return true;
            }
        }
        cancel.is_cancelled()
    }
}

/// One job's outstanding share of the priority counter.
#[derive(Debug)]
pub struct PriorityLease<'a> {
    coordinator: &'a PriorityCoordinator,
    remaining: usize,
}

impl PriorityLease<'_> {
    /// Mark one priority file as finished, whatever its outcome.
    pub fn complete_one(&mut self) {
        if self.remaining > 0 {
            self.remaining -= 1;
            self.coordinator.release(1);
        }
    }

    /// Give back everything still held.
    pub fn release_all(&mut self) {
        let count = std::mem::take(&mut self.remaining);
        self.coordinator.release(count);
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }
}

impl Drop for PriorityLease<'_> {
    fn drop(&mut self) {
        self.release_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_lease_is_net_zero_after_completion() {
        let coordinator = PriorityCoordinator::new();
        let mut lease = coordinator.register(3);
        assert_eq!(coordinator.pending(), 3);

        lease.complete_one();
        lease.complete_one();
        lease.complete_one();
        assert_eq!(coordinator.pending(), 0);

        // Extra completions are ignored
        lease.complete_one();
        assert_eq!(coordinator.pending(), 0);
    }

    #[test]
    fn test_dropped_lease_returns_remaining() {
        let coordinator = PriorityCoordinator::new();
        let _other = coordinator.register(2);
        {
            let mut lease = coordinator.register(4);
            lease.complete_one();
            assert_eq!(coordinator.pending(), 5);
        }
        assert_eq!(coordinator.pending(), 2);
    }

    #[test]
    fn test_release_all_is_idempotent() {
        let coordinator = PriorityCoordinator::new();
        let mut lease = coordinator.register(2);
        lease.release_all();
        lease.release_all();
        drop(lease);
        assert_eq!(coordinator.pending(), 0);
    }

    #[test]
    fn test_wait_until_clear_returns_when_counter_drains() {
        let coordinator = Arc::new(PriorityCoordinator::new());
        let token = CancellationToken::new();

        let remote = Arc::clone(&coordinator);
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let handle = thread::spawn(move || {
            let mut lease = remote.register(1);
            ready_tx.send(()).unwrap();
            thread::sleep(Duration::from_millis(30));
            lease.complete_one();
        });

        ready_rx.recv().unwrap();
        let cancelled = coordinator.wait_until_clear(&token, Duration::from_millis(5));
        assert!(!cancelled);
        assert_eq!(coordinator.pending(), 0);
        handle.join().unwrap();
    }

    #[test]
    fn test_wait_until_clear_is_cancellable() {
        let coordinator = PriorityCoordinator::new();
        let _lease = coordinator.register(1);
        let token = CancellationToken::new();
        token.cancel();

        assert!(coordinator.wait_until_clear(&token, Duration::from_millis(5)));
    }

    #[test]
    fn test_concurrent_leases_net_zero() {
        let coordinator = Arc::new(PriorityCoordinator::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let coordinator = Arc::clone(&coordinator);
                thread::spawn(move || {
                    let mut lease = coordinator.register(50);
                    for _ in 0..25 {
                        lease.complete_one();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(coordinator.pending(), 0);
    }
}
