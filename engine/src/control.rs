//! Per-job run controls.
//!
//! A job owns one `CancellationToken` and one `PauseGate`. Both are cheap
//! clonable handles around shared state, so the engine can keep one copy to
//! signal through while the worker thread holds another to observe.
//!
//! Cancellation is only observed between files and inside the explicit wait
//! loops; a file copy that has started always runs to completion.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Lock a mutex, recovering the guard if another thread panicked while
/// holding it. Every value guarded in this crate stays valid across a panic.
pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct Flag {
    set: Mutex<bool>,
    changed: Condvar,
}

impl Flag {
    fn get(&self) -> bool {
        *lock_unpoisoned(&self.set)
    }

    fn put(&self, value: bool) {
        *lock_unpoisoned(&self.set) = value;
        self.changed.notify_all();
    }
}

/// Cooperative cancellation signal for one job run.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<Flag>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.put(true);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.get()
    }

    /// Sleep for `duration`, waking early on cancellation.
    ///
    /// Returns `true` if the token was cancelled before or during the sleep.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut cancelled = lock_unpoisoned(&self.flag.set);
        while !*cancelled {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            cancelled = match self.flag.changed.wait_timeout(cancelled, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }
}

/// Manual-reset gate a worker parks on while its job is paused.
#[derive(Debug, Clone, Default)]
pub struct PauseGate {
    flag: Arc<Flag>,
}

impl PauseGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self) {
        self.flag.put(true);
    }

    pub fn resume(&self) {
        self.flag.put(false);
    }

    pub fn is_paused(&self) -> bool {
        self.flag.get()
    }

    /// Block while the gate is paused.
    ///
    /// `poll` bounds how long a cancellation can go unnoticed, since the token
    /// signals on its own condition variable. Returns `true` if the wait ended
    /// because `cancel` fired.
    pub fn wait_while_paused(&self, cancel: &CancellationToken, poll: Duration) -> bool {
        let mut paused = lock_unpoisoned(&self.flag.set);
        while *paused {
            if cancel.is_cancelled() {
                return true;
            }
            paused = match self.flag.changed.wait_timeout(paused, poll) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_sleep_runs_full_duration_when_not_cancelled() {
        let token = CancellationToken::new();
        let start = Instant::now();
        assert!(!token.sleep(Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_sleep_wakes_on_cancel() {
        let token = CancellationToken::new();
        let remote = token.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.cancel();
        });

        let start = Instant::now();
        assert!(token.sleep(Duration::from_secs(10)));
        assert!(start.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
    }

    #[test]
    fn test_fresh_token_is_independent() {
        let old = CancellationToken::new();
        old.cancel();
        let fresh = CancellationToken::new();
        assert!(old.is_cancelled());
        assert!(!fresh.is_cancelled());
    }

    #[test]
    fn test_pause_gate_blocks_until_resume() {
        let gate = PauseGate::new();
        let token = CancellationToken::new();
        gate.pause();

        let remote = gate.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            remote.resume();
        });

        let cancelled = gate.wait_while_paused(&token, Duration::from_millis(5));
        assert!(!cancelled);
        assert!(!gate.is_paused());
        handle.join().unwrap();
    }

    #[test]
    fn test_pause_gate_releases_on_cancel() {
        let gate = PauseGate::new();
        let token = CancellationToken::new();
        gate.pause();

        let remote = token.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.cancel();
        });

        assert!(gate.wait_while_paused(&token, Duration::from_millis(5)));
        assert!(gate.is_paused());
        handle.join().unwrap();
    }
}
