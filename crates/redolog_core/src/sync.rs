//! Shutdown signalling and non-blocking locks.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cooperative cancellation handle shared by background tasks.
///
/// Cloning produces another handle to the same signal. Once cancelled the
/// signal never resets.
#[derive(Clone, Default)]
pub struct Shutdown {
    inner: Arc<ShutdownInner>,
}

#[derive(Default)]
struct ShutdownInner {
    cancelled: Mutex<bool>,
    condvar: Condvar,
}

impl Shutdown {
    /// Creates a fresh, uncancelled signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels the signal, waking all current and future waiters. Idempotent.
    pub fn cancel(&self) {
        let mut cancelled = self.inner.cancelled.lock();
        *cancelled = true;
        self.inner.condvar.notify_all();
    }

    /// Whether the signal has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        *self.inner.cancelled.lock()
    }

    /// Sleeps for `timeout` unless cancelled first.
    ///
    /// Returns `true` if the signal was (or became) cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut cancelled = self.inner.cancelled.lock();
        while !*cancelled {
            if self
                .inner
                .condvar
                .wait_until(&mut cancelled, deadline)
                .timed_out()
            {
                break;
            }
        }
        *cancelled
    }
}

impl std::fmt::Debug for Shutdown {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shutdown")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Non-blocking mutex over an atomic flag.
///
/// Unlike a standard mutex there is no guard: [`unlock`](Self::unlock)
/// releases the lock no matter which thread acquired it, which is what the
/// rotation/legacy coordination needs (the releasing path is not always the
/// acquiring one).
#[derive(Debug, Default)]
pub struct TryLock {
    locked: AtomicBool,
}

impl TryLock {
    /// Creates an unlocked flag.
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
        }
    }

    /// Attempts to acquire; returns `true` on success, never blocks.
    pub fn try_lock(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Releases the lock. Returns `true` iff it was held.
    pub fn unlock(&self) -> bool {
        self.locked.swap(false, Ordering::Release)
    }

    /// Whether the lock is currently held.
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn try_lock_excludes_second_acquire() {
        let lock = TryLock::new();
        assert!(lock.try_lock());
        assert!(!lock.try_lock());
        assert!(lock.is_locked());
        assert!(lock.unlock());
        assert!(!lock.is_locked());
        assert!(lock.try_lock());
    }

    #[test]
    fn unlock_when_free_reports_not_held() {
        let lock = TryLock::new();
        assert!(!lock.unlock());
    }

    #[test]
    fn wait_timeout_expires_without_cancel() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.wait_timeout(Duration::from_millis(10)));
        assert!(!shutdown.is_cancelled());
    }

    #[test]
    fn cancel_wakes_waiter() {
        let shutdown = Shutdown::new();
        let other = shutdown.clone();
        let waiter = thread::spawn(move || other.wait_timeout(Duration::from_secs(30)));
        thread::sleep(Duration::from_millis(20));
        shutdown.cancel();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn cancelled_signal_returns_immediately() {
        let shutdown = Shutdown::new();
        shutdown.cancel();
        let start = Instant::now();
        assert!(shutdown.wait_timeout(Duration::from_secs(10)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
