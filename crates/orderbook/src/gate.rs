//! One-shot latch released when a side receives its first snapshot.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
pub struct SnapshotGate {
    opened: Mutex<bool>,
    cond: Condvar,
}

impl SnapshotGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens the gate and wakes every waiter.
    ///
    /// Returns `true` only for the call that actually opened it; the gate never closes again.
    pub fn open(&self) -> bool {
        let mut opened = self.opened.lock();
        if *opened {
            return false;
        }
        *opened = true;
        self.cond.notify_all();
        true
    }

    pub fn is_open(&self) -> bool {
        *self.opened.lock()
    }

    /// Blocks until the gate is open.
    pub fn wait(&self) {
        let mut opened = self.opened.lock();
        while !*opened {
            self.cond.wait(&mut opened);
        }
    }

    /// Blocks until the gate is open or `timeout` elapses. Returns whether it is open.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut opened = self.opened.lock();
        while !*opened {
            if self.cond.wait_until(&mut opened, deadline).timed_out() {
                return *opened;
            }
        }
        true
    }
}
