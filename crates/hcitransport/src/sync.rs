//! Counting signal used to wake transport tasks

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// Counting semaphore
///
/// Every `give` lets exactly one `take` through, so no wake-up is lost when
/// several arrive while the task is busy.
#[derive(Debug, Default)]
pub struct Semaphore {
    count: Mutex<usize>,
    cond: Condvar,
}

impl Semaphore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one permit and wake a waiter
    pub fn give(&self) {
        let mut count = self.lock();
        *count += 1;
        self.cond.notify_one();
    }

    /// Block until a permit is available and take it
    pub fn take(&self) {
        let mut count = self.lock();
        while *count == 0 {
            count = self.cond.wait(count).unwrap_or_else(|e| e.into_inner());
        }
        *count -= 1;
    }

    /// Like [`take`](Self::take) but give up after `timeout`
    ///
    /// Returns whether a permit was taken.
    pub fn take_timeout(&self, timeout: Duration) -> bool {
        let count = self.lock();
        let (mut count, _) = self
            .cond
            .wait_timeout_while(count, timeout, |count| *count == 0)
            .unwrap_or_else(|e| e.into_inner());

        if *count == 0 {
            return false;
        }
        *count -= 1;
        true
    }

    /// Take a permit if one is available without blocking
    pub fn try_take(&self) -> bool {
        let mut count = self.lock();
        if *count == 0 {
            return false;
        }
        *count -= 1;
        true
    }

    /// Number of permits currently available
    pub fn permits(&self) -> usize {
        *self.lock()
    }

    fn lock(&self) -> MutexGuard<'_, usize> {
        self.count.lock().unwrap_or_else(|e| e.into_inner())
    }
}
