use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Single-shot, re-armable, edge-triggered signal. The event loop sets it when
/// a handle reaches a terminal state; user threads block on `wait`. Clearing
/// re-arms the signal for states that can regress, such as lost data awaiting
/// recomputation.
pub struct Wake {
    flag: Mutex<bool>,
    cond: Condvar,
}

impl Wake {
    #[inline]
    pub fn new() -> Wake {
        Wake {
            flag: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    /// Set the signal and release every waiter.
    #[inline]
    pub fn set(&self) {
        let mut flag = self.flag.lock().unwrap();
        *flag = true;
        self.cond.notify_all();
    }

    /// Re-arm the signal.
    #[inline]
    pub fn clear(&self) {
        let mut flag = self.flag.lock().unwrap();
        *flag = false;
    }

    #[inline]
    pub fn is_set(&self) -> bool {
        *self.flag.lock().unwrap()
    }

    /// Block until the signal is set.
    pub fn wait(&self) {
        let mut flag = self.flag.lock().unwrap();
        while !*flag {
            flag = self.cond.wait(flag).unwrap();
        }
    }

    /// Block until the signal is set or the timeout elapses. Returns whether
    /// the signal was set.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut flag = self.flag.lock().unwrap();

        while !*flag {
            let now = Instant::now();

            if now >= deadline {
                return false;
            }

            let (guard, _) = self.cond.wait_timeout(flag, deadline - now).unwrap();
            flag = guard;
        }

        true
    }
}
