use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Condvar, Mutex};

/// Sticky wakeup for RTP-level workers: a notify that arrives while the
/// worker is busy is remembered until its next wait.
#[derive(Debug, Default)]
pub(crate) struct WakeSignal {
    pending: Mutex<bool>,
    cond: Condvar,
}

impl WakeSignal {
    pub fn notify(&self) {
        *self.pending.lock() = true;
        self.cond.notify_one();
    }

    /// Block until notified or `stop` is set.
    pub fn wait(&self, stop: &AtomicBool) {
        let mut pending = self.pending.lock();
        while !*pending && !stop.load(Ordering::Acquire) {
            self.cond.wait(&mut pending);
        }
        *pending = false;
    }
}
