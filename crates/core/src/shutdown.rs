use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

type AbortCallback = Box<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Inner {
    triggered: AtomicBool,
    next_id: AtomicU64,
    callbacks: Mutex<Vec<(u64, AbortCallback)>>,
}

/// Cloneable shutdown signal passed to every session at setup.
///
/// Sessions register an abort callback that stops their worker; a signal
/// handler (or a test) calls [`trigger`](Self::trigger) once and every
/// registered callback runs. Callbacks registered after the trigger run
/// immediately. Dropping the [`ShutdownGuard`] a registration returns
/// unregisters the callback, so one token can outlive many sessions.
#[derive(Clone, Default)]
pub struct ShutdownToken {
    inner: Arc<Inner>,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.triggered.load(Ordering::Acquire)
    }

    pub fn on_shutdown(&self, callback: impl Fn() + Send + Sync + 'static) -> ShutdownGuard {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let guard = ShutdownGuard {
            inner: Arc::downgrade(&self.inner),
            id,
        };
        let mut callbacks = self.inner.callbacks.lock();
        if self.is_shutdown() {
            drop(callbacks);
            callback();
        } else {
            callbacks.push((id, Box::new(callback)));
        }
        guard
    }

    /// Callbacks currently waiting for the trigger.
    pub fn registered(&self) -> usize {
        self.inner.callbacks.lock().len()
    }

    /// Signal shutdown. Only the first call runs the callbacks.
    pub fn trigger(&self) {
        let callbacks = {
            let mut callbacks = self.inner.callbacks.lock();
            if self.inner.triggered.swap(true, Ordering::AcqRel) {
                return;
            }
            std::mem::take(&mut *callbacks)
        };
        tracing::info!(callbacks = callbacks.len(), "shutdown requested");
        for (_, callback) in callbacks {
            callback();
        }
    }
}

/// Keeps a callback registered with a [`ShutdownToken`] until dropped.
#[must_use = "dropping the guard unregisters the callback"]
pub struct ShutdownGuard {
    inner: Weak<Inner>,
    id: u64,
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.callbacks.lock().retain(|(id, _)| *id != self.id);
        }
    }
}

impl std::fmt::Debug for ShutdownGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownGuard").field("id", &self.id).finish()
    }
}

impl std::fmt::Debug for ShutdownToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownToken")
            .field("triggered", &self.is_shutdown())
            .finish()
    }
}
