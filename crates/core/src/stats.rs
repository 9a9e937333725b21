use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

/// Per-session counters.
///
/// Updated with relaxed atomics from whichever thread observes the event;
/// read through [`snapshot`](Self::snapshot).
#[derive(Debug)]
pub struct SessionStats {
    pub frames_produced: AtomicU64,
    pub frames_sent: AtomicU64,
    pub frames_received: AtomicU64,
    pub frames_consumed: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub frames_incomplete: AtomicU64,
    pub packets_built: AtomicU64,
    pub packets_received: AtomicU64,
    pub packets_dropped: AtomicU64,
    pub slice_mismatches: AtomicU64,
    interval: Mutex<(Instant, StatsSnapshot)>,
}

/// Point-in-time copy of [`SessionStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub frames_produced: u64,
    pub frames_sent: u64,
    pub frames_received: u64,
    pub frames_consumed: u64,
    pub frames_dropped: u64,
    pub frames_incomplete: u64,
    pub packets_built: u64,
    pub packets_received: u64,
    pub packets_dropped: u64,
    pub slice_mismatches: u64,
}

impl StatsSnapshot {
    fn since(&self, earlier: &StatsSnapshot) -> StatsSnapshot {
        StatsSnapshot {
            frames_produced: self.frames_produced - earlier.frames_produced,
            frames_sent: self.frames_sent - earlier.frames_sent,
            frames_received: self.frames_received - earlier.frames_received,
            frames_consumed: self.frames_consumed - earlier.frames_consumed,
            frames_dropped: self.frames_dropped - earlier.frames_dropped,
            frames_incomplete: self.frames_incomplete - earlier.frames_incomplete,
            packets_built: self.packets_built - earlier.packets_built,
            packets_received: self.packets_received - earlier.packets_received,
            packets_dropped: self.packets_dropped - earlier.packets_dropped,
            slice_mismatches: self.slice_mismatches - earlier.slice_mismatches,
        }
    }
}

/// Rates over one reporting interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsReport {
    pub delta: StatsSnapshot,
    pub seconds: f64,
}

impl StatsReport {
    /// Frames per second through the session's main path: sent for tx,
    /// consumed for rx.
    pub fn fps(&self) -> f64 {
        if self.seconds <= 0.0 {
            return 0.0;
        }
        self.delta.frames_sent.max(self.delta.frames_consumed) as f64 / self.seconds
    }
}

pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl SessionStats {
    pub fn new() -> Self {
        Self {
            frames_produced: AtomicU64::new(0),
            frames_sent: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            frames_consumed: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            frames_incomplete: AtomicU64::new(0),
            packets_built: AtomicU64::new(0),
            packets_received: AtomicU64::new(0),
            packets_dropped: AtomicU64::new(0),
            slice_mismatches: AtomicU64::new(0),
            interval: Mutex::new((Instant::now(), StatsSnapshot::default())),
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            frames_produced: load(&self.frames_produced),
            frames_sent: load(&self.frames_sent),
            frames_received: load(&self.frames_received),
            frames_consumed: load(&self.frames_consumed),
            frames_dropped: load(&self.frames_dropped),
            frames_incomplete: load(&self.frames_incomplete),
            packets_built: load(&self.packets_built),
            packets_received: load(&self.packets_received),
            packets_dropped: load(&self.packets_dropped),
            slice_mismatches: load(&self.slice_mismatches),
        }
    }

    /// Log the counters accumulated since the previous report and start a
    /// new interval.
    pub fn report(&self, session: &str) -> StatsReport {
        let now = Instant::now();
        let current = self.snapshot();
        let mut interval = self.interval.lock();
        let report = StatsReport {
            delta: current.since(&interval.1),
            seconds: now.duration_since(interval.0).as_secs_f64(),
        };
        *interval = (now, current);
        drop(interval);

        let d = &report.delta;
        tracing::info!(
            session,
            fps = format_args!("{:.2}", report.fps()),
            produced = d.frames_produced,
            sent = d.frames_sent,
            received = d.frames_received,
            consumed = d.frames_consumed,
            dropped = d.frames_dropped,
            incomplete = d.frames_incomplete,
            packets_built = d.packets_built,
            packets_received = d.packets_received,
            packets_dropped = d.packets_dropped,
            "session stats"
        );
        if d.slice_mismatches > 0 {
            tracing::warn!(session, mismatches = d.slice_mismatches, "slice size mismatches");
        }
        report
    }
}

impl Default for SessionStats {
    fn default() -> Self {
        Self::new()
    }
}
