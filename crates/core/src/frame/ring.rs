use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::error::{Result, St20Error};

use super::{SlotIndex, SlotState};

#[derive(Debug)]
struct SlotMeta {
    state: SlotState,
    /// A producer holds this `Free` slot and is filling it.
    claimed: bool,
    /// Publication order, so the transport drains slots oldest first.
    seq: u64,
    second_field: bool,
}

#[derive(Debug)]
struct RingState {
    slots: Vec<SlotMeta>,
    producer: usize,
    next_seq: u64,
}

impl RingState {
    fn claim_free(&mut self) -> Option<SlotIndex> {
        let n = self.slots.len();
        let slot = (0..n)
            .map(|i| (self.producer + i) % n)
            .find(|&i| self.slots[i].state == SlotState::Free && !self.slots[i].claimed)?;
        self.slots[slot].claimed = true;
        self.producer = (slot + 1) % n;
        Some(slot)
    }

    fn transition(&mut self, slot: SlotIndex, from: SlotState, to: SlotState) -> Result<()> {
        let capacity = self.slots.len();
        let meta = self
            .slots
            .get_mut(slot)
            .ok_or(St20Error::UnknownSlot { slot, capacity })?;
        if meta.state != from {
            tracing::error!(slot, expected = ?from, actual = ?meta.state, "invalid slot transition");
            return Err(St20Error::InvalidSlotState {
                slot,
                expected: from,
                actual: meta.state,
            });
        }
        tracing::debug!(slot, from = ?from, to = ?to, "slot transition");
        meta.state = to;
        Ok(())
    }
}

/// Fixed pool of tx frame slots shared by a session's producer thread and
/// the transport's callback context.
///
/// All state bookkeeping sits behind one mutex, held only for the
/// bookkeeping itself. Each slot's pixel buffer has its own lock so a
/// frame copy never blocks a state query, and `lines_ready` is atomic so
/// the slice query never takes a lock at all.
#[derive(Debug)]
pub struct FrameSlotRing {
    state: Mutex<RingState>,
    changed: Condvar,
    buffers: Vec<Mutex<Vec<u8>>>,
    lines_ready: Vec<AtomicU32>,
    frame_size: usize,
}

impl FrameSlotRing {
    pub fn new(count: usize, frame_size: usize) -> Result<Self> {
        if count == 0 {
            return Err(St20Error::ConfigInvalid("frame ring needs at least one slot".into()));
        }
        tracing::debug!(count, frame_size, "frame slot ring created");
        Ok(Self {
            state: Mutex::new(RingState {
                slots: (0..count)
                    .map(|_| SlotMeta {
                        state: SlotState::Free,
                        claimed: false,
                        seq: 0,
                        second_field: false,
                    })
                    .collect(),
                producer: 0,
                next_seq: 0,
            }),
            changed: Condvar::new(),
            buffers: (0..count).map(|_| Mutex::new(vec![0; frame_size])).collect(),
            lines_ready: (0..count).map(|_| AtomicU32::new(0)).collect(),
            frame_size,
        })
    }

    pub fn capacity(&self) -> usize {
        self.buffers.len()
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Claim a `Free` slot for the producer without blocking.
    pub fn acquire_free_slot(&self) -> Result<SlotIndex> {
        let slot = self
            .state
            .lock()
            .claim_free()
            .ok_or(St20Error::ResourceExhausted("no free frame slot"))?;
        tracing::debug!(slot, "slot acquired");
        Ok(slot)
    }

    /// Claim a `Free` slot, blocking until one is released or `stop` is
    /// set. Returns `None` on stop.
    pub fn wait_free_slot(&self, stop: &AtomicBool) -> Option<SlotIndex> {
        let mut state = self.state.lock();
        loop {
            if stop.load(Ordering::Acquire) {
                return None;
            }
            if let Some(slot) = state.claim_free() {
                tracing::debug!(slot, "slot acquired");
                return Some(slot);
            }
            self.changed.wait(&mut state);
        }
    }

    /// Publish a filled slot to the transport.
    pub fn mark_ready(&self, slot: SlotIndex, second_field: bool) -> Result<()> {
        let mut state = self.state.lock();
        state.transition(slot, SlotState::Free, SlotState::Ready)?;
        let seq = state.next_seq;
        state.next_seq += 1;
        let meta = &mut state.slots[slot];
        meta.claimed = false;
        meta.seq = seq;
        meta.second_field = second_field;
        drop(state);
        self.changed.notify_all();
        Ok(())
    }

    pub fn mark_in_transit(&self, slot: SlotIndex) -> Result<()> {
        self.state
            .lock()
            .transition(slot, SlotState::Ready, SlotState::InTransit)
    }

    /// Return a transmitted slot to the producer.
    pub fn mark_free(&self, slot: SlotIndex) -> Result<()> {
        self.state
            .lock()
            .transition(slot, SlotState::InTransit, SlotState::Free)?;
        self.changed.notify_all();
        Ok(())
    }

    /// Hand the oldest `Ready` slot to the transport.
    ///
    /// Only one slot is in transit at a time; while one is, this reports
    /// `ResourceExhausted` like an empty ring.
    pub fn take_ready(&self) -> Result<(SlotIndex, bool)> {
        let mut state = self.state.lock();
        if state.slots.iter().any(|m| m.state == SlotState::InTransit) {
            return Err(St20Error::ResourceExhausted("a frame is already in transit"));
        }
        let (slot, meta) = state
            .slots
            .iter()
            .enumerate()
            .filter(|(_, m)| m.state == SlotState::Ready)
            .min_by_key(|(_, m)| m.seq)
            .ok_or(St20Error::ResourceExhausted("no ready frame"))?;
        let second_field = meta.second_field;
        state.transition(slot, SlotState::Ready, SlotState::InTransit)?;
        Ok((slot, second_field))
    }

    pub fn state(&self, slot: SlotIndex) -> Option<SlotState> {
        self.state.lock().slots.get(slot).map(|m| m.state)
    }

    /// Count of slots in `state`.
    pub fn count(&self, state: SlotState) -> usize {
        self.state
            .lock()
            .slots
            .iter()
            .filter(|m| m.state == state)
            .count()
    }

    /// Lock a slot's pixel buffer.
    pub fn framebuffer(&self, slot: SlotIndex) -> Result<MutexGuard<'_, Vec<u8>>> {
        self.buffers
            .get(slot)
            .map(|buffer| buffer.lock())
            .ok_or(St20Error::UnknownSlot {
                slot,
                capacity: self.capacity(),
            })
    }

    pub fn set_lines_ready(&self, slot: SlotIndex, lines: u32) {
        if let Some(l) = self.lines_ready.get(slot) {
            l.store(lines, Ordering::Release);
        }
    }

    /// Lines of `slot` the producer has finished writing. Never blocks.
    pub fn lines_ready(&self, slot: SlotIndex) -> u32 {
        self.lines_ready
            .get(slot)
            .map_or(0, |l| l.load(Ordering::Acquire))
    }

    /// Wake every thread blocked in [`wait_free_slot`](Self::wait_free_slot).
    pub fn wake(&self) {
        let _state = self.state.lock();
        self.changed.notify_all();
    }
}

/// A received frame the transport could not enqueue, handed back so its
/// buffer can be returned to the transport's pool.
#[derive(Debug)]
pub struct SlotBusy<T> {
    pub slot: SlotIndex,
    pub frame: T,
}

impl<T> From<SlotBusy<T>> for St20Error {
    fn from(busy: SlotBusy<T>) -> Self {
        St20Error::SlotBusy { slot: busy.slot }
    }
}

#[derive(Debug)]
struct ReceiveState<T> {
    slots: Vec<Option<T>>,
    producer: usize,
    consumer: usize,
}

/// Bounded rx hand-off between the transport's notification context and
/// the session worker.
///
/// Enqueueing never blocks: if the producer slot is still occupied, the
/// frame comes straight back in [`SlotBusy`]. Dequeueing can block.
#[derive(Debug)]
pub struct ReceiveRing<T> {
    state: Mutex<ReceiveState<T>>,
    ready: Condvar,
}

impl<T> ReceiveRing<T> {
    pub fn new(count: usize) -> Result<Self> {
        if count == 0 {
            return Err(St20Error::ConfigInvalid("receive ring needs at least one slot".into()));
        }
        Ok(Self {
            state: Mutex::new(ReceiveState {
                slots: (0..count).map(|_| None).collect(),
                producer: 0,
                consumer: 0,
            }),
            ready: Condvar::new(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().slots.len()
    }

    /// Frames waiting to be consumed.
    pub fn len(&self) -> usize {
        self.state.lock().slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn enqueue_received(&self, frame: T) -> std::result::Result<SlotIndex, SlotBusy<T>> {
        let mut state = self.state.lock();
        let slot = state.producer;
        if state.slots[slot].is_some() {
            return Err(SlotBusy { slot, frame });
        }
        state.slots[slot] = Some(frame);
        state.producer = (slot + 1) % state.slots.len();
        drop(state);
        self.ready.notify_one();
        Ok(slot)
    }

    pub fn dequeue_received(&self) -> Option<T> {
        let mut state = self.state.lock();
        Self::take(&mut state)
    }

    /// Block until a frame is available or `stop` is set.
    ///
    /// Frames already queued are still returned after `stop` is set; `None`
    /// means the ring is drained and the session is stopping.
    pub fn wait_received(&self, stop: &AtomicBool) -> Option<T> {
        let mut state = self.state.lock();
        loop {
            if let Some(frame) = Self::take(&mut state) {
                return Some(frame);
            }
            if stop.load(Ordering::Acquire) {
                return None;
            }
            self.ready.wait(&mut state);
        }
    }

    fn take(state: &mut ReceiveState<T>) -> Option<T> {
        let slot = state.consumer;
        let frame = state.slots[slot].take()?;
        state.consumer = (slot + 1) % state.slots.len();
        Some(frame)
    }

    pub fn wake(&self) {
        let _state = self.state.lock();
        self.ready.notify_all();
    }
}
