//! Frame buffers and the slot rings that hand them between threads.
//!
//! ## Slot lifecycle (tx)
//!
//! ```text
//! Free ──acquire──> (claimed, producer fills) ──mark_ready──> Ready
//!   ^                                                            │
//!   │                                                  take_ready│
//!   └──────────────mark_free (frame_done)─── InTransit <─────────┘
//! ```
//!
//! A slice-level producer publishes the slot as `Ready` before it has
//! written every line and keeps filling it while it is `InTransit`; the
//! drain side reads only the lines covered by `lines_ready`.
//!
//! On rx the ring carries owned frames instead ([`ReceiveRing`]): the
//! transport's notification context enqueues, the session worker dequeues.

pub mod arena;
pub mod ring;
pub mod slice;

pub use arena::FrameArena;
pub use ring::{FrameSlotRing, ReceiveRing, SlotBusy};
pub use slice::{SliceMeta, SliceProducer, SliceValidator};

/// Index of a slot within a session's ring.
pub type SlotIndex = usize;

/// State of one tx frame slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Owned by the producer, or waiting to be claimed.
    Free,
    /// Published, waiting for the transport.
    Ready,
    /// Being packetized by the transport.
    InTransit,
}

/// Read side of a multi-frame buffer.
pub trait FrameSource {
    /// The current frame.
    fn frame(&self) -> &[u8];
    /// Move to the next frame, wrapping at the end.
    fn advance_frame(&mut self);
}

/// Write side of a multi-frame buffer.
pub trait FrameSink {
    /// The current frame, or `None` if no destination is available.
    fn frame_mut(&mut self) -> Option<&mut [u8]>;
    /// Move to the next frame, wrapping at the end.
    fn advance_frame(&mut self);
}
