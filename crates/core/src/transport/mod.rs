//! The seam between sessions and whatever moves packets.
//!
//! A transport drives a session through callbacks and the session reaches
//! back into the transport for buffers:
//!
//! - **Tx** ([`TxCallbacks`] / [`TxTransport`]): frame and slice sessions
//!   hand out ready slots for the transport to packetize; RTP sessions
//!   borrow packet buffers, fill them and give them back.
//!
//! - **Rx** ([`RxCallbacks`] / [`RxTransport`]): frame and slice sessions
//!   receive reassembled frames in transport-owned buffers and return
//!   them once consumed; RTP sessions pull raw packets.
//!
//! Callbacks run on the transport's thread and never block on the
//! session's worker. [`loopback`] is the in-process transport used by the
//! CLI and the integration tests.

pub mod loopback;

use parking_lot::MutexGuard;

use crate::error::Result;
use crate::frame::{SliceMeta, SlotIndex};
use crate::session::SessionType;

pub use loopback::{Loopback, LoopbackConfig};

/// A slot the transport may now packetize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NextFrame {
    pub slot: SlotIndex,
    pub second_field: bool,
    /// Bytes in the slot's buffer.
    pub size: usize,
}

/// Session side of a tx transport.
///
/// Frame calls on an RTP-level session, and `notify_rtp_done` on a frame
/// or slice session, fail with `Unsupported`.
pub trait TxCallbacks: Send + Sync {
    fn session_type(&self) -> SessionType;

    /// Oldest ready slot, now in transit. `ResourceExhausted` when none is
    /// ready or another slot is still in transit.
    fn get_next_frame(&self) -> Result<NextFrame>;

    /// The transport finished with `slot`; it goes back to the producer.
    fn frame_done(&self, slot: SlotIndex) -> Result<()>;

    /// Lock the buffer of an in-transit slot.
    fn framebuffer(&self, slot: SlotIndex) -> Result<MutexGuard<'_, Vec<u8>>>;

    /// Lines of an in-transit slot written so far (slice-level only).
    fn query_slice_lines_ready(&self, slot: SlotIndex) -> Result<u16>;

    /// A packet buffer was returned to the pool.
    fn notify_rtp_done(&self) -> Result<()>;
}

/// Transport side used by an RTP-level tx session.
pub trait TxTransport: Send + Sync {
    /// A free packet buffer, or `None` if the pool is empty.
    fn get_packet_buffer(&self) -> Option<Vec<u8>>;

    /// Queue a built packet for sending.
    fn put_packet(&self, packet: Vec<u8>);
}

/// A reassembled unit handed to an rx session.
#[derive(Debug)]
pub struct RxFrame {
    /// Transport-owned; must go back through
    /// [`RxTransport::put_framebuffer`].
    pub buffer: Vec<u8>,
    pub size: usize,
    pub timestamp: u32,
    /// `false` when packets were lost; the missing bytes are stale.
    pub complete: bool,
    pub second_field: bool,
}

/// Session side of an rx transport.
pub trait RxCallbacks: Send + Sync {
    fn session_type(&self) -> SessionType;

    /// Hand over a received frame. On `SlotBusy` the session has already
    /// returned the buffer to the transport and counted the drop.
    fn notify_frame_ready(&self, frame: RxFrame) -> Result<()>;

    /// Progress of the unit currently being received (slice-level only).
    fn notify_slice_ready(&self, meta: SliceMeta) -> Result<()>;

    /// At least one packet is waiting in [`RxTransport::get_packet`].
    fn notify_rtp_ready(&self) -> Result<()>;
}

/// Transport side used by an rx session.
pub trait RxTransport: Send + Sync {
    /// Return a frame buffer to the transport's pool.
    fn put_framebuffer(&self, buffer: Vec<u8>);

    /// Next received packet, if any.
    fn get_packet(&self) -> Option<Vec<u8>>;

    /// Return a consumed packet buffer.
    fn put_packet_buffer(&self, buffer: Vec<u8>);
}
